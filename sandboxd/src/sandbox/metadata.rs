/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use fancy_regex::Regex;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use thiserror::Error;

lazy_static! {
    pub static ref DOMAIN_NAME_LABEL_REGEX: Regex =
        Regex::new(r"^(?=.{1,63}$)(?![-])[a-zA-Z0-9-]+(?<![-])$")
            .expect("failed to parse 'DOMAIN_NAME_LABEL_REGEX'");
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field = {field}; Required")]
    Required { field: String },
    #[error("Field = {field};  Regex = {pattern}")]
    AllowRegexViolation { field: String, pattern: String },
}

/// Caller supplied identity of a sandbox.
///
/// `(namespace, name, uid)` is the logical identity a caller retries against,
/// `attempt` tells successive creations of that identity apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxMetadata {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub attempt: u32,
}

impl SandboxMetadata {
    pub fn key(&self) -> SandboxKey {
        SandboxKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
        }
    }
}

/// The logical identity of a sandbox, stable across attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SandboxKey {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl Display for SandboxKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.name, self.uid)
    }
}

/// A request to create a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxConfig {
    pub metadata: SandboxMetadata,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub runtime_handler: String,
}

/// A [SandboxConfig] whose identity fields have been checked.
#[derive(Debug, Clone)]
pub struct ValidatedSandboxConfig(SandboxConfig);

impl ValidatedSandboxConfig {
    pub fn validate(config: SandboxConfig) -> Result<Self, ValidationError> {
        let SandboxMetadata { name, namespace, uid, .. } = &config.metadata;

        dns_label(name, "name", Some("metadata"))?;
        dns_label(namespace, "namespace", Some("metadata"))?;
        required_not_empty(uid, "uid", Some("metadata"))?;

        Ok(Self(config))
    }

    pub fn key(&self) -> SandboxKey {
        self.0.metadata.key()
    }

    pub fn into_inner(self) -> SandboxConfig {
        self.0
    }
}

impl std::ops::Deref for ValidatedSandboxConfig {
    type Target = SandboxConfig;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn field_name(field_name: &str, parent_name: Option<&str>) -> String {
    match parent_name {
        None => field_name.to_string(),
        Some(parent_name) => format!("{parent_name}.{field_name}"),
    }
}

fn required_not_empty(
    value: &str,
    field: &str,
    parent_name: Option<&str>,
) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field_name(field, parent_name),
        });
    }
    Ok(())
}

fn dns_label(
    value: &str,
    field: &str,
    parent_name: Option<&str>,
) -> Result<(), ValidationError> {
    required_not_empty(value, field, parent_name)?;

    // a regex runtime error is treated the same as a mismatch
    if !DOMAIN_NAME_LABEL_REGEX.is_match(value).unwrap_or(false) {
        return Err(ValidationError::AllowRegexViolation {
            field: field_name(field, parent_name),
            pattern: DOMAIN_NAME_LABEL_REGEX.as_str().to_string(),
        });
    }
    Ok(())
}
