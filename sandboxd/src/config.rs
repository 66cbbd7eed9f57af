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

//! Daemon configuration, read from a TOML file.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! working configuration.

use crate::sandbox::ControllerTimeouts;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the daemon state (records, ledger, pid files).
pub const SANDBOXD_STATE_DIR: &str = "/var/lib/aurae/sandboxd";

/// Default location of the daemon configuration.
pub const SANDBOXD_CONFIG: &str = "/etc/aurae/sandboxd.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxdConfig {
    pub state_dir: PathBuf,
    /// Honor failpoint annotations on sandboxes. Never enable in production.
    pub failpoints: bool,
    pub network: NetworkConfig,
    pub process_group: ProcessGroupConfig,
}

impl Default for SandboxdConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(SANDBOXD_STATE_DIR),
            failpoints: false,
            network: Default::default(),
            process_group: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub plugin: PathBuf,
    pub plugin_args: Vec<String>,
    pub plugin_dir: PathBuf,
    pub netns_dir: PathBuf,
    pub interface: String,
    /// JSON network config handed to the plugin on stdin.
    pub config: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            plugin: PathBuf::from("/opt/cni/bin/bridge"),
            plugin_args: vec![],
            plugin_dir: PathBuf::from("/opt/cni/bin"),
            netns_dir: PathBuf::from("/var/run/netns"),
            interface: "eth0".to_string(),
            config: None,
            timeout_ms: 60_000,
        }
    }
}

impl NetworkConfig {
    /// Read the plugin network config, or build a minimal one naming the
    /// plugin.
    pub fn load_plugin_config(&self) -> Result<Value> {
        let Some(path) = &self.config else {
            let plugin_type = self
                .plugin
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(json!({
                "cniVersion": "0.4.0",
                "name": "sandboxd",
                "type": plugin_type,
            }));
        };

        let contents = std::fs::read(path).with_context(|| {
            format!("could not read network config {}", path.display())
        })?;
        let value: Value = serde_json::from_slice(&contents).with_context(|| {
            format!("could not parse network config {}", path.display())
        })?;

        if !value.is_object() {
            return Err(anyhow!(
                "network config {} must be a JSON object",
                path.display()
            ));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessGroupConfig {
    pub shim: PathBuf,
    pub shim_args: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for ProcessGroupConfig {
    fn default() -> Self {
        Self {
            shim: PathBuf::from("/usr/local/bin/aurae-sandbox-shim"),
            shim_args: vec![],
            timeout_ms: 30_000,
        }
    }
}

impl SandboxdConfig {
    /// Attempt to parse a config file into memory.
    pub fn parse_from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_toml = std::fs::read_to_string(path).with_context(|| {
            format!("could not read sandboxd config {}", path.display())
        })?;

        Self::parse_from_toml(&config_toml)
    }

    /// Attempt to parse a config string into memory.
    pub fn parse_from_toml(config_toml: &str) -> Result<Self> {
        Ok(toml::from_str(config_toml)?)
    }

    /// Load `path` if given. Without a path the default config file is used
    /// when present, the built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::parse_from_toml_file(path),
            None if Path::new(SANDBOXD_CONFIG).exists() => {
                Self::parse_from_toml_file(SANDBOXD_CONFIG)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn timeouts(&self) -> ControllerTimeouts {
        ControllerTimeouts {
            network: Duration::from_millis(self.network.timeout_ms),
            process_group: Duration::from_millis(self.process_group.timeout_ms),
        }
    }
}
