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

use super::{SandboxConfig, SandboxId, SandboxKey, SandboxMetadata};
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxState {
    /// Resources are being provisioned. Not visible as ready to anyone.
    Creating,
    /// Both the network and the process group are up.
    Ready,
    /// A create or remove attempt left resources behind. Needs a remove.
    #[serde(rename = "NOTREADY")]
    NotReady,
    /// A remove attempt is in flight.
    Removing,
}

impl Display for SandboxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxState::Creating => "CREATING",
            SandboxState::Ready => "READY",
            SandboxState::NotReady => "NOTREADY",
            SandboxState::Removing => "REMOVING",
        };
        f.write_str(s)
    }
}

/// What the network provisioner handed back for a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub namespace: PathBuf,
    #[serde(default)]
    pub ips: Vec<IpNetwork>,
}

/// What the process-group controller handed back for a sandbox.
///
/// `pid` is `None` when a start was attempted but never confirmed. The handle
/// is still recorded so the group gets a delete on removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessGroupHandle {
    pub id: String,
    pub pid: Option<u32>,
}

impl ProcessGroupHandle {
    pub(crate) fn unconfirmed(id: &SandboxId) -> Self {
        Self { id: id.to_string(), pid: None }
    }
}

/// The durable record of one sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub id: SandboxId,
    pub metadata: SandboxMetadata,
    pub state: SandboxState,
    #[serde(default)]
    pub network: Option<NetworkHandle>,
    #[serde(default)]
    pub process_group: Option<ProcessGroupHandle>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub runtime_handler: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cleanup_errors: Vec<String>,
}

impl SandboxRecord {
    pub(crate) fn new(id: SandboxId, config: SandboxConfig, attempt: u32) -> Self {
        let SandboxConfig {
            mut metadata,
            labels,
            annotations,
            runtime_handler,
        } = config;
        metadata.attempt = attempt;

        Self {
            id,
            metadata,
            state: SandboxState::Creating,
            network: None,
            process_group: None,
            labels,
            annotations,
            runtime_handler,
            created_at: Utc::now(),
            cleanup_errors: vec![],
        }
    }

    pub fn key(&self) -> SandboxKey {
        self.metadata.key()
    }

    /// Anything left to reclaim
    pub fn has_resources(&self) -> bool {
        self.network.is_some() || self.process_group.is_some()
    }

    pub fn is_fully_provisioned(&self) -> bool {
        self.network.is_some()
            && self.process_group.as_ref().is_some_and(|pg| pg.pid.is_some())
    }
}

/// The externally visible view of a [SandboxRecord].
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxStatus {
    pub id: SandboxId,
    pub metadata: SandboxMetadata,
    pub state: SandboxState,
    pub created_at: DateTime<Utc>,
    pub network_namespace: Option<PathBuf>,
    pub ips: Vec<IpNetwork>,
    pub process_group_pid: Option<u32>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub runtime_handler: String,
    pub cleanup_errors: Vec<String>,
}

impl SandboxStatus {
    /// The address other components should reach the sandbox on.
    pub fn primary_ip(&self) -> Option<IpNetwork> {
        self.ips.first().copied()
    }
}

impl From<SandboxRecord> for SandboxStatus {
    fn from(record: SandboxRecord) -> Self {
        let (network_namespace, ips) = match record.network {
            Some(NetworkHandle { namespace, ips }) => (Some(namespace), ips),
            None => (None, vec![]),
        };

        Self {
            id: record.id,
            metadata: record.metadata,
            state: record.state,
            created_at: record.created_at,
            network_namespace,
            ips,
            process_group_pid: record.process_group.and_then(|pg| pg.pid),
            labels: record.labels,
            annotations: record.annotations,
            runtime_handler: record.runtime_handler,
            cleanup_errors: record.cleanup_errors,
        }
    }
}
