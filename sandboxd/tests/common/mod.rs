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

#![allow(dead_code)]

use sandboxd::sandbox::{
    failpoint::{
        FailpointNetworkProvisioner, FailpointProcessGroup,
        NETWORK_FAILPOINT_PREFIX, PROCESS_GROUP_FAILPOINT_PREFIX,
    },
    store::FileSandboxStore,
    ClientError, ControllerTimeouts, NetworkHandle, NetworkProvisioner,
    ProcessGroupController, ProcessGroupHandle, RecoveryReport, SandboxConfig,
    SandboxController, SandboxId, SandboxMetadata, SandboxRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::TempStateDir;

#[derive(Debug, Default)]
struct FakeNetworkState {
    live: HashMap<SandboxId, NetworkHandle>,
    next_ip: u8,
    setups: usize,
    teardowns: usize,
}

/// In-memory network provisioner. Hands out addresses from 10.88.0.0/16.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    state: Mutex<FakeNetworkState>,
}

impl FakeNetwork {
    pub fn live(&self) -> usize {
        self.state.lock().expect("poisoned").live.len()
    }

    pub fn is_live(&self, id: &SandboxId) -> bool {
        self.state.lock().expect("poisoned").live.contains_key(id)
    }

    pub fn setups(&self) -> usize {
        self.state.lock().expect("poisoned").setups
    }

    pub fn teardowns(&self) -> usize {
        self.state.lock().expect("poisoned").teardowns
    }

    /// Simulate the namespace disappearing behind the daemon's back.
    pub fn forget(&self, id: &SandboxId) {
        let _ = self.state.lock().expect("poisoned").live.remove(id);
    }
}

#[tonic::async_trait]
impl NetworkProvisioner for FakeNetwork {
    async fn setup(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<NetworkHandle, ClientError> {
        let mut state = self.state.lock().expect("poisoned");
        state.setups += 1;
        state.next_ip += 1;

        let handle = NetworkHandle {
            namespace: PathBuf::from("/var/run/netns").join(sandbox.id.as_str()),
            ips: vec![format!("10.88.0.{}/16", state.next_ip)
                .parse()
                .expect("valid network")],
        };
        let _ = state.live.insert(sandbox.id.clone(), handle.clone());

        Ok(handle)
    }

    async fn teardown(&self, sandbox: &SandboxRecord) -> Result<(), ClientError> {
        let mut state = self.state.lock().expect("poisoned");
        state.teardowns += 1;
        let _ = state.live.remove(&sandbox.id);
        Ok(())
    }

    async fn inspect(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<Option<PathBuf>, ClientError> {
        let state = self.state.lock().expect("poisoned");
        Ok(state.live.get(&sandbox.id).map(|h| h.namespace.clone()))
    }
}

#[derive(Debug, Default)]
struct FakeShimState {
    live: HashMap<SandboxId, ProcessGroupHandle>,
    next_pid: u32,
    starts: usize,
    deletes: usize,
}

/// In-memory process group controller.
#[derive(Debug, Default)]
pub struct FakeShim {
    state: Mutex<FakeShimState>,
}

impl FakeShim {
    pub fn live(&self) -> usize {
        self.state.lock().expect("poisoned").live.len()
    }

    pub fn is_live(&self, id: &SandboxId) -> bool {
        self.state.lock().expect("poisoned").live.contains_key(id)
    }

    pub fn starts(&self) -> usize {
        self.state.lock().expect("poisoned").starts
    }

    pub fn deletes(&self) -> usize {
        self.state.lock().expect("poisoned").deletes
    }

    /// Simulate the shim dying behind the daemon's back.
    pub fn forget(&self, id: &SandboxId) {
        let _ = self.state.lock().expect("poisoned").live.remove(id);
    }
}

#[tonic::async_trait]
impl ProcessGroupController for FakeShim {
    async fn start(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<ProcessGroupHandle, ClientError> {
        let mut state = self.state.lock().expect("poisoned");
        state.starts += 1;
        state.next_pid += 1;

        let handle = ProcessGroupHandle {
            id: sandbox.id.to_string(),
            pid: Some(1000 + state.next_pid),
        };
        let _ = state.live.insert(sandbox.id.clone(), handle.clone());

        Ok(handle)
    }

    async fn delete(&self, sandbox: &SandboxRecord) -> Result<(), ClientError> {
        let mut state = self.state.lock().expect("poisoned");
        state.deletes += 1;
        let _ = state.live.remove(&sandbox.id);
        Ok(())
    }

    async fn inspect(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<Option<ProcessGroupHandle>, ClientError> {
        let state = self.state.lock().expect("poisoned");
        Ok(state.live.get(&sandbox.id).cloned())
    }
}

/// A controller over fake clients and a real on-disk store.
///
/// The clients (and their failpoint progress) outlive [Harness::restart],
/// just like external resources outlive the daemon.
pub struct Harness {
    pub state_dir: TempStateDir,
    pub network: Arc<FailpointNetworkProvisioner<FakeNetwork>>,
    pub shim: Arc<FailpointProcessGroup<FakeShim>>,
    pub controller: SandboxController,
    pub timeouts: ControllerTimeouts,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_timeouts(ControllerTimeouts {
            network: Duration::from_secs(5),
            process_group: Duration::from_secs(5),
        })
        .await
    }

    pub async fn with_timeouts(timeouts: ControllerTimeouts) -> Self {
        let state_dir = TempStateDir::new();
        let network =
            Arc::new(FailpointNetworkProvisioner::new(FakeNetwork::default()));
        let shim = Arc::new(FailpointProcessGroup::new(FakeShim::default()));
        let controller =
            controller(&state_dir, network.clone(), shim.clone(), timeouts).await;

        Self { state_dir, network, shim, controller, timeouts }
    }

    /// Drop the controller and start a fresh one on the same state, running
    /// recovery like the daemon does on startup.
    pub async fn restart(&mut self) -> RecoveryReport {
        self.controller = controller(
            &self.state_dir,
            self.network.clone(),
            self.shim.clone(),
            self.timeouts,
        )
        .await;
        self.controller.recover().await.expect("recovery failed")
    }

    pub fn fake_network(&self) -> &FakeNetwork {
        self.network.inner()
    }

    pub fn fake_shim(&self) -> &FakeShim {
        self.shim.inner()
    }
}

async fn controller(
    state_dir: &TempStateDir,
    network: Arc<FailpointNetworkProvisioner<FakeNetwork>>,
    shim: Arc<FailpointProcessGroup<FakeShim>>,
    timeouts: ControllerTimeouts,
) -> SandboxController {
    let store = FileSandboxStore::open(state_dir.path())
        .await
        .expect("failed to open store");
    SandboxController::new(Arc::new(store), network, shim, timeouts)
}

pub fn sandbox_config(name: &str) -> SandboxConfig {
    SandboxConfig {
        metadata: SandboxMetadata {
            name: name.to_string(),
            namespace: "default".to_string(),
            uid: format!("{name}-{}", uuid::Uuid::new_v4().simple()),
            attempt: 1,
        },
        labels: BTreeMap::from([("app".to_string(), name.to_string())]),
        annotations: BTreeMap::new(),
        runtime_handler: "runc".to_string(),
    }
}

pub fn with_network_failpoint(
    mut config: SandboxConfig,
    operation: &str,
    definition: &str,
) -> SandboxConfig {
    let _ = config.annotations.insert(
        format!("{NETWORK_FAILPOINT_PREFIX}{operation}"),
        definition.to_string(),
    );
    config
}

pub fn with_shim_failpoint(
    mut config: SandboxConfig,
    method: &str,
    definition: &str,
) -> SandboxConfig {
    let _ = config.annotations.insert(
        format!("{PROCESS_GROUP_FAILPOINT_PREFIX}{method}"),
        definition.to_string(),
    );
    config
}
