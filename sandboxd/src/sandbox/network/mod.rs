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

pub use plugin::PluginNetworkProvisioner;

use super::{ClientError, NetworkHandle, SandboxRecord};
use std::fmt::Debug;
use std::path::PathBuf;

mod plugin;

/// Creates and destroys the network namespace of a sandbox.
///
/// Implementations are keyed by the sandbox id and must treat a teardown of
/// a namespace that does not exist as success.
#[tonic::async_trait]
pub trait NetworkProvisioner: Debug + Send + Sync {
    async fn setup(&self, sandbox: &SandboxRecord)
        -> Result<NetworkHandle, ClientError>;

    async fn teardown(&self, sandbox: &SandboxRecord) -> Result<(), ClientError>;

    /// The namespace path if the namespace still exists.
    async fn inspect(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<Option<PathBuf>, ClientError>;
}
