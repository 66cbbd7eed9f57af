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

pub use shim::ShimProcessGroupController;

use super::{ClientError, ProcessGroupHandle, SandboxRecord};
use std::fmt::Debug;

mod shim;

/// Starts and stops the supervisor process group of a sandbox.
///
/// Deleting a process group that is not running must succeed.
#[tonic::async_trait]
pub trait ProcessGroupController: Debug + Send + Sync {
    async fn start(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<ProcessGroupHandle, ClientError>;

    async fn delete(&self, sandbox: &SandboxRecord) -> Result<(), ClientError>;

    /// The running process group, if any.
    async fn inspect(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<Option<ProcessGroupHandle>, ClientError>;
}
