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

//! Pod sandbox lifecycle.
//!
//! A sandbox is a network namespace plus a supervisor process group, tracked
//! by a durable [SandboxRecord]. The [SandboxController] creates and removes
//! sandboxes with rollback, and reconciles stored records with reality on
//! startup.

pub use client_error::ClientError;
pub use controller::{ControllerTimeouts, SandboxController};
pub use error::{Result, SandboxError, SandboxStep};
pub use filter::SandboxFilter;
pub use metadata::{
    SandboxConfig, SandboxKey, SandboxMetadata, ValidatedSandboxConfig,
    ValidationError,
};
pub use network::NetworkProvisioner;
pub use process_group::ProcessGroupController;
pub use recovery::RecoveryReport;
pub use sandbox::{
    NetworkHandle, ProcessGroupHandle, SandboxRecord, SandboxState,
    SandboxStatus,
};
pub use sandbox_id::SandboxId;

mod client_error;
mod controller;
mod error;
pub mod failpoint;
mod filter;
mod lock_table;
mod metadata;
pub mod network;
pub mod process_group;
mod recovery;
#[allow(clippy::module_inception)]
mod sandbox;
mod sandbox_id;
pub mod store;
