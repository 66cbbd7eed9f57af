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

use super::{
    store::StoreError, ClientError, SandboxId, SandboxKey, ValidationError,
};
use std::fmt::{Display, Formatter};
use thiserror::Error;
use tonic::Status;
use tracing::error;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// The external call a sandbox operation was making when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStep {
    SetupNetwork,
    StartProcessGroup,
    DeleteProcessGroup,
    TeardownNetwork,
}

impl SandboxStep {
    pub fn operation(&self) -> &'static str {
        match self {
            SandboxStep::SetupNetwork => "network setup",
            SandboxStep::StartProcessGroup => "process group start",
            SandboxStep::DeleteProcessGroup => "process group delete",
            SandboxStep::TeardownNetwork => "network teardown",
        }
    }
}

impl Display for SandboxStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.operation())
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid sandbox config: {0}")]
    InvalidConfig(#[from] ValidationError),
    #[error("sandbox '{sandbox_key}' already exists and is ready as '{sandbox_id}'")]
    SandboxExists { sandbox_key: SandboxKey, sandbox_id: SandboxId },
    #[error("sandbox '{sandbox_id}' could not be created: {source}")]
    ProvisioningFailure {
        sandbox_id: SandboxId,
        step: SandboxStep,
        #[source]
        source: ClientError,
    },
    #[error("creation of sandbox '{sandbox_key}' was cancelled")]
    Cancelled { sandbox_key: SandboxKey },
    #[error("sandbox '{sandbox_id}' was not fully cleaned up: {}", .errors.join("; "))]
    CleanupFailed { sandbox_id: SandboxId, errors: Vec<String> },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    TaskJoinError(#[from] tokio::task::JoinError),
}

impl From<SandboxError> for Status {
    fn from(err: SandboxError) -> Self {
        let msg = err.to_string();
        error!("{msg}");
        match err {
            SandboxError::InvalidConfig(_) => Status::invalid_argument(msg),
            SandboxError::SandboxExists { .. } => Status::already_exists(msg),
            SandboxError::ProvisioningFailure { source, .. } => {
                if source.is_timeout() {
                    Status::deadline_exceeded(msg)
                } else {
                    Status::internal(msg)
                }
            }
            SandboxError::Cancelled { .. } => Status::cancelled(msg),
            SandboxError::CleanupFailed { .. } => Status::internal(msg),
            SandboxError::Store(_) => Status::unavailable(msg),
            SandboxError::TaskJoinError(_) => Status::internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxMetadata;
    use std::time::Duration;
    use tonic::Code;

    #[test]
    fn test_provisioning_failure_carries_client_message() {
        let err = SandboxError::ProvisioningFailure {
            sandbox_id: SandboxId::from("abc"),
            step: SandboxStep::StartProcessGroup,
            source: ClientError::Injected {
                operation: "process group start",
                message: "you-shall-not-pass!".into(),
            },
        };

        let msg = err.to_string();
        assert!(msg.contains("process group start failed"));
        assert!(msg.contains("you-shall-not-pass!"));
    }

    #[test]
    fn test_status_codes() {
        let timeout: Status = SandboxError::ProvisioningFailure {
            sandbox_id: SandboxId::from("abc"),
            step: SandboxStep::SetupNetwork,
            source: ClientError::Timeout {
                operation: "network setup",
                timeout: Duration::from_secs(1),
            },
        }
        .into();
        assert_eq!(timeout.code(), Code::DeadlineExceeded);

        let invalid: Status = SandboxError::InvalidConfig(
            ValidationError::Required { field: "metadata.uid".into() },
        )
        .into();
        assert_eq!(invalid.code(), Code::InvalidArgument);

        let cleanup: Status = SandboxError::CleanupFailed {
            sandbox_id: SandboxId::from("abc"),
            errors: vec!["network teardown failed: boom".into()],
        }
        .into();
        assert_eq!(cleanup.code(), Code::Internal);
        assert!(cleanup.message().contains("boom"));

        let cancelled: Status = SandboxError::Cancelled {
            sandbox_key: SandboxMetadata {
                name: "nginx".into(),
                namespace: "default".into(),
                uid: "1234".into(),
                attempt: 1,
            }
            .key(),
        }
        .into();
        assert_eq!(cancelled.code(), Code::Cancelled);
    }
}
