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

use super::ProcessGroupController;
use crate::config::ProcessGroupConfig;
use crate::sandbox::{ClientError, ProcessGroupHandle, SandboxRecord};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, trace};

#[derive(Debug, Deserialize)]
struct ShimStarted {
    pid: u32,
}

/// Runs one shim process per sandbox.
///
/// The shim is invoked as `{shim} {shim_args..} --id {id} --namespace {ns}
/// start|delete` with the sandbox annotations as JSON on stdin. `start`
/// reports `{"pid": N}` on stdout and returns once the shim is running.
#[derive(Debug, Clone)]
pub struct ShimProcessGroupController {
    shim: PathBuf,
    shim_args: Vec<String>,
    pid_dir: PathBuf,
}

impl ShimProcessGroupController {
    pub fn new(config: &ProcessGroupConfig, state_dir: &std::path::Path) -> Self {
        Self {
            shim: config.shim.clone(),
            shim_args: config.shim_args.clone(),
            pid_dir: state_dir.join("shims"),
        }
    }

    fn pid_file(&self, sandbox: &SandboxRecord) -> PathBuf {
        self.pid_dir.join(format!("{}.pid", sandbox.id))
    }

    async fn exec(
        &self,
        action: &'static str,
        operation: &'static str,
        sandbox: &SandboxRecord,
    ) -> Result<Vec<u8>, ClientError> {
        let annotations = serde_json::to_vec(&sandbox.annotations)
            .map_err(|source| ClientError::Decode { operation, source })?;

        trace!("running shim {action} for {}", sandbox.id);

        let mut child = Command::new(&self.shim)
            .args(&self.shim_args)
            .args(["--id", sandbox.id.as_str()])
            .args(["--namespace", sandbox.metadata.namespace.as_str()])
            .arg(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClientError::Io { operation, source })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&annotations)
                .await
                .map_err(|source| ClientError::Io { operation, source })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ClientError::Io { operation, source })?;

        if !output.status.success() {
            return Err(ClientError::Failed {
                operation,
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(output.stdout)
    }
}

#[tonic::async_trait]
impl ProcessGroupController for ShimProcessGroupController {
    async fn start(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<ProcessGroupHandle, ClientError> {
        let operation = "process group start";

        let stdout = self.exec("start", operation, sandbox).await?;
        let ShimStarted { pid } = serde_json::from_slice(&stdout)
            .map_err(|source| ClientError::Decode { operation, source })?;

        tokio::fs::create_dir_all(&self.pid_dir)
            .await
            .map_err(|source| ClientError::Io { operation, source })?;
        tokio::fs::write(self.pid_file(sandbox), pid.to_string())
            .await
            .map_err(|source| ClientError::Io { operation, source })?;

        info!("shim for sandbox {} running as pid {pid}", sandbox.id);

        Ok(ProcessGroupHandle { id: sandbox.id.to_string(), pid: Some(pid) })
    }

    async fn delete(&self, sandbox: &SandboxRecord) -> Result<(), ClientError> {
        let operation = "process group delete";

        let _ = self.exec("delete", operation, sandbox).await?;

        match tokio::fs::remove_file(self.pid_file(sandbox)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(ClientError::Io { operation, source }),
        }

        info!("shim for sandbox {} deleted", sandbox.id);
        Ok(())
    }

    async fn inspect(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<Option<ProcessGroupHandle>, ClientError> {
        let operation = "process group inspect";

        let contents = match tokio::fs::read_to_string(self.pid_file(sandbox)).await
        {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ClientError::Io { operation, source }),
        };

        let pid = contents.trim().parse::<u32>().map_err(|e| {
            ClientError::Failed {
                operation,
                message: format!("invalid pid file contents: {e}"),
            }
        })?;
        let Ok(raw_pid) = i32::try_from(pid) else {
            return Err(ClientError::Failed {
                operation,
                message: format!("pid {pid} out of range"),
            });
        };

        // signal 0 only checks for existence
        match kill(Pid::from_raw(raw_pid), None) {
            Ok(()) | Err(Errno::EPERM) => Ok(Some(ProcessGroupHandle {
                id: sandbox.id.to_string(),
                pid: Some(pid),
            })),
            Err(Errno::ESRCH) => Ok(None),
            Err(e) => Err(ClientError::Io { operation, source: e.into() }),
        }
    }
}
