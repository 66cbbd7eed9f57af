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
    client_error::with_timeout, error::Result, NetworkHandle, SandboxController,
    SandboxFilter, SandboxRecord, SandboxState,
};
use tracing::{info, warn};

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub examined: usize,
    pub updated: usize,
    pub ready: usize,
    pub not_ready: usize,
    pub failed_probes: usize,
}

impl SandboxController {
    /// Reconcile stored records with what actually exists.
    ///
    /// Runs once at startup, before any other operation. Handles are
    /// refreshed from the clients. Records left mid-flight by a crash and
    /// ready records that lost a resource become [SandboxState::NotReady].
    /// Nothing is torn down here, that is left to an explicit removal.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for record in self.store.list(&SandboxFilter::default()).await? {
            report.examined += 1;

            let _id_guard = self.id_locks.lock(record.id.clone()).await;
            let original = record.clone();
            let mut record = record;

            report.failed_probes += self.refresh_handles(&mut record).await;
            reconcile_state(&mut record);

            match record.state {
                SandboxState::Ready => report.ready += 1,
                _ => report.not_ready += 1,
            }

            if record != original {
                info!(
                    "recovered sandbox {} as {} (was {})",
                    record.id, record.state, original.state
                );
                self.store.put(&record).await?;
                report.updated += 1;
            }
        }

        info!(
            "recovery examined {} sandboxes: {} ready, {} not ready, {} updated",
            report.examined, report.ready, report.not_ready, report.updated
        );
        Ok(report)
    }

    /// Returns the number of probes that failed. Failed probes leave the
    /// handle untouched.
    async fn refresh_handles(&self, record: &mut SandboxRecord) -> usize {
        let mut failed = 0;

        let network = with_timeout(
            "network inspect",
            self.timeouts.network,
            self.network.inspect(record),
        )
        .await;
        match network {
            Ok(Some(namespace)) => match &mut record.network {
                Some(handle) => handle.namespace = namespace,
                None => {
                    record.network = Some(NetworkHandle { namespace, ips: vec![] })
                }
            },
            Ok(None) => record.network = None,
            Err(e) => {
                warn!("failed to inspect network of sandbox {}: {e}", record.id);
                failed += 1;
            }
        }

        let process_group = with_timeout(
            "process group inspect",
            self.timeouts.process_group,
            self.process_group.inspect(record),
        )
        .await;
        match process_group {
            Ok(found) => record.process_group = found,
            Err(e) => {
                warn!(
                    "failed to inspect process group of sandbox {}: {e}",
                    record.id
                );
                failed += 1;
            }
        }

        failed
    }
}

fn reconcile_state(record: &mut SandboxRecord) {
    match record.state {
        SandboxState::Creating | SandboxState::Removing => {
            record
                .cleanup_errors
                .push(format!("{} interrupted by a restart", record.state));
            record.state = SandboxState::NotReady;
        }
        SandboxState::Ready if !record.is_fully_provisioned() => {
            record.cleanup_errors.push(
                "resources went missing while the daemon was down".to_string(),
            );
            record.state = SandboxState::NotReady;
        }
        SandboxState::Ready | SandboxState::NotReady => {}
    }
}
