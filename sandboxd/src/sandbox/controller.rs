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
    client_error::with_timeout,
    ClientError,
    error::{Result, SandboxError, SandboxStep},
    lock_table::LockTable,
    store::SandboxStore,
    NetworkProvisioner, ProcessGroupController, ProcessGroupHandle,
    SandboxConfig, SandboxFilter, SandboxId, SandboxKey, SandboxRecord,
    SandboxState, SandboxStatus, ValidatedSandboxConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long a single external call may take before it is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTimeouts {
    pub network: Duration,
    pub process_group: Duration,
}

impl Default for ControllerTimeouts {
    fn default() -> Self {
        Self {
            network: Duration::from_secs(60),
            process_group: Duration::from_secs(30),
        }
    }
}

/// Drives sandboxes through their lifecycle.
///
/// A sandbox is only ever reported [SandboxState::Ready] once both its
/// network and its process group are up. A creation that fails part way
/// undoes whatever it already did. When undoing fails too, the record stays
/// behind as [SandboxState::NotReady] so a later removal can finish the job.
#[derive(Debug, Clone)]
pub struct SandboxController {
    pub(crate) store: Arc<dyn SandboxStore>,
    pub(crate) network: Arc<dyn NetworkProvisioner>,
    pub(crate) process_group: Arc<dyn ProcessGroupController>,
    pub(crate) timeouts: ControllerTimeouts,
    identity_locks: Arc<LockTable<SandboxKey>>,
    pub(crate) id_locks: Arc<LockTable<SandboxId>>,
}

impl SandboxController {
    pub fn new(
        store: Arc<dyn SandboxStore>,
        network: Arc<dyn NetworkProvisioner>,
        process_group: Arc<dyn ProcessGroupController>,
        timeouts: ControllerTimeouts,
    ) -> Self {
        Self {
            store,
            network,
            process_group,
            timeouts,
            identity_locks: Default::default(),
            id_locks: Default::default(),
        }
    }

    /// Create a sandbox and bring it to [SandboxState::Ready].
    ///
    /// The work runs on its own task. Dropping the returned future cancels
    /// the creation, which then rolls back on that task to completion.
    #[tracing::instrument(skip(self, config), fields(sandbox = %config.metadata.key()))]
    pub async fn create_sandbox(&self, config: SandboxConfig) -> Result<SandboxRecord> {
        let config = ValidatedSandboxConfig::validate(config)?;

        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let controller = self.clone();
        tokio::spawn(async move { controller.create(config, cancel).await })
            .await?
    }

    /// Remove a sandbox and everything it still holds.
    ///
    /// Removing an unknown sandbox succeeds. A removal that cannot reclaim
    /// everything leaves the sandbox [SandboxState::NotReady] and may be
    /// retried.
    #[tracing::instrument(skip(self))]
    pub async fn remove_sandbox(&self, id: &SandboxId) -> Result<()> {
        let controller = self.clone();
        let id = id.clone();
        tokio::spawn(async move { controller.remove(id).await }).await?
    }

    pub async fn list_sandboxes(
        &self,
        filter: &SandboxFilter,
    ) -> Result<Vec<SandboxRecord>> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn sandbox_status(
        &self,
        id: &SandboxId,
    ) -> Result<Option<SandboxStatus>> {
        Ok(self.store.get(id).await?.map(SandboxStatus::from))
    }

    async fn create(
        &self,
        config: ValidatedSandboxConfig,
        cancel: CancellationToken,
    ) -> Result<SandboxRecord> {
        let key = config.key();
        let _identity_guard = self.identity_locks.lock(key.clone()).await;

        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled { sandbox_key: key });
        }

        let ready = SandboxFilter::default().with_state(SandboxState::Ready);
        if let Some(existing) =
            self.store.list(&ready).await?.into_iter().find(|r| r.key() == key)
        {
            return Err(SandboxError::SandboxExists {
                sandbox_key: key,
                sandbox_id: existing.id,
            });
        }

        let attempt =
            self.store.next_attempt(&key, config.metadata.attempt).await?;
        let mut record =
            SandboxRecord::new(SandboxId::generate(), config.into_inner(), attempt);

        let _id_guard = self.id_locks.lock(record.id.clone()).await;

        self.store.put(&record).await?;
        info!("creating sandbox {} attempt {attempt}", record.id);

        let provisioned = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(SandboxError::Cancelled { sandbox_key: key })
            }
            res = self.provision(&mut record) => res,
        };

        match provisioned {
            Ok(()) => {
                info!("sandbox {} is ready", record.id);
                Ok(record)
            }
            Err(e) => {
                warn!("creating sandbox {} failed: {e}", record.id);
                let network_done = record.network.is_some();
                let process_group_done = record.process_group.is_some();
                self.rollback(record, network_done, process_group_done).await;
                Err(e)
            }
        }
    }

    /// Bring up the network, then the process group, then mark the record
    /// ready. On failure `record` holds a handle for every step that needs
    /// undoing.
    async fn provision(&self, record: &mut SandboxRecord) -> Result<()> {
        let network = with_timeout(
            SandboxStep::SetupNetwork.operation(),
            self.timeouts.network,
            self.network.setup(record),
        )
        .await
        .map_err(|source| SandboxError::ProvisioningFailure {
            sandbox_id: record.id.clone(),
            step: SandboxStep::SetupNetwork,
            source,
        })?;
        record.network = Some(network);
        self.store.put(record).await?;

        // a start that fails or times out may still have left a shim behind
        record.process_group = Some(ProcessGroupHandle::unconfirmed(&record.id));
        let process_group = with_timeout(
            SandboxStep::StartProcessGroup.operation(),
            self.timeouts.process_group,
            self.process_group.start(record),
        )
        .await
        .map_err(|source| SandboxError::ProvisioningFailure {
            sandbox_id: record.id.clone(),
            step: SandboxStep::StartProcessGroup,
            source,
        })?;
        record.process_group = Some(process_group);

        record.state = SandboxState::Ready;
        if let Err(e) = self.store.put(record).await {
            record.state = SandboxState::Creating;
            return Err(e.into());
        }

        Ok(())
    }

    /// Undo a failed creation.
    ///
    /// A clean rollback deletes the record. Anything left over keeps its
    /// handle and the record becomes [SandboxState::NotReady]. The network
    /// is only torn down once the process group is confirmed gone.
    async fn rollback(
        &self,
        mut record: SandboxRecord,
        network_done: bool,
        process_group_done: bool,
    ) {
        let mut errors = vec![];

        if process_group_done {
            if let Err(e) = self.delete_process_group(&mut record).await {
                errors.push(e.to_string());
            }
        }

        if network_done && errors.is_empty() {
            if let Err(e) = self.teardown_network(&mut record).await {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            match self.store.delete(&record.id).await {
                Ok(()) => {
                    info!("rolled back sandbox {}", record.id);
                    return;
                }
                Err(e) => {
                    error!(
                        "rolled back sandbox {} but failed to delete its record: {e}",
                        record.id
                    );
                    errors.push(format!("failed to delete the record: {e}"));
                }
            }
        } else {
            warn!(
                "rollback of sandbox {} left resources behind: {}",
                record.id,
                errors.join("; ")
            );
        }

        self.mark_not_ready(&mut record, errors).await;
    }

    /// Park a record that could not be finished as [SandboxState::NotReady].
    async fn mark_not_ready(
        &self,
        record: &mut SandboxRecord,
        errors: Vec<String>,
    ) {
        record.state = SandboxState::NotReady;
        record.cleanup_errors = errors;
        if let Err(e) = self.store.put(record).await {
            error!("failed to persist sandbox {} as not ready: {e}", record.id);
        }
    }

    async fn remove(&self, id: SandboxId) -> Result<()> {
        let _id_guard = self.id_locks.lock(id.clone()).await;

        let Some(mut record) = self.store.get(&id).await? else {
            info!("sandbox {id} is already gone");
            return Ok(());
        };

        record.state = SandboxState::Removing;
        self.store.put(&record).await?;

        // every step gets its attempt, whatever happened before
        let mut errors = vec![];
        if record.process_group.is_some() {
            if let Err(e) = self.delete_process_group(&mut record).await {
                errors.push(e.to_string());
            }
        }
        if record.network.is_some() {
            if let Err(e) = self.teardown_network(&mut record).await {
                errors.push(e.to_string());
            }
        }

        if !errors.is_empty() {
            self.mark_not_ready(&mut record, errors.clone()).await;
            return Err(SandboxError::CleanupFailed { sandbox_id: id, errors });
        }

        if let Err(e) = self.store.delete(&id).await {
            let errors = vec![format!("failed to delete the record: {e}")];
            self.mark_not_ready(&mut record, errors).await;
            return Err(e.into());
        }

        info!("removed sandbox {id}");
        Ok(())
    }

    /// Delete the process group, clearing its handle on success.
    async fn delete_process_group(
        &self,
        record: &mut SandboxRecord,
    ) -> std::result::Result<(), ClientError> {
        with_timeout(
            SandboxStep::DeleteProcessGroup.operation(),
            self.timeouts.process_group,
            self.process_group.delete(record),
        )
        .await?;

        record.process_group = None;
        self.persist_progress(record).await;
        Ok(())
    }

    /// Tear down the network, clearing its handle on success.
    async fn teardown_network(
        &self,
        record: &mut SandboxRecord,
    ) -> std::result::Result<(), ClientError> {
        with_timeout(
            SandboxStep::TeardownNetwork.operation(),
            self.timeouts.network,
            self.network.teardown(record),
        )
        .await?;

        record.network = None;
        self.persist_progress(record).await;
        Ok(())
    }

    // Best effort: the final put or delete still decides the outcome.
    async fn persist_progress(&self, record: &SandboxRecord) {
        if let Err(e) = self.store.put(record).await {
            warn!("failed to persist progress of sandbox {}: {e}", record.id);
        }
    }
}
