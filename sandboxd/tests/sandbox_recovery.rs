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

mod common;

use common::*;
use pretty_assertions::assert_eq;
use sandboxd::sandbox::{
    store::{FileSandboxStore, SandboxStore},
    NetworkProvisioner, SandboxFilter, SandboxId, SandboxRecord,
    SandboxState,
};

#[tokio::test]
async fn sandbox_recovery_keeps_ready_sandboxes() {
    let mut harness = Harness::new().await;
    let record = harness
        .controller
        .create_sandbox(sandbox_config("nginx"))
        .await
        .expect("create");
    let before = harness
        .controller
        .sandbox_status(&record.id)
        .await
        .expect("status")
        .expect("exists");

    let report = harness.restart().await;

    assert_eq!(report.examined, 1);
    assert_eq!(report.ready, 1);
    assert_eq!(report.updated, 0);
    let after = harness
        .controller
        .sandbox_status(&record.id)
        .await
        .expect("status")
        .expect("exists");
    assert_eq!(after, before);
}

#[tokio::test]
async fn sandbox_recovery_demotes_sandbox_with_dead_shim() {
    let mut harness = Harness::new().await;
    let record = harness
        .controller
        .create_sandbox(sandbox_config("nginx"))
        .await
        .expect("create");

    harness.fake_shim().forget(&record.id);
    let report = harness.restart().await;

    assert_eq!(report.not_ready, 1);
    assert_eq!(report.updated, 1);

    let status = harness
        .controller
        .sandbox_status(&record.id)
        .await
        .expect("status")
        .expect("not auto-deleted");
    assert_eq!(status.state, SandboxState::NotReady);
    assert_eq!(status.process_group_pid, None);
    assert!(status.network_namespace.is_some());
    assert_eq!(status.cleanup_errors.len(), 1);

    harness.controller.remove_sandbox(&record.id).await.expect("remove");
    assert_eq!(harness.fake_network().live(), 0);
    // nothing to delete for the shim
    assert_eq!(harness.fake_shim().deletes(), 0);
}

#[tokio::test]
async fn sandbox_recovery_finishes_interrupted_create() {
    let mut harness = Harness::new().await;

    // a create that crashed right after its network came up
    let config = sandbox_config("nginx");
    let record = SandboxRecord {
        id: SandboxId::generate(),
        metadata: config.metadata.clone(),
        state: SandboxState::Creating,
        network: None,
        process_group: None,
        labels: config.labels.clone(),
        annotations: config.annotations.clone(),
        runtime_handler: config.runtime_handler.clone(),
        created_at: chrono::Utc::now(),
        cleanup_errors: vec![],
    };
    let _ = harness.fake_network().setup(&record).await.expect("setup");
    {
        let store = FileSandboxStore::open(harness.state_dir.path())
            .await
            .expect("open store");
        store.put(&record).await.expect("put");
    }

    let report = harness.restart().await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.updated, 1);

    let status = harness
        .controller
        .sandbox_status(&record.id)
        .await
        .expect("status")
        .expect("exists");
    assert_eq!(status.state, SandboxState::NotReady);
    assert!(status.network_namespace.is_some());
    assert!(status.cleanup_errors[0].contains("CREATING"));

    harness.controller.remove_sandbox(&record.id).await.expect("remove");
    assert!(!harness.fake_network().is_live(&record.id));

    // the interrupted identity can be created again
    let retried = harness
        .controller
        .create_sandbox(config)
        .await
        .expect("create");
    assert_eq!(retried.state, SandboxState::Ready);
}

#[tokio::test]
async fn sandbox_recovery_leaves_handles_on_failed_probe() {
    let mut harness = Harness::new().await;
    let config = with_network_failpoint(sandbox_config("nginx"), "inspect", "error(flaky)");
    let record = harness.controller.create_sandbox(config).await.expect("create");

    let report = harness.restart().await;

    assert_eq!(report.failed_probes, 1);
    assert_eq!(report.ready, 1);
    let status = harness
        .controller
        .sandbox_status(&record.id)
        .await
        .expect("status")
        .expect("exists");
    assert_eq!(status.state, SandboxState::Ready);
    assert!(status.network_namespace.is_some());
}

#[tokio::test]
async fn sandbox_list_filters() {
    let harness = Harness::new().await;

    let web = harness
        .controller
        .create_sandbox(sandbox_config("web"))
        .await
        .expect("create");
    let db = harness
        .controller
        .create_sandbox(sandbox_config("db"))
        .await
        .expect("create");
    let _ = harness
        .controller
        .create_sandbox(with_network_failpoint(
            with_shim_failpoint(sandbox_config("cache"), "Start", "1*error(no)"),
            "teardown",
            "1*error(no)",
        ))
        .await
        .expect_err("create must fail");

    let all = harness
        .controller
        .list_sandboxes(&SandboxFilter::default())
        .await
        .expect("list");
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    let ready = harness
        .controller
        .list_sandboxes(&SandboxFilter::default().with_state(SandboxState::Ready))
        .await
        .expect("list");
    assert_eq!(
        ready.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        vec![web.id.clone(), db.id.clone()]
    );

    let labelled = harness
        .controller
        .list_sandboxes(&SandboxFilter::default().with_label("app", "db"))
        .await
        .expect("list");
    assert_eq!(labelled.len(), 1);
    assert_eq!(labelled[0].id, db.id);

    let by_prefix = harness
        .controller
        .list_sandboxes(&SandboxFilter::default().with_id(&web.id.as_str()[..12]))
        .await
        .expect("list");
    assert_eq!(by_prefix.len(), 1);
    assert_eq!(by_prefix[0].id, web.id);
}
