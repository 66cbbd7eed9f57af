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

//! Pod sandbox lifecycle daemon.
//!
//! Creates and removes pod sandboxes (a network namespace plus a supervisor
//! process group) with rollback on partial failure, and recovers its view of
//! the world from durable records after a restart.

// Lint groups: https://doc.rust-lang.org/rustc/lints/groups.html
#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
#![warn(clippy::unwrap_used)]

use anyhow::Context;
use clap::Parser;
use config::SandboxdConfig;
use sandbox::{
    failpoint::{FailpointNetworkProvisioner, FailpointProcessGroup},
    network::PluginNetworkProvisioner,
    process_group::ShimProcessGroupController,
    store::FileSandboxStore,
    NetworkProvisioner, ProcessGroupController, SandboxController,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, trace};

pub mod config;
mod graceful_shutdown;
mod logging;
pub mod sandbox;

const EXIT_OKAY: i32 = 0;
const EXIT_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct SandboxdOptions {
    /// Path to the config file. Defaults to /etc/aurae/sandboxd.toml when
    /// present.
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Overrides `state_dir` from the config file.
    #[clap(long, value_parser)]
    state_dir: Option<PathBuf>,

    #[clap(short, long)]
    verbose: bool,
}

/// Parse options, set up logging and run the daemon until a shutdown signal.
///
/// Returns the process exit code.
pub async fn daemon() -> i32 {
    let options = SandboxdOptions::parse();

    if let Err(e) = logging::init(options.verbose) {
        eprintln!("failed to initialize logging: {e}");
        return EXIT_ERROR;
    }

    trace!("**Logging: Verbose Mode**");
    info!("Starting Sandbox Daemon...");

    let config = match SandboxdConfig::load(options.config.as_deref()) {
        Ok(mut config) => {
            if let Some(state_dir) = options.state_dir {
                config.state_dir = state_dir;
            }
            config
        }
        Err(e) => {
            error!("{e:?}");
            return EXIT_ERROR;
        }
    };

    match run(config).await {
        Ok(()) => EXIT_OKAY,
        Err(e) => {
            error!("{e:?}");
            EXIT_ERROR
        }
    }
}

/// Recover persisted sandboxes, then serve until SIGTERM or SIGINT.
pub async fn run(config: SandboxdConfig) -> anyhow::Result<()> {
    trace!("{config:#?}");

    let controller = build_controller(&config).await?;

    let report = controller.recover().await.context("recovery failed")?;
    info!(
        "recovered {} sandboxes ({} ready, {} not ready)",
        report.examined, report.ready, report.not_ready
    );

    graceful_shutdown::wait()
        .await
        .context("failed to listen for shutdown signals")?;

    info!("Sandbox Daemon shutting down");
    Ok(())
}

/// Assemble a [SandboxController] from the configured store and clients.
///
/// Failpoint decorators are only installed when `failpoints` is set.
pub async fn build_controller(
    config: &SandboxdConfig,
) -> anyhow::Result<SandboxController> {
    let store = FileSandboxStore::open(&config.state_dir)
        .await
        .with_context(|| {
            format!(
                "failed to open sandbox store at {}",
                config.state_dir.display()
            )
        })?;

    let plugin_config = config.network.load_plugin_config()?;
    let network = PluginNetworkProvisioner::new(&config.network, plugin_config);
    let shim =
        ShimProcessGroupController::new(&config.process_group, &config.state_dir);

    let (network, process_group): (
        Arc<dyn NetworkProvisioner>,
        Arc<dyn ProcessGroupController>,
    ) = if config.failpoints {
        (
            Arc::new(FailpointNetworkProvisioner::new(network)),
            Arc::new(FailpointProcessGroup::new(shim)),
        )
    } else {
        (Arc::new(network), Arc::new(shim))
    };

    Ok(SandboxController::new(
        Arc::new(store),
        network,
        process_group,
        config.timeouts(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox::SandboxFilter;
    use test_helpers::TempStateDir;

    #[test]
    fn test_options_parse() {
        let options = SandboxdOptions::try_parse_from([
            "sandboxd",
            "--config",
            "/tmp/sandboxd.toml",
            "--state-dir",
            "/tmp/state",
            "-v",
        ])
        .expect("valid options");

        assert_eq!(options.config, Some(PathBuf::from("/tmp/sandboxd.toml")));
        assert_eq!(options.state_dir, Some(PathBuf::from("/tmp/state")));
        assert!(options.verbose);
    }

    #[tokio::test]
    async fn test_build_controller_on_empty_state() {
        let dir = TempStateDir::new();
        let config = SandboxdConfig {
            state_dir: dir.path().to_path_buf(),
            failpoints: true,
            ..Default::default()
        };

        let controller = build_controller(&config).await.expect("controller");
        let report = controller.recover().await.expect("recover");

        assert_eq!(report.examined, 0);
        assert!(controller
            .list_sandboxes(&SandboxFilter::default())
            .await
            .expect("list")
            .is_empty());
    }
}
