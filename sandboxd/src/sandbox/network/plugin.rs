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

use super::NetworkProvisioner;
use crate::config::NetworkConfig;
use crate::sandbox::{ClientError, NetworkHandle, SandboxRecord};
use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, trace};

const ADD: &str = "ADD";
const DEL: &str = "DEL";

/// Runtime config key under which sandbox annotations reach the plugin.
const ANNOTATIONS_RUNTIME_CONFIG: &str = "io.aurae.sandbox.annotations";

#[derive(Debug, Deserialize)]
struct PluginResult {
    #[serde(default)]
    ips: Vec<PluginIp>,
}

#[derive(Debug, Deserialize)]
struct PluginIp {
    address: IpNetwork,
}

#[derive(Debug, Deserialize)]
struct PluginFailure {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    msg: String,
}

/// Sets up sandbox networking by running a network plugin binary.
///
/// The plugin follows the container network interface calling convention:
/// the command and sandbox are passed through `CNI_*` environment variables,
/// the network config as JSON on stdin and the result as JSON on stdout. The
/// plugin owns the namespace at `CNI_NETNS`.
#[derive(Debug, Clone)]
pub struct PluginNetworkProvisioner {
    plugin: PathBuf,
    plugin_args: Vec<String>,
    plugin_dir: PathBuf,
    netns_dir: PathBuf,
    interface: String,
    network_config: Value,
}

impl PluginNetworkProvisioner {
    pub fn new(config: &NetworkConfig, network_config: Value) -> Self {
        Self {
            plugin: config.plugin.clone(),
            plugin_args: config.plugin_args.clone(),
            plugin_dir: config.plugin_dir.clone(),
            netns_dir: config.netns_dir.clone(),
            interface: config.interface.clone(),
            network_config,
        }
    }

    fn netns_path(&self, sandbox: &SandboxRecord) -> PathBuf {
        self.netns_dir.join(sandbox.id.as_str())
    }

    async fn exec(
        &self,
        command: &'static str,
        operation: &'static str,
        sandbox: &SandboxRecord,
    ) -> Result<Vec<u8>, ClientError> {
        let mut stdin_config = self.network_config.clone();
        if let Value::Object(map) = &mut stdin_config {
            let _ = map.insert(
                "runtimeConfig".into(),
                json!({ ANNOTATIONS_RUNTIME_CONFIG: sandbox.annotations }),
            );
        }
        let stdin_config = serde_json::to_vec(&stdin_config)
            .map_err(|source| ClientError::Decode { operation, source })?;

        trace!("running network plugin {command} for {}", sandbox.id);

        let mut child = Command::new(&self.plugin)
            .args(&self.plugin_args)
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", sandbox.id.as_str())
            .env("CNI_NETNS", self.netns_path(sandbox))
            .env("CNI_IFNAME", &self.interface)
            .env("CNI_PATH", &self.plugin_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClientError::Io { operation, source })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&stdin_config)
                .await
                .map_err(|source| ClientError::Io { operation, source })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ClientError::Io { operation, source })?;

        if !output.status.success() {
            let message = match serde_json::from_slice::<PluginFailure>(&output.stdout)
            {
                Ok(PluginFailure { code, msg }) => format!("code {code}: {msg}"),
                Err(_) => format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            };
            return Err(ClientError::Failed { operation, message });
        }

        Ok(output.stdout)
    }
}

#[tonic::async_trait]
impl NetworkProvisioner for PluginNetworkProvisioner {
    async fn setup(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<NetworkHandle, ClientError> {
        let operation = "network setup";

        if let Err(source) = tokio::fs::create_dir_all(&self.netns_dir).await {
            return Err(ClientError::Io { operation, source });
        }

        let stdout = self.exec(ADD, operation, sandbox).await?;
        let result: PluginResult = serde_json::from_slice(&stdout)
            .map_err(|source| ClientError::Decode { operation, source })?;

        let handle = NetworkHandle {
            namespace: self.netns_path(sandbox),
            ips: result.ips.into_iter().map(|ip| ip.address).collect(),
        };
        info!(
            "network for sandbox {} ready with {} addresses",
            sandbox.id,
            handle.ips.len()
        );

        Ok(handle)
    }

    async fn teardown(&self, sandbox: &SandboxRecord) -> Result<(), ClientError> {
        let _ = self.exec(DEL, "network teardown", sandbox).await?;
        info!("network for sandbox {} removed", sandbox.id);
        Ok(())
    }

    async fn inspect(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<Option<PathBuf>, ClientError> {
        let path = self.netns_path(sandbox);
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(Some(path)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => {
                Err(ClientError::Io { operation: "network inspect", source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxConfig, SandboxId, SandboxMetadata};
    use pretty_assertions::assert_eq;
    use test_helpers::TempStateDir;

    const PLUGIN: &str = r#"
cat > "$CNI_NETNS.stdin"
case "$CNI_COMMAND" in
ADD)
    touch "$CNI_NETNS"
    echo '{"cniVersion":"0.4.0","ips":[{"address":"10.88.0.5/16"},{"address":"fd00::5/64"}]}'
    ;;
DEL)
    rm -f "$CNI_NETNS"
    ;;
esac
"#;

    const FAILING_PLUGIN: &str = r#"
cat > /dev/null
echo '{"code":7,"msg":"no addresses left"}'
exit 1
"#;

    fn provisioner(dir: &TempStateDir, script: &str) -> PluginNetworkProvisioner {
        let script = dir.write_file("plugin.sh", script);
        let config = NetworkConfig {
            plugin: "/bin/sh".into(),
            plugin_args: vec![script.display().to_string()],
            netns_dir: dir.path().join("netns"),
            ..Default::default()
        };
        PluginNetworkProvisioner::new(&config, json!({"name": "test"}))
    }

    fn record() -> SandboxRecord {
        let config = SandboxConfig {
            metadata: SandboxMetadata {
                name: "nginx".into(),
                namespace: "default".into(),
                uid: "uid".into(),
                attempt: 0,
            },
            annotations: [("team".to_string(), "web".to_string())].into(),
            ..Default::default()
        };
        SandboxRecord::new(SandboxId::generate(), config, 0)
    }

    #[tokio::test]
    async fn test_setup_inspect_teardown() {
        let dir = TempStateDir::new();
        let network = provisioner(&dir, PLUGIN);
        let sandbox = record();

        let handle = network.setup(&sandbox).await.expect("setup");
        assert_eq!(handle.namespace, dir.path().join("netns").join(sandbox.id.as_str()));
        assert_eq!(
            handle.ips,
            vec![
                "10.88.0.5/16".parse::<IpNetwork>().expect("valid"),
                "fd00::5/64".parse::<IpNetwork>().expect("valid"),
            ]
        );
        assert_eq!(
            network.inspect(&sandbox).await.expect("inspect"),
            Some(handle.namespace.clone())
        );

        network.teardown(&sandbox).await.expect("teardown");
        assert_eq!(network.inspect(&sandbox).await.expect("inspect"), None);

        // absent namespaces tear down fine
        network.teardown(&sandbox).await.expect("teardown again");
    }

    #[tokio::test]
    async fn test_plugin_receives_config_and_annotations() {
        let dir = TempStateDir::new();
        let network = provisioner(&dir, PLUGIN);
        let sandbox = record();

        let _ = network.setup(&sandbox).await.expect("setup");

        let stdin = std::fs::read(
            dir.path().join("netns").join(format!("{}.stdin", sandbox.id)),
        )
        .expect("plugin stdin");
        let stdin: Value = serde_json::from_slice(&stdin).expect("json");
        assert_eq!(
            stdin,
            json!({
                "name": "test",
                "runtimeConfig": {
                    "io.aurae.sandbox.annotations": { "team": "web" }
                }
            })
        );
    }

    #[tokio::test]
    async fn test_plugin_failure_is_reported() {
        let dir = TempStateDir::new();
        let network = provisioner(&dir, FAILING_PLUGIN);

        let err = network.setup(&record()).await.expect_err("setup must fail");

        assert!(matches!(err, ClientError::Failed { .. }));
        assert!(err.to_string().contains("no addresses left"));
    }

    #[tokio::test]
    async fn test_missing_plugin_is_io_error() {
        let dir = TempStateDir::new();
        let config = NetworkConfig {
            plugin: dir.path().join("does-not-exist"),
            netns_dir: dir.path().join("netns"),
            ..Default::default()
        };
        let network = PluginNetworkProvisioner::new(&config, json!({}));

        let err = network.setup(&record()).await.expect_err("setup must fail");

        assert!(matches!(err, ClientError::Io { .. }));
    }
}
