//! Light node process lifecycle.
//!
//! A [`NodeLauncher`] turns a [`NodeConfig`] into a running [`NodeHandle`]. The production
//! launcher spawns the node executable, waits until it answers JSON-RPC with the configured
//! network id and only then hands out a handle; on any failure the child is killed so no
//! half-started node outlives the call.

use super::client::{NodeClient, RpcNodeClient};
use super::config::NodeConfig;
use super::types::NodeError;

use backoff::ExponentialBackoff;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// A started node together with the request client bound to it.
pub struct NodeHandle {
    client: Arc<dyn NodeClient>,
    process: Option<Child>,
}

impl NodeHandle {
    pub fn new(client: Arc<dyn NodeClient>, process: Option<Child>) -> Self {
        Self { client, process }
    }

    /// Shared request client for this node.
    pub fn client(&self) -> Arc<dyn NodeClient> {
        self.client.clone()
    }

    /// OS process id of the node, if this handle owns a process.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    /// Stop the node process, if this handle owns one.
    pub async fn shutdown(mut self) -> Result<(), NodeError> {
        if let Some(mut child) = self.process.take() {
            info!("Stopping node process {:?}", child.id());
            child.kill().await?;
        }
        Ok(())
    }
}

/// Starts nodes.
#[async_trait::async_trait]
pub trait NodeLauncher: Send + Sync {
    /// Launch a node and wait until it is ready to serve requests.
    ///
    /// Every failure is reported as `NodeError::StartFailed`.
    async fn launch(&self, config: &NodeConfig) -> Result<NodeHandle, NodeError>;
}

/// Launches the node executable named in the config as a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Write the bundled genesis and initialize the chain database with it.
    async fn init_data_dir(&self, config: &NodeConfig) -> Result<(), NodeError> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| {
                NodeError::StartFailed(format!(
                    "failed to create node data directory {}: {e}",
                    config.data_dir.display()
                ))
            })?;

        let genesis_path = config.genesis_path();
        tokio::fs::write(&genesis_path, &config.genesis)
            .await
            .map_err(|e| NodeError::StartFailed(format!("failed to write genesis: {e}")))?;

        let status = Command::new(&config.executable)
            .arg("--datadir")
            .arg(&config.data_dir)
            .arg("init")
            .arg(&genesis_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                NodeError::StartFailed(format!(
                    "failed to run {}: {e}",
                    config.executable.display()
                ))
            })?;

        if !status.success() {
            return Err(NodeError::StartFailed(format!(
                "genesis initialization failed: {}",
                describe_exit(Ok(status))
            )));
        }

        debug!("Initialized node data directory {}", config.data_dir.display());
        Ok(())
    }

    fn node_command(&self, config: &NodeConfig) -> Command {
        let mut command = Command::new(&config.executable);
        command
            .arg("--datadir")
            .arg(&config.data_dir)
            .arg("--networkid")
            .arg(config.network_id.to_string())
            .arg("--syncmode")
            .arg("light")
            .arg("--bootnodes")
            .arg(config.bootstrap_nodes.join(","))
            .arg("--ethstats")
            .arg(&config.eth_stats)
            .arg("--http")
            .arg("--http.addr")
            .arg("127.0.0.1")
            .arg("--http.port")
            .arg(config.http_port.to_string())
            .arg("--http.api")
            .arg("eth,net")
            .arg("--ws")
            .arg("--ws.addr")
            .arg("127.0.0.1")
            .arg("--ws.port")
            .arg(config.ws_port.to_string())
            .arg("--ws.api")
            .arg("eth,net")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// Poll the node until it reports `config.network_id`, within `config.startup_timeout`.
async fn wait_until_ready(client: &dyn NodeClient, config: &NodeConfig) -> Result<(), NodeError> {
    let expected = config.network_id;
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(250),
        max_interval: Duration::from_secs(2),
        max_elapsed_time: Some(config.startup_timeout),
        ..ExponentialBackoff::default()
    };

    backoff::future::retry(policy, || async move {
        match client.network_id().await {
            Ok(id) if id == expected => Ok(()),
            Ok(id) => Err(backoff::Error::permanent(NodeError::StartFailed(format!(
                "node reports network {id}, expected {expected}"
            )))),
            Err(e) => {
                debug!("Node not ready yet: {}", e);
                Err(backoff::Error::transient(e))
            }
        }
    })
    .await
    .map_err(|e| match e {
        NodeError::StartFailed(_) => e,
        other => NodeError::StartFailed(format!("node did not become ready: {other}")),
    })
}

fn describe_exit(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => e.to_string(),
    }
}

#[async_trait::async_trait]
impl NodeLauncher for ProcessLauncher {
    async fn launch(&self, config: &NodeConfig) -> Result<NodeHandle, NodeError> {
        config.validate()?;
        self.init_data_dir(config).await?;

        let mut child = self.node_command(config).spawn().map_err(|e| {
            NodeError::StartFailed(format!(
                "failed to spawn {}: {e}",
                config.executable.display()
            ))
        })?;
        info!("Spawned node process {:?}", child.id());

        let client = match RpcNodeClient::new(config.rpc_url(), config.ws_url()) {
            Ok(client) => client,
            Err(e) => {
                if let Err(kill_err) = child.kill().await {
                    warn!("Failed to kill node process: {}", kill_err);
                }
                return Err(NodeError::StartFailed(e.to_string()));
            }
        };

        let ready = tokio::select! {
            status = child.wait() => Err(NodeError::StartFailed(format!(
                "node process exited during startup: {}",
                describe_exit(status)
            ))),
            result = wait_until_ready(&client, config) => result,
        };

        if let Err(e) = ready {
            if let Err(kill_err) = child.kill().await {
                debug!("Node process already gone: {}", kill_err);
            }
            return Err(e);
        }

        info!("Node ready at {}", client.rpc_url());
        Ok(NodeHandle::new(Arc::new(client), Some(child)))
    }
}
