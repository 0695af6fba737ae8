//! Shared test utilities for buoy-cp integration tests.

use async_trait::async_trait;
use buoy_cp::flow::{FlowConfig, FlowRule};
use buoy_cp::manager::Manager;
use buoy_cp::openflow::ControlChannel;
use buoy_cp::rest::{AppState, create_router};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// A [`ControlChannel`] that records what would have been sent.
#[derive(Default)]
pub struct RecordingChannel {
    flows: Mutex<Vec<FlowRule>>,
    table_mods: Mutex<Vec<bool>>,
}

impl RecordingChannel {
    pub fn flows(&self) -> Vec<FlowRule> {
        self.flows.lock().unwrap().clone()
    }

    pub fn table_mods(&self) -> Vec<bool> {
        self.table_mods.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlChannel for RecordingChannel {
    async fn add_flow(&self, rule: &FlowRule) -> io::Result<()> {
        self.flows.lock().unwrap().push(rule.clone());
        Ok(())
    }

    async fn enable_flow_mod_table_id(&self, enable: bool) -> io::Result<()> {
        self.table_mods.lock().unwrap().push(enable);
        Ok(())
    }
}

/// Test server wrapper around a spawned REST API.
pub struct TestServer {
    pub addr: String,
    pub client: reqwest::Client,
    pub manager: Arc<Manager>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawn the REST API on an ephemeral port with a fresh manager.
    pub async fn spawn() -> Self {
        let manager = Arc::new(Manager::new(FlowConfig::default()));
        let app_state = Arc::new(AppState {
            manager: manager.clone(),
        });
        let router = create_router(app_state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server failed");
        });

        TestServer {
            addr: format!("http://{addr}"),
            client: reqwest::Client::new(),
            manager,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
