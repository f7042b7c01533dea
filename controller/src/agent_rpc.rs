//! Agent RPC client.
//!
//! The reconciler talks to node agents exclusively through this trait so
//! the reconciliation logic is testable without a fleet. The HTTP
//! implementation resolves each node by name (sandbox DNS) on the fixed
//! agent port and treats both transport failures and `success=false`
//! replies as errors — the caller retries on the next tick either way.

use async_trait::async_trait;
use thiserror::Error;

use sim_api::{AgentResponse, FrrConfig, InterfaceConfig, LinkConfig, PositionUpdate, UplinkConfig};

pub const AGENT_PORT: u16 = 5000;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport to {node}: {source}")]
    Transport {
        node: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("agent {node} refused: {message}")]
    Refused { node: String, message: String },
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[async_trait]
pub trait AgentRpc: Send + Sync {
    async fn configure_interface(&self, node: &str, cfg: InterfaceConfig) -> Result<()>;
    async fn configure_link(&self, node: &str, cfg: LinkConfig) -> Result<()>;
    async fn configure_uplink(&self, node: &str, cfg: UplinkConfig) -> Result<()>;
    async fn configure_frr(&self, node: &str, cfg: FrrConfig) -> Result<()>;
    async fn update_position(&self, node: &str, update: PositionUpdate) -> Result<()>;
}

pub struct HttpAgentRpc {
    client: reqwest::Client,
}

impl HttpAgentRpc {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }

    async fn post<T: serde::Serialize>(&self, node: &str, path: &str, body: &T) -> Result<()> {
        let url = format!("http://{}:{}/{}", node, AGENT_PORT, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| RpcError::Transport {
                node: node.to_string(),
                source,
            })?;

        let reply: AgentResponse =
            response
                .json()
                .await
                .map_err(|source| RpcError::Transport {
                    node: node.to_string(),
                    source,
                })?;

        if reply.success {
            Ok(())
        } else {
            Err(RpcError::Refused {
                node: node.to_string(),
                message: reply.error.unwrap_or_else(|| "unspecified".to_string()),
            })
        }
    }
}

#[async_trait]
impl AgentRpc for HttpAgentRpc {
    async fn configure_interface(&self, node: &str, cfg: InterfaceConfig) -> Result<()> {
        self.post(node, "config/interface", &cfg).await
    }

    async fn configure_link(&self, node: &str, cfg: LinkConfig) -> Result<()> {
        self.post(node, "config/link", &cfg).await
    }

    async fn configure_uplink(&self, node: &str, cfg: UplinkConfig) -> Result<()> {
        self.post(node, "config/uplink", &cfg).await
    }

    async fn configure_frr(&self, node: &str, cfg: FrrConfig) -> Result<()> {
        self.post(node, "config/frr", &cfg).await
    }

    async fn update_position(&self, node: &str, update: PositionUpdate) -> Result<()> {
        self.post(node, "config/position", &update).await
    }
}

#[cfg(test)]
pub mod mock {
    //! Recording mock with per-(node, op) failure injection.

    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub enum Op {
        Interface,
        Link,
        Uplink,
        Frr,
        Position,
    }

    #[derive(Debug, Clone)]
    pub struct Call {
        pub node: String,
        pub op: Op,
        pub body: serde_json::Value,
    }

    #[derive(Default)]
    pub struct MockAgentRpc {
        pub calls: Mutex<Vec<Call>>,
        pub failures: Mutex<HashSet<(String, Op)>>,
    }

    impl MockAgentRpc {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_on(&self, node: &str, op: Op) {
            self.failures
                .lock()
                .unwrap()
                .insert((node.to_string(), op));
        }

        pub fn clear_failures(&self) {
            self.failures.lock().unwrap().clear();
        }

        pub fn take_calls(&self) -> Vec<Call> {
            std::mem::take(&mut self.calls.lock().unwrap())
        }

        pub fn count(&self, op: &Op) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| &c.op == op)
                .count()
        }

        fn record<T: serde::Serialize>(&self, node: &str, op: Op, body: &T) -> Result<()> {
            let failing = self
                .failures
                .lock()
                .unwrap()
                .contains(&(node.to_string(), op.clone()));
            self.calls.lock().unwrap().push(Call {
                node: node.to_string(),
                op: op.clone(),
                body: serde_json::to_value(body).unwrap(),
            });
            if failing {
                Err(RpcError::Refused {
                    node: node.to_string(),
                    message: "injected failure".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl AgentRpc for MockAgentRpc {
        async fn configure_interface(&self, node: &str, cfg: InterfaceConfig) -> Result<()> {
            self.record(node, Op::Interface, &cfg)
        }

        async fn configure_link(&self, node: &str, cfg: LinkConfig) -> Result<()> {
            self.record(node, Op::Link, &cfg)
        }

        async fn configure_uplink(&self, node: &str, cfg: UplinkConfig) -> Result<()> {
            self.record(node, Op::Uplink, &cfg)
        }

        async fn configure_frr(&self, node: &str, cfg: FrrConfig) -> Result<()> {
            self.record(node, Op::Frr, &cfg)
        }

        async fn update_position(&self, node: &str, update: PositionUpdate) -> Result<()> {
            self.record(node, Op::Position, &update)
        }
    }
}
