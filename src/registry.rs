//! Node-agent discovery and the `NodeId -> client` registry.
//!
//! Agent pods are recognized by a fixed substring in their name; the agent
//! endpoint is `pod_ip:agent_port`.  The registry is populated once at
//! controller init and read-only afterwards; re-running
//! [`AgentRegistry::init`] is the recovery mechanism.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::agent::{AgentClient, VolumeAgent};
use crate::config::CONFIG;
use crate::error::ControllerError;
use crate::types::NodeId;

/// Substring identifying node-agent pods.
pub const NODE_AGENT_MASK: &str = "metalcsi-node";

/// One pod as reported by the discovery backend.
#[derive(Debug, Clone)]
pub struct PodInfo {
    /// Pod name.
    pub name: String,
    /// Name of the node the pod runs on.
    pub node_name: String,
    /// Pod IP address.
    pub pod_ip: IpAddr,
}

/// Discovery contract: list the pods of a namespace.
#[async_trait]
pub trait PodLister: Send + Sync {
    /// List every pod in `namespace`.
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodInfo>, ControllerError>;
}

/// Mapping from node id to its volume agent client.
pub struct AgentRegistry {
    agents: HashMap<NodeId, Arc<dyn VolumeAgent>>,
}

impl AgentRegistry {
    /// Discover agent pods in `namespace` and open a client to each.
    ///
    /// Pods whose name does not contain [`NODE_AGENT_MASK`] are ignored.
    /// Individual connection failures are logged and skipped; zero reachable
    /// agents is a fatal error.
    pub async fn init(
        lister: &dyn PodLister,
        namespace: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, ControllerError> {
        let pods = lister.list_pods(namespace).await?;
        let agent_pods: Vec<_> = pods
            .into_iter()
            .filter(|pod| pod.name.contains(NODE_AGENT_MASK))
            .collect();
        info!(count = agent_pods.len(), "found pods with node agent service");

        let mut agents: HashMap<NodeId, Arc<dyn VolumeAgent>> = HashMap::new();
        for pod in agent_pods {
            let endpoint = SocketAddr::new(pod.pod_ip, CONFIG.agent_port);
            match AgentClient::connect(endpoint, &CONFIG.agent_server_name, tls_config.clone())
                .await
            {
                Ok(client) => {
                    info!(node = %pod.node_name, %endpoint, "added agent client");
                    agents.insert(NodeId(pod.node_name), Arc::new(client));
                }
                Err(e) => {
                    warn!(pod = %pod.name, %endpoint, error = %e, "unable to connect to node agent");
                }
            }
        }

        if agents.is_empty() {
            return Err(ControllerError::Internal(
                "unable to initialize clients for node agents".to_owned(),
            ));
        }
        Ok(Self { agents })
    }

    /// Build a registry from pre-connected clients.
    #[must_use]
    pub fn from_clients(agents: HashMap<NodeId, Arc<dyn VolumeAgent>>) -> Self {
        Self { agents }
    }

    /// The agent client for `node_id`, if one was discovered.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<Arc<dyn VolumeAgent>> {
        self.agents.get(node_id).cloned()
    }

    /// Iterate over every registered `(node, client)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Arc<dyn VolumeAgent>)> + '_ {
        self.agents.iter()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{CreateLocalVolumeRequest, DeleteLocalVolumeResult};
    use crate::types::{CapacityEntry, VolumeId};

    struct NoopAgent;

    #[async_trait]
    impl VolumeAgent for NoopAgent {
        async fn get_available_capacity(
            &self,
            _node_id: &NodeId,
        ) -> Result<Vec<CapacityEntry>, ControllerError> {
            Ok(Vec::new())
        }

        async fn create_local_volume(
            &self,
            _req: CreateLocalVolumeRequest,
        ) -> Result<(), ControllerError> {
            Ok(())
        }

        async fn delete_local_volume(
            &self,
            _volume_id: &VolumeId,
        ) -> Result<DeleteLocalVolumeResult, ControllerError> {
            Ok(DeleteLocalVolumeResult {
                ok: true,
                volume: None,
            })
        }
    }

    #[test]
    fn lookup_by_node() {
        let mut clients: HashMap<NodeId, Arc<dyn VolumeAgent>> = HashMap::new();
        clients.insert("node-1".into(), Arc::new(NoopAgent));
        let registry = AgentRegistry::from_clients(clients);

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&"node-1".into()).is_some());
        assert!(registry.get(&"node-2".into()).is_none());
    }
}
