//! Node-agent RPC surface consumed by the controller.
//!
//! Each node runs a volume agent that performs the local disk work.  The
//! controller talks to it over QUIC bi-directional streams carrying
//! JSON-serialized [`AgentMessage`] envelopes: one request, one response
//! per stream.  [`VolumeAgent`] is the trait seam the orchestrator depends
//! on; [`AgentClient`] is the QUIC implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use quinn::crypto::rustls::QuicClientConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::ControllerError;
use crate::types::{CapacityEntry, DeletedLocalVolume, NodeId, VolumeId};

/// Request to create a volume on a specific local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLocalVolumeRequest {
    /// Volume identifier (the request name).
    pub volume_id: VolumeId,
    /// Requested usable capacity in bytes.
    pub capacity_bytes: u64,
    /// Storage class to provision from.
    pub storage_class: String,
    /// Disk the capacity was reserved on.
    pub location: String,
}

/// Outcome of a local volume deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteLocalVolumeResult {
    /// Whether the agent performed the deletion.
    pub ok: bool,
    /// Metadata of the freed disk, present when `ok` is true.
    pub volume: Option<DeletedLocalVolume>,
}

/// Message envelope for agent RPCs over QUIC.
///
/// The controller sends a *request* variant and the agent replies with the
/// corresponding *response* variant (or [`AgentMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentMessage {
    // ----- Requests --------------------------------------------------------
    /// Report the node's free-disk inventory.
    GetAvailableCapacity {
        /// Node being asked about.
        node_id: NodeId,
    },
    /// Create a volume on a local disk.
    CreateLocalVolume(CreateLocalVolumeRequest),
    /// Delete a local volume and report the freed disk.
    DeleteLocalVolume {
        /// Volume to delete.
        volume_id: VolumeId,
    },

    // ----- Responses -------------------------------------------------------
    /// Free-disk inventory.
    CapacityReport(Vec<CapacityEntry>),
    /// Result of a deletion.
    VolumeDeleted(DeleteLocalVolumeResult),
    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred on the agent side.
    Error(String),
}

impl std::fmt::Display for AgentMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GetAvailableCapacity { node_id } => {
                write!(f, "GetAvailableCapacity({node_id})")
            }
            Self::CreateLocalVolume(req) => write!(f, "CreateLocalVolume({})", req.volume_id),
            Self::DeleteLocalVolume { volume_id } => write!(f, "DeleteLocalVolume({volume_id})"),
            Self::CapacityReport(entries) => write!(f, "CapacityReport(count={})", entries.len()),
            Self::VolumeDeleted(result) => write!(f, "VolumeDeleted(ok={})", result.ok),
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}

/// Per-node volume agent contract.
#[async_trait]
pub trait VolumeAgent: Send + Sync {
    /// Report the free-disk inventory of `node_id`.
    async fn get_available_capacity(
        &self,
        node_id: &NodeId,
    ) -> Result<Vec<CapacityEntry>, ControllerError>;

    /// Create a volume on the disk named in the request.
    async fn create_local_volume(
        &self,
        req: CreateLocalVolumeRequest,
    ) -> Result<(), ControllerError>;

    /// Delete the local volume and return the freed disk's metadata.
    async fn delete_local_volume(
        &self,
        volume_id: &VolumeId,
    ) -> Result<DeleteLocalVolumeResult, ControllerError>;
}

// ---------------------------------------------------------------------------
// QUIC client
// ---------------------------------------------------------------------------

/// QUIC client for one node agent.
pub struct AgentClient {
    connection: quinn::Connection,
}

impl AgentClient {
    /// Establish a new QUIC connection to the agent at `addr`.
    ///
    /// * `addr` — socket address of the agent
    /// * `server_name` — TLS SNI name that must match a SAN in the agent's
    ///   certificate
    /// * `tls_config` — client TLS configuration
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, ControllerError> {
        let quic_client_config = QuicClientConfig::try_from(tls_config)
            .map_err(|e| ControllerError::Transport(format!("invalid TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

        let mut endpoint = quinn::Endpoint::client("0.0.0.0:0".parse().unwrap())
            .map_err(ControllerError::transport)?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(ControllerError::transport)?
            .await
            .map_err(ControllerError::transport)?;

        debug!(%addr, %server_name, "agent QUIC connection established");
        Ok(Self { connection })
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Each call opens a new bi-directional QUIC stream, writes the
    /// JSON-serialized request, finishes the send side, then reads the full
    /// response and deserializes it.
    #[instrument(skip(self), fields(msg = %msg))]
    async fn request(&self, msg: &AgentMessage) -> Result<AgentMessage, ControllerError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(ControllerError::transport)?;

        let payload = serde_json::to_vec(msg).map_err(ControllerError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(ControllerError::transport)?;
        send.finish().map_err(ControllerError::transport)?;

        let buf = recv
            .read_to_end(16 * 1024 * 1024) // 16 MiB upper bound
            .await
            .map_err(ControllerError::transport)?;

        let response: AgentMessage =
            serde_json::from_slice(&buf).map_err(ControllerError::transport)?;
        debug!(%response, "agent response received");
        Ok(response)
    }

    /// Close the underlying QUIC connection gracefully.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"controller shutdown");
    }
}

#[async_trait]
impl VolumeAgent for AgentClient {
    async fn get_available_capacity(
        &self,
        node_id: &NodeId,
    ) -> Result<Vec<CapacityEntry>, ControllerError> {
        let request = AgentMessage::GetAvailableCapacity {
            node_id: node_id.clone(),
        };
        match self.request(&request).await? {
            AgentMessage::CapacityReport(entries) => Ok(entries),
            AgentMessage::Error(e) => Err(ControllerError::Internal(e)),
            other => Err(ControllerError::Transport(format!(
                "unexpected agent response: {other}"
            ))),
        }
    }

    async fn create_local_volume(
        &self,
        req: CreateLocalVolumeRequest,
    ) -> Result<(), ControllerError> {
        match self.request(&AgentMessage::CreateLocalVolume(req)).await? {
            AgentMessage::Ok => Ok(()),
            AgentMessage::Error(e) => Err(ControllerError::Internal(e)),
            other => Err(ControllerError::Transport(format!(
                "unexpected agent response: {other}"
            ))),
        }
    }

    async fn delete_local_volume(
        &self,
        volume_id: &VolumeId,
    ) -> Result<DeleteLocalVolumeResult, ControllerError> {
        let request = AgentMessage::DeleteLocalVolume {
            volume_id: volume_id.clone(),
        };
        match self.request(&request).await? {
            AgentMessage::VolumeDeleted(result) => Ok(result),
            AgentMessage::Error(e) => Err(ControllerError::Internal(e)),
            other => Err(ControllerError::Transport(format!(
                "unexpected agent response: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serde_roundtrip() {
        let msg = AgentMessage::CreateLocalVolume(CreateLocalVolumeRequest {
            volume_id: "v1".into(),
            capacity_bytes: 1024,
            storage_class: "hdd".into(),
            location: "sda".into(),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: AgentMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, AgentMessage::CreateLocalVolume(_)));
    }

    #[test]
    fn delete_result_roundtrip() {
        let msg = AgentMessage::VolumeDeleted(DeleteLocalVolumeResult {
            ok: true,
            volume: Some(DeletedLocalVolume {
                size_bytes: 50 << 30,
                location: "sda".into(),
            }),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        match serde_json::from_str(&json).expect("deserialize") {
            AgentMessage::VolumeDeleted(result) => {
                assert!(result.ok);
                assert_eq!(result.volume.unwrap().location, "sda");
            }
            other => panic!("unexpected variant: {other}"),
        }
    }

    #[test]
    fn display_formatting() {
        let msg = AgentMessage::DeleteLocalVolume {
            volume_id: "v1".into(),
        };
        assert_eq!(msg.to_string(), "DeleteLocalVolume(v1)");
        assert_eq!(AgentMessage::Ok.to_string(), "Ok");
    }
}
