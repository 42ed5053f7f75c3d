//! Orchestrator-facing protocol messages.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the workload orchestrator and the controller
//! over QUIC bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::error::ControllerError;
use crate::types::{
    ControllerCapability, CreateVolumeRequest, CreatedVolume, NodeId, VolumeCapability, VolumeId,
};

/// Top-level message envelope for the controller surface.
///
/// Each QUIC bi-stream carries exactly one request followed by one
/// response.  The orchestrator sends a *request* variant and the controller
/// replies with the corresponding *response* variant (or
/// [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Provision a new volume.
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume.
    DeleteVolume {
        /// Volume to delete.
        volume_id: VolumeId,
    },
    /// Attach a volume to a node.
    PublishVolume {
        /// Volume to attach.
        volume_id: VolumeId,
        /// Target node.
        node_id: NodeId,
    },
    /// Detach a volume from a node.
    UnpublishVolume {
        /// Volume to detach.
        volume_id: VolumeId,
        /// Node it was attached to.
        node_id: NodeId,
    },
    /// Query the controller's capabilities.
    GetCapabilities,

    // Surfaces outside this controller's scope.  They are part of the
    // envelope so callers get a structured Unimplemented answer instead of
    // a decode failure.
    /// Check capability compatibility (unimplemented).
    ValidateVolumeCapabilities {
        /// Volume to check.
        volume_id: VolumeId,
        /// Capabilities to validate.
        capabilities: Vec<VolumeCapability>,
    },
    /// List all volumes (unimplemented).
    ListVolumes,
    /// Query remaining capacity (unimplemented).
    GetCapacity,
    /// Create a snapshot (unimplemented).
    CreateSnapshot {
        /// Snapshot name.
        name: String,
        /// Volume to snapshot.
        source_volume_id: VolumeId,
    },
    /// Delete a snapshot (unimplemented).
    DeleteSnapshot {
        /// Snapshot to delete.
        snapshot_id: String,
    },
    /// List snapshots (unimplemented).
    ListSnapshots,
    /// Grow a volume (unimplemented).
    ExpandVolume {
        /// Volume to grow.
        volume_id: VolumeId,
        /// New minimum size in bytes.
        required_bytes: u64,
    },

    // ----- Responses -------------------------------------------------------
    /// A volume was successfully created.
    VolumeCreated(CreatedVolume),
    /// The controller's capabilities.
    Capabilities(Vec<ControllerCapability>),
    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(ControllerError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume { volume_id } => write!(f, "DeleteVolume({volume_id})"),
            Self::PublishVolume { volume_id, node_id } => {
                write!(f, "PublishVolume({volume_id} -> {node_id})")
            }
            Self::UnpublishVolume { volume_id, node_id } => {
                write!(f, "UnpublishVolume({volume_id} -> {node_id})")
            }
            Self::GetCapabilities => f.write_str("GetCapabilities"),
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({volume_id})")
            }
            Self::ListVolumes => f.write_str("ListVolumes"),
            Self::GetCapacity => f.write_str("GetCapacity"),
            Self::CreateSnapshot { name, .. } => write!(f, "CreateSnapshot({name})"),
            Self::DeleteSnapshot { snapshot_id } => write!(f, "DeleteSnapshot({snapshot_id})"),
            Self::ListSnapshots => f.write_str("ListSnapshots"),
            Self::ExpandVolume { volume_id, .. } => write!(f, "ExpandVolume({volume_id})"),
            Self::VolumeCreated(volume) => write!(f, "VolumeCreated({})", volume.volume_id),
            Self::Capabilities(caps) => write!(f, "Capabilities(count={})", caps.len()),
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serde_roundtrip() {
        let msg = CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "test".into(),
            required_bytes: 1024,
            volume_capabilities: vec![VolumeCapability::default()],
            ..Default::default()
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::CreateVolume(_)));
    }

    #[test]
    fn error_message_roundtrip() {
        let msg = CsiMessage::Error(ControllerError::NoCapacity("v1".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(ControllerError::NoCapacity(_))));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(CsiMessage::ListVolumes.to_string(), "ListVolumes");
        let msg = CsiMessage::DeleteVolume {
            volume_id: "v1".into(),
        };
        assert_eq!(msg.to_string(), "DeleteVolume(v1)");
    }
}
