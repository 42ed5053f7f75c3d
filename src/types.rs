//! Core data model: volume and capacity records, requests, and topology.
//!
//! These types form the data model shared by the orchestrator, the request
//! surface, the agent RPC layer, and the object store gateway.  They are all
//! [`Serialize`]/[`Deserialize`] so they can be persisted as store records
//! and transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Topology key advertised by the controller and used as the accessibility
/// segment key; its value is the owning node's identifier.
pub const NODE_ID_TOPOLOGY_KEY: &str = "metalcsi/nodeid";

/// Annotation carrying the textual form of a volume's status for external
/// consumers.
pub const VOLUME_STATUS_ANNOTATION_KEY: &str = "metalcsi/volume-status";

/// Storage class requested from node agents when creating local volumes.
pub const STORAGE_CLASS_HDD: &str = "hdd";

/// Storage class assigned to capacity reinstated after a volume deletion.
pub const STORAGE_CLASS_ANY: &str = "ANY";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.  Equals the client-supplied
/// request name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a cluster node hosting a volume agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Volume record
// ---------------------------------------------------------------------------

/// Lifecycle status of a volume record.
///
/// Progresses monotonically along `Creating -> {Created, FailedToCreate}`
/// and `Created -> Removing -> Removed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeStatus {
    /// Reservation persisted, local volume creation in flight.
    Creating,
    /// The node agent acknowledged local volume creation.
    Created,
    /// Local volume creation failed or timed out.  Terminal; recovery is a
    /// subsequent DeleteVolume.
    FailedToCreate,
    /// Local volume deletion in flight.
    Removing,
    /// Local volume removed.
    Removed,
}

impl VolumeStatus {
    /// Textual form stored in the status annotation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Created => "Created",
            Self::FailedToCreate => "FailedToCreate",
            Self::Removing => "Removing",
            Self::Removed => "Removed",
        }
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a provisioned (or in-flight) logical volume bound to
/// one disk.
///
/// `owner_node_id` and `location` are fixed at creation and never rewritten;
/// `size_bytes` equals the size of the AvailableCapacity the volume
/// consumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeRecord {
    /// Volume identifier, equal to the request name.
    pub id: VolumeId,
    /// Node on which the backing disk lives.
    pub owner_node_id: NodeId,
    /// Provisioned size, the size of the consumed capacity record.
    pub size_bytes: u64,
    /// Opaque disk identifier on the owner node.
    pub location: String,
    /// Current lifecycle status.  Mutate through [`VolumeRecord::set_status`]
    /// so the status annotation stays in sync.
    pub status: VolumeStatus,
    /// Free-form annotations; carries the textual status mirror.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl VolumeRecord {
    /// Build a fresh record in the `Creating` state with the status
    /// annotation already set.
    #[must_use]
    pub fn new(id: VolumeId, owner_node_id: NodeId, size_bytes: u64, location: String) -> Self {
        let mut record = Self {
            id,
            owner_node_id,
            size_bytes,
            location,
            status: VolumeStatus::Creating,
            annotations: HashMap::new(),
        };
        record.set_status(VolumeStatus::Creating);
        record
    }

    /// Set the status enum and rewrite the textual annotation together.
    /// This is the only mutation path for volume status.
    pub fn set_status(&mut self, status: VolumeStatus) {
        self.status = status;
        self.annotations.insert(
            VOLUME_STATUS_ANNOTATION_KEY.to_owned(),
            status.as_str().to_owned(),
        );
    }
}

// ---------------------------------------------------------------------------
// Available capacity record
// ---------------------------------------------------------------------------

/// Durable record of one currently-free physical disk on one node.
///
/// Exactly one record exists per free disk; it disappears when reserved for
/// a volume and reappears when the volume is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableCapacityRecord {
    /// Node the disk is attached to.
    pub node_id: NodeId,
    /// Opaque disk identifier on that node (e.g. a drive serial number).
    pub location: String,
    /// Usable size of the disk in bytes.
    pub size_bytes: u64,
    /// Opaque storage class tag.
    pub storage_class: String,
}

impl AvailableCapacityRecord {
    /// Store key for this record: `node_id + "-" + lowercase(location)`.
    #[must_use]
    pub fn key(&self) -> String {
        capacity_key(&self.node_id, &self.location)
    }
}

/// Store key for a capacity record on `node_id` backed by `location`.
#[must_use]
pub fn capacity_key(node_id: &NodeId, location: &str) -> String {
    format!("{}-{}", node_id, location.to_lowercase())
}

// ---------------------------------------------------------------------------
// Capacity reservation record
// ---------------------------------------------------------------------------

/// Lifecycle status of a capacity reservation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReservationStatus {
    /// Placement requested, no decision yet.
    Requested,
    /// Capacity reserved on the listed nodes.
    Confirmed,
    /// No node can satisfy the requests.
    Rejected,
    /// Reservation withdrawn by an external actor.  Terminal; never set by
    /// this crate.
    Cancelled,
}

impl ReservationStatus {
    /// Textual form of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "Requested",
            Self::Confirmed => "Confirmed",
            Self::Rejected => "Rejected",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One storage demand of a workload being placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityRequest {
    /// Name of the requesting volume claim.
    pub name: String,
    /// Storage class the demand must be satisfied from;
    /// [`STORAGE_CLASS_ANY`] matches every disk.
    pub storage_class: String,
    /// Minimum usable size in bytes.
    pub size_bytes: u64,
}

/// Durable record of a placement decision for one workload, keyed by
/// `namespace + "-" + workload name`.
///
/// Written by the placement extension when the orchestrator's scheduler
/// asks where a workload's volumes can land; honored on repeated filter
/// calls so the decision is stable across scheduling retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityReservationRecord {
    /// Record name (the reservation key).
    pub name: String,
    /// Decision status.
    pub status: ReservationStatus,
    /// Nodes the placement was requested for.
    pub requested_nodes: Vec<NodeId>,
    /// Nodes the capacity was reserved on (when confirmed).
    pub reserved_nodes: Vec<NodeId>,
    /// The storage demands the decision covers.
    pub requests: Vec<CapacityRequest>,
}

/// Store key for the reservation of `workload` in `namespace`; an empty
/// namespace falls back to `default`.
#[must_use]
pub fn reservation_key(namespace: &str, workload: &str) -> String {
    let namespace = if namespace.is_empty() { "default" } else { namespace };
    format!("{namespace}-{workload}")
}

// ---------------------------------------------------------------------------
// Capabilities & topology
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type the volume will be formatted with.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

fn default_fs_type() -> String {
    "ext4".to_owned()
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteOnce,
            mount_flags: Vec::new(),
            fs_type: default_fs_type(),
        }
    }
}

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    /// Topology segments, e.g. `{"metalcsi/nodeid": "node-01"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

impl Topology {
    /// Topology pinning a volume to a single node.
    #[must_use]
    pub fn node(node_id: &NodeId) -> Self {
        Self {
            segments: HashMap::from([(
                NODE_ID_TOPOLOGY_KEY.to_owned(),
                node_id.0.clone(),
            )]),
        }
    }
}

/// Accessibility requirements attached to a create request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyRequirement {
    /// Topologies the caller prefers, most preferred first.
    #[serde(default)]
    pub preferred: Vec<Topology>,
}

/// Capabilities advertised by the controller service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    /// CreateVolume / DeleteVolume.
    CreateDeleteVolume,
    /// ControllerPublishVolume / ControllerUnpublishVolume.
    PublishUnpublishVolume,
}

// ---------------------------------------------------------------------------
// Requests & responses
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Client-supplied request name, unique per namespace.
    pub name: String,
    /// Minimum usable size in bytes.
    pub required_bytes: u64,
    /// Required capabilities.  Must be non-empty.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Arbitrary parameters echoed back in the response context.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Placement preferences from the orchestrator.
    #[serde(default)]
    pub accessibility_requirements: Option<TopologyRequirement>,
}

impl CreateVolumeRequest {
    /// Preferred node from the first accessibility topology, if one names
    /// a node.
    #[must_use]
    pub fn preferred_node(&self) -> Option<NodeId> {
        self.accessibility_requirements
            .as_ref()
            .and_then(|req| req.preferred.first())
            .and_then(|topology| topology.segments.get(NODE_ID_TOPOLOGY_KEY))
            .filter(|node| !node.is_empty())
            .map(|node| NodeId(node.clone()))
    }
}

/// Response payload for a successfully created volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedVolume {
    /// The volume identifier (equals the request name).
    pub volume_id: VolumeId,
    /// Provisioned capacity, the size of the consumed disk.
    pub capacity_bytes: u64,
    /// Opaque context forwarded to subsequent node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Where the volume is reachable: a single segment naming the owner.
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

// ---------------------------------------------------------------------------
// Agent-reported payloads
// ---------------------------------------------------------------------------

/// One line of a node agent's free-disk inventory report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityEntry {
    /// Reporting node.
    pub node_id: NodeId,
    /// Disk identifier on that node.
    pub location: String,
    /// Usable size in bytes.
    pub size_bytes: u64,
    /// Storage class tag of the disk.
    pub storage_class: String,
}

/// Metadata a node agent returns for a locally deleted volume, used to
/// reinstate the freed capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletedLocalVolume {
    /// Size of the freed disk in bytes.
    pub size_bytes: u64,
    /// Disk identifier the volume occupied.
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_key_lowercases_location() {
        let ac = AvailableCapacityRecord {
            node_id: "node-1".into(),
            location: "SN-ABC123".into(),
            size_bytes: 1024,
            storage_class: STORAGE_CLASS_ANY.into(),
        };
        assert_eq!(ac.key(), "node-1-sn-abc123");
    }

    #[test]
    fn set_status_keeps_annotation_in_sync() {
        let mut v = VolumeRecord::new("v1".into(), "node-1".into(), 1024, "sda".into());
        assert_eq!(
            v.annotations.get(VOLUME_STATUS_ANNOTATION_KEY).map(String::as_str),
            Some("Creating")
        );

        v.set_status(VolumeStatus::Created);
        assert_eq!(v.status, VolumeStatus::Created);
        assert_eq!(
            v.annotations.get(VOLUME_STATUS_ANNOTATION_KEY).map(String::as_str),
            Some("Created")
        );
    }

    #[test]
    fn volume_record_serde_roundtrip() {
        let v = VolumeRecord::new("v1".into(), "node-1".into(), 50 << 30, "sda".into());
        let json = serde_json::to_string(&v).expect("serialize");
        let de: VolumeRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(de, v);
    }

    #[test]
    fn preferred_node_from_topology() {
        let mut req = CreateVolumeRequest {
            name: "v1".into(),
            required_bytes: 1024,
            ..Default::default()
        };
        assert_eq!(req.preferred_node(), None);

        req.accessibility_requirements = Some(TopologyRequirement {
            preferred: vec![Topology::node(&"node-2".into())],
        });
        assert_eq!(req.preferred_node(), Some("node-2".into()));
    }

    #[test]
    fn reservation_key_defaults_namespace() {
        assert_eq!(reservation_key("mynamespace", "mypod-0"), "mynamespace-mypod-0");
        assert_eq!(reservation_key("", "mypod-0"), "default-mypod-0");
    }

    #[test]
    fn preferred_node_ignores_empty_segment() {
        let req = CreateVolumeRequest {
            name: "v1".into(),
            accessibility_requirements: Some(TopologyRequirement {
                preferred: vec![Topology {
                    segments: HashMap::from([(NODE_ID_TOPOLOGY_KEY.to_owned(), String::new())]),
                }],
            }),
            ..Default::default()
        };
        assert_eq!(req.preferred_node(), None);
    }
}
