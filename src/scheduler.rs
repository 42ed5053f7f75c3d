//! Capacity index and disk scheduler.
//!
//! [`CapacityIndex`] is a projection over the AvailableCapacity records
//! grouped by node, rebuilt from the store for every scheduling decision.
//! [`CapacityIndex::choose`] is a pure function picking the disk a new
//! volume will consume; the orchestrator mutates the store on its return
//! value.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{AvailableCapacityRecord, NodeId};

/// Free capacity grouped by node.
#[derive(Debug, Default)]
pub struct CapacityIndex {
    by_node: HashMap<NodeId, Vec<AvailableCapacityRecord>>,
}

impl CapacityIndex {
    /// Group `records` by their owning node.
    #[must_use]
    pub fn from_records(records: Vec<AvailableCapacityRecord>) -> Self {
        let mut by_node: HashMap<NodeId, Vec<AvailableCapacityRecord>> = HashMap::new();
        for record in records {
            by_node.entry(record.node_id.clone()).or_default().push(record);
        }
        Self { by_node }
    }

    /// Whether the index holds no capacity at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    /// Pick the disk for a new volume.
    ///
    /// With no preferred node, the node with the greatest number of free
    /// disks is selected; ties break by map iteration order, which is not
    /// stable across runs.  Within the chosen node the smallest disk with
    /// `size_bytes >= required_bytes` wins (best-fit).  Returns `None` when
    /// no candidate exists.
    #[must_use]
    pub fn choose(
        &self,
        preferred_node: Option<&NodeId>,
        required_bytes: u64,
    ) -> Option<&AvailableCapacityRecord> {
        let node = match preferred_node {
            Some(node) => node,
            None => {
                self.by_node
                    .iter()
                    .max_by_key(|(_, records)| records.len())
                    .map(|(node, _)| node)?
            }
        };

        let chosen = self
            .by_node
            .get(node)?
            .iter()
            .filter(|ac| ac.size_bytes >= required_bytes)
            .min_by_key(|ac| ac.size_bytes);

        match chosen {
            Some(ac) => debug!(
                node = %ac.node_id,
                location = %ac.location,
                size_bytes = ac.size_bytes,
                required_bytes,
                "disk selected",
            ),
            None => debug!(node = %node, required_bytes, "no disk fits on selected node"),
        }
        chosen
    }
}
