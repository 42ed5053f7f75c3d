//! Placement extension for the orchestrator's scheduler.
//!
//! When the orchestrator schedules a workload whose volumes this
//! provisioner will back, it asks the controller which nodes can satisfy
//! the workload's storage demands (*filter*) and how to rank the survivors
//! (*prioritize*).  The decision is persisted as a CapacityReservation
//! record so repeated filter calls for the same workload return the same
//! answer, even after free capacity changed in between.
//!
//! The extension only reads AvailableCapacity records; it never consumes
//! them.  Actual reservation of a disk happens later, inside CreateVolume.

use std::collections::HashMap;

use tracing::{debug, info, instrument};

use crate::error::ControllerError;
use crate::store::StoreGateway;
use crate::types::{
    reservation_key, AvailableCapacityRecord, CapacityRequest, CapacityReservationRecord, NodeId,
    ReservationStatus, STORAGE_CLASS_ANY,
};

/// Result of a filter pass: candidates split into nodes that can host the
/// workload's volumes and nodes that cannot.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Nodes able to satisfy every capacity request.
    pub matched: Vec<NodeId>,
    /// Candidates that were ruled out.
    pub failed: Vec<NodeId>,
}

/// Scheduler extension over the shared object store.
pub struct PlacementExtender {
    gateway: StoreGateway,
}

impl PlacementExtender {
    /// Build an extension over the given store gateway.
    #[must_use]
    pub fn new(gateway: StoreGateway) -> Self {
        Self { gateway }
    }

    /// Split `nodes` into those that can satisfy all of `requests` and
    /// those that cannot, honoring a previously persisted decision.
    ///
    /// With no requests every candidate matches and nothing is persisted.
    /// Otherwise the decision is recorded under
    /// `reservation_key(namespace, workload)` with status `Confirmed` (some
    /// nodes fit) or `Rejected` (none do); a pre-existing `Requested`
    /// record is decided in place, and a `Cancelled` one is an error.
    #[instrument(skip(self, nodes, requests))]
    pub async fn filter(
        &self,
        namespace: &str,
        workload: &str,
        nodes: &[NodeId],
        requests: &[CapacityRequest],
    ) -> Result<FilterOutcome, ControllerError> {
        if requests.is_empty() {
            return Ok(FilterOutcome {
                matched: nodes.to_vec(),
                failed: Vec::new(),
            });
        }

        let key = reservation_key(namespace, workload);
        match self.gateway.read_reservation(&key).await {
            Ok(reservation) => match reservation.status {
                ReservationStatus::Confirmed => {
                    info!(%key, "reservation already confirmed, honoring it");
                    Ok(split_by_reserved(nodes, &reservation.reserved_nodes))
                }
                ReservationStatus::Rejected => {
                    info!(%key, "reservation already rejected");
                    Ok(FilterOutcome {
                        matched: Vec::new(),
                        failed: nodes.to_vec(),
                    })
                }
                ReservationStatus::Requested => self.decide(&key, nodes, requests, true).await,
                ReservationStatus::Cancelled => Err(ControllerError::Internal(format!(
                    "unsupported reservation status: {}",
                    reservation.status
                ))),
            },
            Err(e) if e.is_not_found() => self.decide(&key, nodes, requests, false).await,
            Err(e) => Err(ControllerError::store(e)),
        }
    }

    /// Compute the placement decision from current free capacity and
    /// persist it.
    async fn decide(
        &self,
        key: &str,
        nodes: &[NodeId],
        requests: &[CapacityRequest],
        update_existing: bool,
    ) -> Result<FilterOutcome, ControllerError> {
        let capacity = self
            .gateway
            .list_capacity()
            .await
            .map_err(ControllerError::store)?;
        let mut by_node: HashMap<&NodeId, Vec<&AvailableCapacityRecord>> = HashMap::new();
        for ac in &capacity {
            by_node.entry(&ac.node_id).or_default().push(ac);
        }

        let mut matched = Vec::new();
        let mut failed = Vec::new();
        for node in nodes {
            let free = by_node.get(node).cloned().unwrap_or_default();
            if node_fits(free, requests) {
                matched.push(node.clone());
            } else {
                failed.push(node.clone());
            }
        }

        let status = if matched.is_empty() {
            ReservationStatus::Rejected
        } else {
            ReservationStatus::Confirmed
        };
        let reservation = CapacityReservationRecord {
            name: key.to_owned(),
            status,
            requested_nodes: nodes.to_vec(),
            reserved_nodes: matched.clone(),
            requests: requests.to_vec(),
        };
        if update_existing {
            self.gateway
                .update_reservation(&reservation)
                .await
                .map_err(ControllerError::store)?;
        } else {
            self.gateway
                .create_reservation(&reservation)
                .await
                .map_err(ControllerError::store)?;
        }
        info!(%key, status = %status, matched = matched.len(), "placement decision persisted");

        Ok(FilterOutcome { matched, failed })
    }

    /// Rank `nodes` so that nodes hosting fewer volumes score higher.
    ///
    /// Returns the per-node scores and the highest volume count observed;
    /// a node's score is that maximum minus its own count.
    pub async fn prioritize(
        &self,
        nodes: &[NodeId],
    ) -> Result<(HashMap<NodeId, i64>, i64), ControllerError> {
        let volumes = self
            .gateway
            .list_volumes()
            .await
            .map_err(ControllerError::store)?;

        let mut counts: HashMap<NodeId, i64> =
            nodes.iter().map(|node| (node.clone(), 0)).collect();
        for volume in &volumes {
            if let Some(count) = counts.get_mut(&volume.owner_node_id) {
                *count += 1;
            }
        }

        let max_count = counts.values().copied().max().unwrap_or(0);
        let scores = counts
            .into_iter()
            .map(|(node, count)| (node, max_count - count))
            .collect();
        Ok((scores, max_count))
    }

    /// Drop the reservation for `workload`, if any.  Called once the
    /// workload's volumes are provisioned (or it is gone for good); a
    /// missing record is success.
    pub async fn remove_reservation(
        &self,
        namespace: &str,
        workload: &str,
    ) -> Result<(), ControllerError> {
        let key = reservation_key(namespace, workload);
        match self.gateway.delete_reservation(&key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(%key, "no reservation to remove");
                Ok(())
            }
            Err(e) => Err(ControllerError::store(e)),
        }
    }
}

/// Whether `free` disks can host every request, each request on its own
/// disk.  Requests are placed largest first, each on the smallest matching
/// disk (best-fit).
fn node_fits(mut free: Vec<&AvailableCapacityRecord>, requests: &[CapacityRequest]) -> bool {
    let mut requests: Vec<&CapacityRequest> = requests.iter().collect();
    requests.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));

    for request in requests {
        let slot = free
            .iter()
            .enumerate()
            .filter(|(_, ac)| {
                ac.size_bytes >= request.size_bytes
                    && class_matches(&request.storage_class, &ac.storage_class)
            })
            .min_by_key(|(_, ac)| ac.size_bytes)
            .map(|(i, _)| i);
        match slot {
            Some(i) => {
                free.swap_remove(i);
            }
            None => return false,
        }
    }
    true
}

/// `ANY` on either side matches everything; otherwise classes must be
/// equal.
fn class_matches(requested: &str, available: &str) -> bool {
    requested == STORAGE_CLASS_ANY || available == STORAGE_CLASS_ANY || requested == available
}

fn split_by_reserved(nodes: &[NodeId], reserved: &[NodeId]) -> FilterOutcome {
    let (matched, failed) = nodes
        .iter()
        .cloned()
        .partition(|node| reserved.contains(node));
    FilterOutcome { matched, failed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{VolumeRecord, STORAGE_CLASS_HDD};
    use std::sync::Arc;

    const GIB: u64 = 1 << 30;

    fn store_pair() -> (PlacementExtender, StoreGateway) {
        let store = Arc::new(MemoryStore::new());
        let extender = PlacementExtender::new(StoreGateway::new(store.clone(), "test-ns"));
        (extender, StoreGateway::new(store, "test-ns"))
    }

    fn ac(node: &str, location: &str, class: &str, size: u64) -> AvailableCapacityRecord {
        AvailableCapacityRecord {
            node_id: node.into(),
            location: location.into(),
            size_bytes: size,
            storage_class: class.into(),
        }
    }

    fn request(name: &str, class: &str, size: u64) -> CapacityRequest {
        CapacityRequest {
            name: name.into(),
            storage_class: class.into(),
            size_bytes: size,
        }
    }

    fn nodes(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[tokio::test]
    async fn empty_requests_match_every_candidate() {
        let (extender, _) = store_pair();
        let candidates = nodes(&["node-1", "node-2"]);

        let outcome = extender
            .filter("test-ns", "pod-1", &candidates, &[])
            .await
            .unwrap();
        assert_eq!(outcome.matched, candidates);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn filter_picks_nodes_that_pack_all_requests() {
        let (extender, gateway) = store_pair();
        // node-1: HDD 50 + 100 GiB; node-2: HDD 100 GiB only.
        for record in [
            ac("node-1", "sda", STORAGE_CLASS_HDD, 50 * GIB),
            ac("node-1", "sdb", STORAGE_CLASS_HDD, 100 * GIB),
            ac("node-2", "sda", STORAGE_CLASS_HDD, 100 * GIB),
        ] {
            gateway.create_capacity(&record).await.unwrap();
        }

        let candidates = nodes(&["node-1", "node-2"]);
        let requests = [
            request("pvc-1", STORAGE_CLASS_HDD, 50 * GIB),
            request("pvc-2", STORAGE_CLASS_HDD, 100 * GIB),
        ];

        let outcome = extender
            .filter("test-ns", "mypod-hdd-1", &candidates, &requests)
            .await
            .unwrap();
        assert_eq!(outcome.matched, nodes(&["node-1"]));
        assert_eq!(outcome.failed, nodes(&["node-2"]));

        let reservation = gateway
            .read_reservation("test-ns-mypod-hdd-1")
            .await
            .unwrap();
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
        assert_eq!(reservation.reserved_nodes, nodes(&["node-1"]));
        assert_eq!(reservation.requests.len(), 2);
    }

    #[tokio::test]
    async fn storage_class_is_honored_with_any_wildcard() {
        let (extender, gateway) = store_pair();
        for record in [
            ac("node-1", "sda", "ssd", 100 * GIB),
            ac("node-2", "sda", STORAGE_CLASS_ANY, 100 * GIB),
        ] {
            gateway.create_capacity(&record).await.unwrap();
        }

        let candidates = nodes(&["node-1", "node-2"]);
        let requests = [request("pvc-1", STORAGE_CLASS_HDD, 50 * GIB)];

        // Only the unclassified disk can serve an hdd request.
        let outcome = extender
            .filter("test-ns", "mypod-class", &candidates, &requests)
            .await
            .unwrap();
        assert_eq!(outcome.matched, nodes(&["node-2"]));
        assert_eq!(outcome.failed, nodes(&["node-1"]));
    }

    #[tokio::test]
    async fn confirmed_reservation_is_stable_across_capacity_changes() {
        let (extender, gateway) = store_pair();
        gateway
            .create_capacity(&ac("node-1", "sda", STORAGE_CLASS_HDD, 50 * GIB))
            .await
            .unwrap();

        let candidates = nodes(&["node-1"]);
        let requests = [request("pvc-1", STORAGE_CLASS_HDD, 10 * GIB)];
        let first = extender
            .filter("test-ns", "pod-stable", &candidates, &requests)
            .await
            .unwrap();
        assert_eq!(first.matched, nodes(&["node-1"]));

        // The disk disappears, but the persisted decision still holds.
        gateway
            .delete_capacity(&"node-1".into(), "sda")
            .await
            .unwrap();
        let second = extender
            .filter("test-ns", "pod-stable", &candidates, &requests)
            .await
            .unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn nothing_fits_persists_a_rejection() {
        let (extender, gateway) = store_pair();
        gateway
            .create_capacity(&ac("node-1", "sda", STORAGE_CLASS_HDD, 10 * GIB))
            .await
            .unwrap();

        let candidates = nodes(&["node-1"]);
        let requests = [request("pvc-1", STORAGE_CLASS_HDD, 500 * GIB)];
        let outcome = extender
            .filter("test-ns", "pod-big", &candidates, &requests)
            .await
            .unwrap();
        assert!(outcome.matched.is_empty());
        assert_eq!(outcome.failed, candidates);

        let reservation = gateway.read_reservation("test-ns-pod-big").await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Rejected);
        assert!(reservation.reserved_nodes.is_empty());
    }

    #[tokio::test]
    async fn pending_reservation_is_decided_in_place() {
        let (extender, gateway) = store_pair();
        gateway
            .create_capacity(&ac("node-1", "sda", STORAGE_CLASS_HDD, 50 * GIB))
            .await
            .unwrap();

        let requests = vec![request("pvc-1", STORAGE_CLASS_HDD, 10 * GIB)];
        gateway
            .create_reservation(&CapacityReservationRecord {
                name: "test-ns-pod-pending".into(),
                status: ReservationStatus::Requested,
                requested_nodes: nodes(&["node-1"]),
                reserved_nodes: Vec::new(),
                requests: requests.clone(),
            })
            .await
            .unwrap();

        let outcome = extender
            .filter("test-ns", "pod-pending", &nodes(&["node-1"]), &requests)
            .await
            .unwrap();
        assert_eq!(outcome.matched, nodes(&["node-1"]));

        let reservation = gateway
            .read_reservation("test-ns-pod-pending")
            .await
            .unwrap();
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn cancelled_reservation_is_an_error() {
        let (extender, gateway) = store_pair();
        let requests = vec![request("pvc-1", STORAGE_CLASS_HDD, 10 * GIB)];
        gateway
            .create_reservation(&CapacityReservationRecord {
                name: "test-ns-pod-gone".into(),
                status: ReservationStatus::Cancelled,
                requested_nodes: nodes(&["node-1"]),
                reserved_nodes: Vec::new(),
                requests: requests.clone(),
            })
            .await
            .unwrap();

        let err = extender
            .filter("test-ns", "pod-gone", &nodes(&["node-1"]), &requests)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported reservation status"));
    }

    #[tokio::test]
    async fn remove_reservation_is_idempotent() {
        let (extender, gateway) = store_pair();
        gateway
            .create_reservation(&CapacityReservationRecord {
                name: "test-ns-pod-done".into(),
                status: ReservationStatus::Confirmed,
                requested_nodes: nodes(&["node-1"]),
                reserved_nodes: nodes(&["node-1"]),
                requests: Vec::new(),
            })
            .await
            .unwrap();

        extender
            .remove_reservation("test-ns", "pod-done")
            .await
            .unwrap();
        extender
            .remove_reservation("test-ns", "pod-done")
            .await
            .unwrap();
        assert!(gateway
            .read_reservation("test-ns-pod-done")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn prioritize_favors_nodes_with_fewer_volumes() {
        let (extender, gateway) = store_pair();

        // Zero volumes: everyone scores zero.
        let candidates = nodes(&["node-1", "node-2"]);
        let (node_1, node_2) = (NodeId::from("node-1"), NodeId::from("node-2"));
        let (scores, max_count) = extender.prioritize(&candidates).await.unwrap();
        assert_eq!(max_count, 0);
        assert_eq!(scores[&node_1], 0);
        assert_eq!(scores[&node_2], 0);

        // Equal counts: still level.
        gateway
            .create_volume(&VolumeRecord::new("v1".into(), "node-1".into(), GIB, "sda".into()))
            .await
            .unwrap();
        gateway
            .create_volume(&VolumeRecord::new("v2".into(), "node-2".into(), GIB, "sda".into()))
            .await
            .unwrap();
        let (scores, max_count) = extender.prioritize(&candidates).await.unwrap();
        assert_eq!(max_count, 1);
        assert_eq!(scores[&node_1], 0);
        assert_eq!(scores[&node_2], 0);

        // node-1 gains a volume, node-2 must score higher.
        gateway
            .create_volume(&VolumeRecord::new("v3".into(), "node-1".into(), GIB, "sdb".into()))
            .await
            .unwrap();
        let (scores, max_count) = extender.prioritize(&candidates).await.unwrap();
        assert_eq!(max_count, 2);
        assert_eq!(scores[&node_1], 0);
        assert_eq!(scores[&node_2], 1);
    }

    #[test]
    fn node_fits_places_each_request_on_its_own_disk() {
        let disks = [
            ac("node-1", "sda", STORAGE_CLASS_HDD, 100 * GIB),
        ];
        // Two requests cannot share the single disk.
        assert!(!node_fits(
            disks.iter().collect(),
            &[
                request("pvc-1", STORAGE_CLASS_HDD, 40 * GIB),
                request("pvc-2", STORAGE_CLASS_HDD, 40 * GIB),
            ],
        ));
        assert!(node_fits(
            disks.iter().collect(),
            &[request("pvc-1", STORAGE_CLASS_HDD, 40 * GIB)],
        ));
    }
}
