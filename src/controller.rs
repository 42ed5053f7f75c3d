//! Lifecycle orchestrator.
//!
//! [`ControllerService`] implements CreateVolume and DeleteVolume by
//! composing the scheduler, the store gateway, the agent registry, and the
//! status waiter: reserve capacity in the store, dispatch local work to the
//! owner's agent, update the volume record on completion.
//!
//! Two locks order all work.  The request lock (held here) covers the
//! reservation window of CreateVolume and the entirety of DeleteVolume and
//! [`ControllerService::change_volume_status`]; the store lock (held inside
//! [`StoreGateway`]) serializes individual record operations.  The request
//! lock is always taken before any store access within a critical section,
//! never the other way around.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{error, info, instrument, warn};

use crate::agent::CreateLocalVolumeRequest;
use crate::config::CONFIG;
use crate::error::ControllerError;
use crate::registry::AgentRegistry;
use crate::scheduler::CapacityIndex;
use crate::store::StoreGateway;
use crate::types::{
    AvailableCapacityRecord, ControllerCapability, CreateVolumeRequest, CreatedVolume, NodeId,
    Topology, VolumeId, VolumeRecord, VolumeStatus, STORAGE_CLASS_ANY, STORAGE_CLASS_HDD,
};
use crate::waiter::wait_for_status;

/// The cluster-level volume lifecycle service.
///
/// Cheap to clone; clones share the same store gateway, agent registry, and
/// request lock, which lets the detached local-creation task outlive the
/// RPC that spawned it.
#[derive(Clone)]
pub struct ControllerService {
    gateway: Arc<StoreGateway>,
    agents: Arc<AgentRegistry>,
    req_lock: Arc<Mutex<()>>,
}

impl ControllerService {
    /// Build a service over the given store gateway and agent registry.
    #[must_use]
    pub fn new(gateway: StoreGateway, agents: AgentRegistry) -> Self {
        Self {
            gateway: Arc::new(gateway),
            agents: Arc::new(agents),
            req_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The capabilities this controller advertises.
    #[must_use]
    pub fn capabilities() -> Vec<ControllerCapability> {
        vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::PublishUnpublishVolume,
        ]
    }

    /// Seed the store with AvailableCapacity records from every agent's
    /// inventory report.
    ///
    /// Per-node failures are logged and the sweep continues; if any
    /// occurred, an error is returned after all nodes were processed.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), ControllerError> {
        info!(
            timeout_secs = CONFIG.init_capacity_timeout.as_secs(),
            "initializing available capacity records"
        );
        match timeout(CONFIG.init_capacity_timeout, self.populate_available_capacity()).await {
            Ok(result) => result,
            Err(_) => Err(ControllerError::Internal(
                "available capacity initialization timed out".to_owned(),
            )),
        }
    }

    async fn populate_available_capacity(&self) -> Result<(), ControllerError> {
        let mut was_error = false;
        for (node_id, agent) in self.agents.iter() {
            let entries = match agent.get_available_capacity(node_id).await {
                Ok(entries) => entries,
                Err(e) => {
                    error!(node = %node_id, error = %e, "capacity request to node agent failed");
                    was_error = true;
                    continue;
                }
            };
            info!(node = %node_id, count = entries.len(), "received capacity report");

            for entry in entries {
                let record = AvailableCapacityRecord {
                    node_id: entry.node_id,
                    location: entry.location,
                    size_bytes: entry.size_bytes,
                    storage_class: entry.storage_class,
                };
                if let Err(e) = self.gateway.create_capacity(&record).await {
                    error!(key = %record.key(), error = %e, "unable to create available capacity record");
                    was_error = true;
                }
            }
        }

        if was_error {
            Err(ControllerError::Internal(
                "not all available capacity records were created".to_owned(),
            ))
        } else {
            Ok(())
        }
    }

    /// Provision a new volume, waiting until it reaches a terminal create
    /// status or `deadline` fires.
    #[instrument(skip(self, req), fields(volume_id = %req.name))]
    pub async fn create_volume(
        &self,
        req: CreateVolumeRequest,
        deadline: Instant,
    ) -> Result<CreatedVolume, ControllerError> {
        if req.name.is_empty() {
            return Err(ControllerError::InvalidArgument(
                "volume name missing in request".to_owned(),
            ));
        }
        if req.volume_capabilities.is_empty() {
            return Err(ControllerError::InvalidArgument(
                "volume capabilities missing in request".to_owned(),
            ));
        }

        let id = VolumeId(req.name.clone());
        let volume = match self.gateway.read_volume(&id).await {
            Ok(existing) => {
                info!(status = %existing.status, "volume record exists, resuming");
                existing
            }
            Err(e) if e.is_not_found() => self.reserve_and_dispatch(&id, &req).await?,
            Err(e) => {
                error!(error = %e, "unable to read volume record");
                return Err(ControllerError::Aborted(
                    "unable to check volume existence".to_owned(),
                ));
            }
        };

        info!("waiting until volume reaches a terminal create status");
        let reached = wait_for_status(
            &self.gateway,
            &id,
            &[VolumeStatus::Created, VolumeStatus::FailedToCreate],
            deadline,
        )
        .await;

        match reached {
            Some(VolumeStatus::FailedToCreate) => Err(ControllerError::Internal(
                "unable to create volume on local node".to_owned(),
            )),
            Some(_) => {
                info!(owner = %volume.owner_node_id, size_bytes = volume.size_bytes, "volume created");
                Ok(CreatedVolume {
                    volume_id: id,
                    capacity_bytes: volume.size_bytes,
                    volume_context: req.parameters,
                    accessible_topology: vec![Topology::node(&volume.owner_node_id)],
                })
            }
            None => Err(ControllerError::Aborted(format!(
                "creation of volume {id} is in progress"
            ))),
        }
    }

    /// The reservation window: under the request lock, pick a disk, persist
    /// the volume record in `Creating`, and remove the consumed capacity
    /// record; then dispatch the local creation as a detached task.
    async fn reserve_and_dispatch(
        &self,
        id: &VolumeId,
        req: &CreateVolumeRequest,
    ) -> Result<VolumeRecord, ControllerError> {
        let guard = self.req_lock.lock().await;

        // A concurrent request for the same name may have reserved while
        // this one waited for the lock; resume on its record instead.
        match self.gateway.read_volume(id).await {
            Ok(existing) => {
                info!(status = %existing.status, "volume record appeared concurrently, resuming");
                return Ok(existing);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                error!(error = %e, "unable to re-read volume record");
                return Err(ControllerError::Aborted(
                    "unable to check volume existence".to_owned(),
                ));
            }
        }

        let records = match self.gateway.list_capacity().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "unable to list available capacity records");
                Vec::new()
            }
        };
        let index = CapacityIndex::from_records(records);

        let preferred = req.preferred_node();
        if let Some(node) = &preferred {
            info!(%node, "preferred node was provided");
        }
        let Some(ac) = index.choose(preferred.as_ref(), req.required_bytes) else {
            info!("there is no suitable drive for volume");
            return Err(ControllerError::NoCapacity(req.name.clone()));
        };
        info!(node = %ac.node_id, location = %ac.location, "disk selected");

        let volume = VolumeRecord::new(
            id.clone(),
            ac.node_id.clone(),
            ac.size_bytes,
            ac.location.clone(),
        );
        if let Err(e) = self.gateway.create_volume(&volume).await {
            error!(error = %e, "unable to create volume record");
            return Err(ControllerError::Internal(
                "unable to create volume record".to_owned(),
            ));
        }

        // Best effort: the reservation is already recorded in the volume,
        // so a failure here is left to the external reconciler.
        if let Err(e) = self.gateway.delete_capacity(&ac.node_id, &ac.location).await {
            error!(key = %ac.key(), error = %e, "unable to delete available capacity record");
        }

        let local_req = CreateLocalVolumeRequest {
            volume_id: id.clone(),
            capacity_bytes: req.required_bytes,
            storage_class: STORAGE_CLASS_HDD.to_owned(),
            location: ac.location.clone(),
        };
        let owner = ac.node_id.clone();
        drop(guard);

        let this = self.clone();
        tokio::spawn(async move {
            this.create_local_volume(owner, local_req).await;
        });

        Ok(volume)
    }

    /// Detached per-request task: call the owner's agent with a fixed
    /// timeout and translate the outcome into the next volume status.
    /// Runs to completion even if the original caller disconnects.
    async fn create_local_volume(&self, node: NodeId, req: CreateLocalVolumeRequest) {
        info!(
            volume_id = %req.volume_id,
            %node,
            timeout_secs = CONFIG.local_volume_timeout.as_secs(),
            "requesting local volume creation",
        );

        let new_status = match self.agents.get(&node) {
            None => {
                error!(%node, "no agent client registered for owner node");
                VolumeStatus::FailedToCreate
            }
            Some(agent) => {
                match timeout(CONFIG.local_volume_timeout, agent.create_local_volume(req.clone()))
                    .await
                {
                    Ok(Ok(())) => VolumeStatus::Created,
                    Ok(Err(e)) => {
                        error!(volume_id = %req.volume_id, error = %e, "local volume creation failed");
                        VolumeStatus::FailedToCreate
                    }
                    Err(_) => {
                        error!(volume_id = %req.volume_id, "local volume creation timed out");
                        VolumeStatus::FailedToCreate
                    }
                }
            }
        };

        if let Err(e) = self.change_volume_status(&req.volume_id, new_status).await {
            error!(volume_id = %req.volume_id, error = %e, "unable to persist volume status");
        }
    }

    /// Bounded-retry read-modify-write of a volume's status, serialized
    /// under the request lock.  This is the sole path by which a volume
    /// leaves `Creating`.
    pub async fn change_volume_status(
        &self,
        volume_id: &VolumeId,
        new_status: VolumeStatus,
    ) -> Result<(), ControllerError> {
        let _guard = self.req_lock.lock().await;
        info!(%volume_id, status = %new_status, "setting volume status");

        let mut volume = None;
        for attempt in 1..=CONFIG.status_attempts {
            match self.gateway.read_volume(volume_id).await {
                Ok(v) => {
                    volume = Some(v);
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "unable to read volume record");
                    tokio::time::sleep(CONFIG.status_retry_gap).await;
                }
            }
        }
        let Some(mut volume) = volume else {
            return Err(ControllerError::Internal(format!(
                "unable to read volume {volume_id} to set status {new_status}"
            )));
        };

        volume.set_status(new_status);

        for attempt in 1..=CONFIG.status_attempts {
            match self.gateway.update_volume(&volume).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "unable to update volume record");
                    tokio::time::sleep(CONFIG.status_retry_gap).await;
                }
            }
        }

        Err(ControllerError::Internal(format!(
            "unable to persist status {new_status} for volume {volume_id}"
        )))
    }

    /// Delete a volume: synchronous end-to-end under the request lock.
    ///
    /// A missing record is success (idempotent delete).  On success the
    /// freed disk reappears as an AvailableCapacity record.
    #[instrument(skip(self))]
    pub async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), ControllerError> {
        if volume_id.0.is_empty() {
            return Err(ControllerError::InvalidArgument(
                "volume id missing in request".to_owned(),
            ));
        }

        let _guard = self.req_lock.lock().await;
        match timeout(CONFIG.local_volume_timeout, self.delete_volume_locked(volume_id)).await {
            Ok(result) => result,
            Err(_) => Err(ControllerError::Internal(format!(
                "deletion of volume {volume_id} timed out"
            ))),
        }
    }

    async fn delete_volume_locked(&self, volume_id: &VolumeId) -> Result<(), ControllerError> {
        let volume = match self.gateway.read_volume(volume_id).await {
            Ok(volume) => volume,
            Err(e) if e.is_not_found() => {
                info!("volume record does not exist, volume already removed");
                return Ok(());
            }
            Err(e) => {
                return Err(ControllerError::Internal(format!(
                    "unable to read volume {volume_id}: {e}"
                )));
            }
        };

        let node = volume.owner_node_id.clone();
        let agent = self.agents.get(&node).ok_or_else(|| {
            ControllerError::Internal(format!("no agent client registered for node {node}"))
        })?;

        info!(%node, "requesting local volume deletion");
        let result = agent.delete_local_volume(volume_id).await.map_err(|e| {
            error!(error = %e, "local volume deletion failed");
            ControllerError::Internal(format!("unable to delete volume on node {node}"))
        })?;

        if !result.ok {
            return Err(ControllerError::Internal(
                "node agent rejected the volume deletion".to_owned(),
            ));
        }
        let Some(local) = result.volume else {
            return Err(ControllerError::Internal(
                "node agent returned no metadata for the deleted volume".to_owned(),
            ));
        };

        self.gateway.delete_volume(volume_id).await.map_err(|e| {
            ControllerError::Internal(format!("unable to delete volume record: {e}"))
        })?;

        // Best effort: reinstate the freed disk; a failure here is left to
        // the external reconciler.
        let ac = AvailableCapacityRecord {
            node_id: node,
            location: local.location,
            size_bytes: local.size_bytes,
            storage_class: STORAGE_CLASS_ANY.to_owned(),
        };
        if let Err(e) = self.gateway.create_capacity(&ac).await {
            error!(key = %ac.key(), error = %e, "unable to recreate available capacity record");
        }

        Ok(())
    }

    /// Attach is a no-op for directly provisioned disks.
    pub async fn publish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &NodeId,
    ) -> Result<(), ControllerError> {
        info!(%volume_id, %node_id, "returning empty publish response");
        Ok(())
    }

    /// Detach is a no-op for directly provisioned disks.
    pub async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &NodeId,
    ) -> Result<(), ControllerError> {
        info!(%volume_id, %node_id, "returning empty unpublish response");
        Ok(())
    }
}
