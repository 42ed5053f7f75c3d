//! Volume status waiter.
//!
//! Bridges the synchronous CreateVolume request with the asynchronous
//! backend completion: polls the volume record until its status enters a
//! caller-supplied terminal set or the caller's deadline fires.

use tokio::time::{sleep, sleep_until, Instant};
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::store::StoreGateway;
use crate::types::{VolumeId, VolumeStatus};

/// Poll the volume record once per configured interval until its status is
/// one of `terminal` or `deadline` fires.
///
/// Returns the reached status, or `None` on deadline.  Read errors are
/// logged and retried; the waiter never surfaces transient store failures.
pub async fn wait_for_status(
    gateway: &StoreGateway,
    volume_id: &VolumeId,
    terminal: &[VolumeStatus],
    deadline: Instant,
) -> Option<VolumeStatus> {
    loop {
        tokio::select! {
            () = sleep_until(deadline) => {
                warn!(%volume_id, "deadline fired before volume reached an expected status");
                return None;
            }
            () = sleep(CONFIG.status_poll_interval) => {
                let volume = match gateway.read_volume(volume_id).await {
                    Ok(volume) => volume,
                    Err(e) => {
                        warn!(%volume_id, error = %e, "unable to read volume record while polling status");
                        continue;
                    }
                };
                if terminal.contains(&volume.status) {
                    info!(%volume_id, status = %volume.status, "volume reached expected status");
                    return Some(volume.status);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::VolumeRecord;
    use std::sync::Arc;
    use std::time::Duration;

    fn gateway() -> Arc<StoreGateway> {
        Arc::new(StoreGateway::new(Arc::new(MemoryStore::new()), "test-ns"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reaches_terminal_status() {
        let gw = gateway();
        let v = VolumeRecord::new("v1".into(), "node-1".into(), 1024, "sda".into());
        gw.create_volume(&v).await.unwrap();

        // Flip the status from a parallel task while the waiter polls.
        let writer = Arc::clone(&gw);
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            let mut v = writer.read_volume(&"v1".into()).await.unwrap();
            v.set_status(VolumeStatus::Created);
            writer.update_volume(&v).await.unwrap();
        });

        let deadline = Instant::now() + Duration::from_secs(10);
        let reached = wait_for_status(
            &gw,
            &"v1".into(),
            &[VolumeStatus::Created, VolumeStatus::FailedToCreate],
            deadline,
        )
        .await;
        assert_eq!(reached, Some(VolumeStatus::Created));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deadline_fires_first() {
        let gw = gateway();
        let v = VolumeRecord::new("v1".into(), "node-1".into(), 1024, "sda".into());
        gw.create_volume(&v).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        let reached =
            wait_for_status(&gw, &"v1".into(), &[VolumeStatus::Created], deadline).await;
        assert_eq!(reached, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_record_is_retried_until_deadline() {
        let gw = gateway();
        let deadline = Instant::now() + Duration::from_millis(50);
        let reached =
            wait_for_status(&gw, &"ghost".into(), &[VolumeStatus::Created], deadline).await;
        assert_eq!(reached, None);
    }
}
