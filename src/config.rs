//! Controller process configuration.
//!
//! Read once from environment variables at first access.
//!
//! Environment variables:
//! - `METALCSI_NAMESPACE`: namespace all records are scoped to.
//!   Defaults to `default`.
//! - `METALCSI_AGENT_PORT`: port the per-node volume agents listen on.
//!   Defaults to `9999`.
//! - `METALCSI_AGENT_SERVER_NAME`: TLS SNI name expected from node agents.
//!   Defaults to `metalcsi-node`.
//! - `METALCSI_POLL_INTERVAL_MS`: volume status poll interval in
//!   milliseconds. Defaults to `1000`.
//! - `METALCSI_CREATE_WAIT_SECS`: how long the request surface waits for a
//!   volume to leave the Creating state. Defaults to `120`.
//! - `METALCSI_LOCAL_VOLUME_TIMEOUT_SECS`: timeout for each local volume
//!   RPC on the create and delete paths. Defaults to `300`.
//! - `METALCSI_INIT_CAPACITY_TIMEOUT_SECS`: timeout covering the whole
//!   capacity initialization sweep. Defaults to `240`.
//! - `METALCSI_STATUS_ATTEMPTS`: read and update attempts when persisting
//!   a status change. Defaults to `10`.
//! - `METALCSI_STATUS_RETRY_GAP_MS`: gap between status read/update
//!   retries in milliseconds. Defaults to `500`.

use std::sync::LazyLock;
use std::time::Duration;

/// Global controller configuration.
pub struct Config {
    /// Namespace all Volume and AvailableCapacity records live in.
    pub namespace: String,
    /// Port the per-node volume agents listen on.
    pub agent_port: u16,
    /// TLS SNI name the agent certificates are issued for.
    pub agent_server_name: String,
    /// Gap between volume status polls.
    pub status_poll_interval: Duration,
    /// Deadline applied to CreateVolume requests at the request surface.
    pub create_wait_timeout: Duration,
    /// Timeout applied to each local volume RPC (create and delete paths).
    pub local_volume_timeout: Duration,
    /// Timeout covering the whole capacity initialization sweep.
    pub init_capacity_timeout: Duration,
    /// Read and update attempts when persisting a status change.
    pub status_attempts: u32,
    /// Gap between status read/update retries.
    pub status_retry_gap: Duration,
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Globally initialized configuration, read from environment variables at
/// first access.
pub static CONFIG: LazyLock<Config> = LazyLock::new(|| Config {
    namespace: std::env::var("METALCSI_NAMESPACE").unwrap_or_else(|_| "default".to_owned()),
    agent_port: std::env::var("METALCSI_AGENT_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(9999),
    agent_server_name: std::env::var("METALCSI_AGENT_SERVER_NAME")
        .unwrap_or_else(|_| "metalcsi-node".to_owned()),
    status_poll_interval: Duration::from_millis(env_u64("METALCSI_POLL_INTERVAL_MS", 1000)),
    create_wait_timeout: Duration::from_secs(env_u64("METALCSI_CREATE_WAIT_SECS", 120)),
    local_volume_timeout: Duration::from_secs(env_u64("METALCSI_LOCAL_VOLUME_TIMEOUT_SECS", 300)),
    init_capacity_timeout: Duration::from_secs(env_u64("METALCSI_INIT_CAPACITY_TIMEOUT_SECS", 240)),
    status_attempts: env_u64("METALCSI_STATUS_ATTEMPTS", 10) as u32,
    status_retry_gap: Duration::from_millis(env_u64("METALCSI_STATUS_RETRY_GAP_MS", 500)),
});
