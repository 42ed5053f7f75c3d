//! # metalcsi — control plane for bare-metal block storage
//!
//! `metalcsi` is the cluster-level controller of a bare-metal block-storage
//! provisioner.  A workload orchestrator issues volume lifecycle calls
//! against it; the controller picks a physical disk on a specific node,
//! coordinates with the per-node volume agent that performs the local
//! work, and keeps a consistent record of capacity and volume state in a
//! declarative object store.  It follows the project conventions: Tokio
//! async runtime, QUIC (via [`quinn`]) instead of gRPC for transport,
//! `tracing` for observability, `thiserror` for structured errors.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: records, requests, statuses, topology. |
//! | [`error`] | [`ControllerError`] enum and its status [`error::Code`] mapping. |
//! | [`config`] | Environment-driven process configuration. |
//! | [`store`] | Object store contract, in-memory store, serialized gateway. |
//! | [`scheduler`] | Capacity index and best-fit disk selection. |
//! | [`agent`] | Node-agent RPC envelope, trait, and QUIC client. |
//! | [`registry`] | Agent discovery and the `NodeId -> client` map. |
//! | [`waiter`] | Volume status polling with caller deadlines. |
//! | [`controller`] | [`ControllerService`] — the lifecycle orchestrator. |
//! | [`extender`] | Placement extension: filter/prioritize with reservations. |
//! | [`message`] | [`CsiMessage`] protocol envelope for the orchestrator surface. |
//! | [`server`] | QUIC request surface dispatching to the orchestrator. |

pub mod agent;
pub mod config;
pub mod controller;
pub mod error;
pub mod extender;
pub mod message;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;
pub mod waiter;

// Re-export the most commonly used items at crate root for convenience.
pub use controller::ControllerService;
pub use error::ControllerError;
pub use extender::PlacementExtender;
pub use message::CsiMessage;
pub use server::CsiServer;
pub use types::*;
