//! # taskcast-core
//!
//! Connection registry and event fan-out for the taskcast notification hub.
//!
//! - **Registry**: arena of live connections plus per-channel memberships
//! - **Broadcaster / Dispatcher**: queue handoff and fan-out sweeps
//! - **Ids**: typed identifiers shared across the workspace
//!
//! ```text
//! mutation ──▶ Broadcaster ──▶ queue ──▶ Dispatcher ──▶ members ──▶ connections
//!                                            │
//!                                            └──▶ leave (failed deliveries)
//! ```

pub mod broadcast;
pub mod ids;
pub mod registry;

pub use broadcast::{Broadcaster, Dispatch, Dispatcher};
pub use ids::{ConnectionId, TaskId, UserId};
pub use registry::{Channel, Recipient, Registry, RegistryStats};
