//! # taskcast-protocol
//!
//! Wire protocol for the taskcast notification hub.
//!
//! Defines the event envelope pushed to connected clients over the channel
//! endpoints, and the close reasons used when a handshake is rejected.
//!
//! ## Example
//!
//! ```rust
//! use taskcast_protocol::{Envelope, EventKind};
//!
//! let event = Envelope::event(
//!     EventKind::TaskUpdated,
//!     serde_json::json!({"action": "updated", "task": {"id": 7}}),
//! );
//! let text = event.to_text().unwrap();
//! assert!(text.contains("task_updated"));
//! ```

pub mod close;
pub mod event;

pub use close::{CloseReason, POLICY_VIOLATION};
pub use event::{Envelope, EventKind, ProtocolError};
