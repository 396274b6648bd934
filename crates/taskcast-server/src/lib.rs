//! # taskcast-server
//!
//! Channel endpoints and wiring for the taskcast notification hub.
//!
//! Everything the `taskcast` binary assembles is public, so a task backend
//! can mount the same router inside its own process and drive the
//! [`taskcast_core::Broadcaster`] from its mutation paths.

pub mod auth;
pub mod config;
pub mod directory;
pub mod handlers;
pub mod metrics;
pub mod state;
