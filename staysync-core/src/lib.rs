//! Availability engine for short-term rental channel calendars.
//!
//! This crate holds everything with real invariants: the interval/conflict
//! model, the store abstraction with its two backends, the ingestion funnel,
//! the feed parser and per-channel exporter, and the background sync worker.
//! HTTP transport and authentication live in `staysync-server`.

pub mod config;
pub mod conflicts;
pub mod engine;
pub mod error;
pub mod feed;
pub mod model;
pub mod store;
pub mod token;
pub mod worker;

pub use engine::Engine;
pub use error::{StaySyncError, StaySyncResult};
pub use model::{
    Channel, ChannelLink, Conflict, ConflictStatus, Event, EventSource, EventType, Listing,
};
