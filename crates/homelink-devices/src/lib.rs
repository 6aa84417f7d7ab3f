//! Inbound state path: transport decoding, correlation and state merging.
//!
//! Responses and push updates from every transport funnel into the
//! [`InboundProcessor`], which releases pending acknowledgments and merges
//! device-state snapshots into the [`StateRegistry`], notifying registered
//! listeners.

pub mod inbound;
pub mod state;

// Re-exports
pub use inbound::{CloudMessage, InboundProcessor, LocalAnnounce, LocalResponse, SnapshotEntry};
pub use state::StateRegistry;
