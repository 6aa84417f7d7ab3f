//! Core traits and types for HomeLink.
//!
//! This crate defines the foundation shared by the outbound command path
//! and the inbound state path:
//! - Device identity, connection info and runtime state
//! - Collaborator traits (device directory, state listeners, snapshot cache)
//! - The sequence generator and the correlation table tying responses back
//!   to in-flight commands

pub mod correlation;
pub mod device;
pub mod sequence;
pub mod traits;

// Re-exports
pub use correlation::CorrelationTable;
pub use device::{DeviceId, DeviceInfo, DeviceState};
pub use sequence::SequenceGenerator;
pub use traits::{DeviceDirectory, SnapshotCache, StateListener};
