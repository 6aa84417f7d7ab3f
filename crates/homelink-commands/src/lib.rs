//! Outbound command engine: queue, routing, dispatch and retry.
//!
//! Producers hand [`CommandMessage`]s to the [`CommandDispatcher`], which
//! drains a bounded queue from a single consumer task, assigns sequence
//! numbers, routes each message through the [`TransportRouter`] and waits
//! on the correlation table for device acknowledgments with bounded retry.

pub mod command;
pub mod dispatcher;
pub mod queue;
pub mod router;
pub mod transport;

// Re-exports
pub use command::{CommandKind, CommandMessage, DispatchClass, Outlet, SwitchState};
pub use dispatcher::{CommandDispatcher, DispatcherConfig, DispatcherStats};
pub use queue::{CommandQueue, QueueStats, DEFAULT_QUEUE_CAPACITY};
pub use router::TransportRouter;
pub use transport::{
    AccessMode, CloudEnvelope, CloudTransport, LocalTransport, RefreshTransport, TransportError,
};
