//! Command messages and the closed set of command kinds.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use homelink_core::DeviceId;

/// A single switch position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

/// One outlet of a multi-channel switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outlet {
    /// Outlet index on the device
    pub outlet: u8,
    /// Requested position
    pub switch: SwitchState,
}

/// How the dispatcher treats a command after sending it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchClass {
    /// Send, then wait for a correlated acknowledgment, with retry
    Tracked,
    /// Send and record the sequence; responses arrive later, nobody blocks
    Streaming,
    /// Fire through the stateless bulk-refresh transport, no correlation
    BulkRefresh,
}

/// The closed set of commands the dispatcher knows how to deliver.
///
/// Dispatch class, wire parameters and the local endpoint all derive from
/// the variant, so adding a kind forces a decision on how it is routed and
/// correlated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    /// Toggle the single relay of a one-channel device.
    Switch { switch: SwitchState },
    /// Set several outlets of a multi-channel device at once.
    MultiSwitch { switches: Vec<Outlet> },
    /// Set dimmer brightness, 0-100.
    Brightness { value: u8 },
    /// Set white color temperature, 0-100 cold-to-warm.
    ColorTemperature { value: u8 },
    /// Ask a device to push live telemetry for a while.
    StreamingActivate { seconds: u32 },
    /// Re-read a device's full state through the bulk-refresh transport.
    Refresh,
}

impl CommandKind {
    /// Kind label used in logs and the correlation table.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Switch { .. } => "switch",
            CommandKind::MultiSwitch { .. } => "multi_switch",
            CommandKind::Brightness { .. } => "brightness",
            CommandKind::ColorTemperature { .. } => "color_temperature",
            CommandKind::StreamingActivate { .. } => "streaming_activate",
            CommandKind::Refresh => "refresh",
        }
    }

    /// How the dispatcher handles this kind after sending.
    pub fn dispatch_class(&self) -> DispatchClass {
        match self {
            CommandKind::Refresh => DispatchClass::BulkRefresh,
            CommandKind::StreamingActivate { .. } => DispatchClass::Streaming,
            _ => DispatchClass::Tracked,
        }
    }

    /// Expedited commands jump to the head of the queue: direct user
    /// switch intent dispatches ahead of queued background work.
    ///
    /// A multi-switch batch is expedited whenever it is non-empty; the
    /// positions inside are not inspected.
    pub fn is_expedited(&self) -> bool {
        match self {
            CommandKind::Switch { .. } => true,
            CommandKind::MultiSwitch { switches } => !switches.is_empty(),
            _ => false,
        }
    }

    /// Wire parameter object carried in the request payload.
    pub fn params(&self) -> Value {
        match self {
            CommandKind::Switch { switch } => json!({ "switch": switch }),
            CommandKind::MultiSwitch { switches } => json!({ "switches": switches }),
            CommandKind::Brightness { value } => json!({ "brightness": value }),
            CommandKind::ColorTemperature { value } => json!({ "colorTemp": value }),
            CommandKind::StreamingActivate { seconds } => json!({ "telemetryActive": seconds }),
            CommandKind::Refresh => json!({}),
        }
    }

    /// Path segment of the device's local endpoint for this kind.
    pub fn endpoint(&self) -> &'static str {
        match self {
            CommandKind::Switch { .. } => "switch",
            CommandKind::MultiSwitch { .. } => "switches",
            CommandKind::Brightness { .. } => "dimmable",
            CommandKind::ColorTemperature { .. } => "ctemp",
            CommandKind::StreamingActivate { .. } => "telemetry",
            CommandKind::Refresh => "info",
        }
    }
}

/// A command bound for one device.
///
/// Everything but the sequence number is fixed at construction; the
/// sequence is assigned exactly once, on the first dispatch attempt, and
/// retries reuse the same value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Target device ID
    pub device_id: DeviceId,
    /// What to do
    pub kind: CommandKind,
    /// Whether this command may be delivered over the local transport
    pub local_capable: bool,
    /// Assigned on first dispatch
    pub sequence: Option<u64>,
}

impl CommandMessage {
    /// Create a message for a device. Local delivery is allowed by default.
    pub fn new(device_id: impl Into<DeviceId>, kind: CommandKind) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            local_capable: true,
            sequence: None,
        }
    }

    /// Declare whether the command supports local delivery.
    pub fn with_local_capable(mut self, capable: bool) -> Self {
        self.local_capable = capable;
        self
    }
}
