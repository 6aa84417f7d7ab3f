//! Transport interfaces and wire envelopes consumed by the router.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use homelink_codec::LocalCommandEnvelope;

/// Which channels the router may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// LAN only; cloud fallback is never permitted
    Local,
    /// Cloud only
    Cloud,
    /// Prefer local, fall back to cloud
    #[default]
    Mixed,
}

/// Envelope for commands relayed through the cloud channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudEnvelope {
    /// Correlation sequence
    pub sequence: u64,
    /// Account API key authenticating the relay session
    pub api_key: String,
    /// Target device ID
    pub device_id: String,
    /// Command parameters
    pub params: Value,
}

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("transport not connected")]
    NotConnected,
}

/// Direct delivery to a device's LAN endpoint.
#[async_trait]
pub trait LocalTransport: Send + Sync {
    /// Post an encrypted envelope to the device's endpoint URL.
    async fn send_local(
        &self,
        url: &str,
        envelope: &LocalCommandEnvelope,
    ) -> Result<(), TransportError>;
}

/// Persistent duplex channel to the cloud relay.
#[async_trait]
pub trait CloudTransport: Send + Sync {
    /// Push an envelope down the relay channel.
    async fn send_cloud(&self, envelope: &CloudEnvelope) -> Result<(), TransportError>;
}

/// Stateless request refreshing a device's full state.
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    /// Request a fresh state snapshot for a device.
    async fn send_bulk_refresh(&self, device_id: &str) -> Result<(), TransportError>;
}
