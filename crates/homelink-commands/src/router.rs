//! Transport selection for outbound commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use homelink_core::DeviceDirectory;

use crate::command::{CommandMessage, DispatchClass};
use crate::transport::{
    AccessMode, CloudEnvelope, CloudTransport, LocalTransport, RefreshTransport,
};

/// Port the devices' local HTTP endpoint listens on.
const LOCAL_PORT: u16 = 8081;

/// Routes each outbound command to a viable transport.
///
/// Local delivery is preferred over the cloud whenever both are viable and
/// the command supports it. The router never retries: a failed or refused
/// send is logged and dropped, and only the dispatcher's ack-timeout path
/// re-sends.
pub struct TransportRouter {
    local: Arc<dyn LocalTransport>,
    cloud: Arc<dyn CloudTransport>,
    refresh: Arc<dyn RefreshTransport>,
    directory: Arc<dyn DeviceDirectory>,
    local_up: AtomicBool,
    cloud_up: AtomicBool,
    mode: RwLock<AccessMode>,
    api_key: RwLock<String>,
}

impl TransportRouter {
    /// Create a router over the three transports and the device directory.
    ///
    /// Both channels start disconnected until the connection manager
    /// reports otherwise.
    pub fn new(
        local: Arc<dyn LocalTransport>,
        cloud: Arc<dyn CloudTransport>,
        refresh: Arc<dyn RefreshTransport>,
        directory: Arc<dyn DeviceDirectory>,
    ) -> Self {
        Self {
            local,
            cloud,
            refresh,
            directory,
            local_up: AtomicBool::new(false),
            cloud_up: AtomicBool::new(false),
            mode: RwLock::new(AccessMode::default()),
            api_key: RwLock::new(String::new()),
        }
    }

    /// Record live connectivity, reported by the connection manager.
    pub fn set_connected(&self, local_up: bool, cloud_up: bool) {
        self.local_up.store(local_up, Ordering::Relaxed);
        self.cloud_up.store(cloud_up, Ordering::Relaxed);
    }

    /// Whether any command channel is currently up.
    pub fn is_connected(&self) -> bool {
        self.local_up.load(Ordering::Relaxed) || self.cloud_up.load(Ordering::Relaxed)
    }

    /// Set the access mode commands are routed under.
    pub async fn set_mode(&self, mode: AccessMode) {
        *self.mode.write().await = mode;
    }

    /// Set the account API key carried in cloud envelopes.
    pub async fn set_api_key(&self, api_key: impl Into<String>) {
        *self.api_key.write().await = api_key.into();
    }

    /// Send one command. Returns whether a transport accepted it.
    pub async fn send(&self, msg: &CommandMessage) -> bool {
        // Bulk refresh is stateless and ignores connectivity flags.
        if msg.kind.dispatch_class() == DispatchClass::BulkRefresh {
            return match self.refresh.send_bulk_refresh(&msg.device_id).await {
                Ok(()) => {
                    debug!(device_id = %msg.device_id, "bulk refresh requested");
                    true
                }
                Err(e) => {
                    error!(device_id = %msg.device_id, "bulk refresh failed: {}", e);
                    false
                }
            };
        }

        let mode = *self.mode.read().await;
        if !msg.local_capable && mode == AccessMode::Local {
            warn!(
                device_id = %msg.device_id,
                kind = msg.kind.name(),
                "local-only mode refuses command that cannot go local"
            );
            return false;
        }

        if msg.local_capable && self.local_up.load(Ordering::Relaxed) {
            let info = self.directory.device_info(&msg.device_id);
            match info.and_then(|info| {
                let key = info.device_key;
                info.local_ip.map(|ip| (ip, key))
            }) {
                Some((ip, device_key)) => {
                    return self.send_local(msg, &ip, &device_key).await;
                }
                None => {
                    debug!(device_id = %msg.device_id, "device not resolvable locally, trying cloud");
                }
            }
        }

        if self.cloud_up.load(Ordering::Relaxed) {
            return self.send_cloud(msg).await;
        }

        error!(
            device_id = %msg.device_id,
            kind = msg.kind.name(),
            "no viable transport, dropping command"
        );
        false
    }

    async fn send_local(&self, msg: &CommandMessage, ip: &str, device_key: &str) -> bool {
        let sequence = msg.sequence.unwrap_or_default();
        let envelope = homelink_codec::encrypt(
            &msg.kind.params().to_string(),
            device_key,
            &msg.device_id,
            sequence,
        );
        let url = format!(
            "http://{}:{}/zeroconf/{}",
            ip,
            LOCAL_PORT,
            msg.kind.endpoint()
        );

        match self.local.send_local(&url, &envelope).await {
            Ok(()) => {
                debug!(device_id = %msg.device_id, sequence, %url, "sent over local transport");
                true
            }
            Err(e) => {
                error!(device_id = %msg.device_id, sequence, "local send failed: {}", e);
                false
            }
        }
    }

    async fn send_cloud(&self, msg: &CommandMessage) -> bool {
        let envelope = CloudEnvelope {
            sequence: msg.sequence.unwrap_or_default(),
            api_key: self.api_key.read().await.clone(),
            device_id: msg.device_id.clone(),
            params: msg.kind.params(),
        };

        match self.cloud.send_cloud(&envelope).await {
            Ok(()) => {
                debug!(device_id = %msg.device_id, sequence = envelope.sequence, "sent over cloud transport");
                true
            }
            Err(e) => {
                error!(device_id = %msg.device_id, sequence = envelope.sequence, "cloud send failed: {}", e);
                false
            }
        }
    }
}
