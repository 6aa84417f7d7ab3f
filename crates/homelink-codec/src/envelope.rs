//! Wire envelopes for the local transport.

use serde::{Deserialize, Serialize};

/// Fixed marker sent in place of a real controller key on local requests.
///
/// Devices echo it back but do not validate it; authentication of the
/// payload itself comes from the shared device key.
pub const CLIENT_KEY_MARKER: &str = "homelink-controller";

/// Encrypted command request sent to a device's LAN endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCommandEnvelope {
    /// Correlation sequence, carried as a string on the wire
    pub sequence: String,
    /// Target device ID
    pub device_id: String,
    /// Fixed client-key marker
    pub client_key: String,
    /// Base64 initialization vector
    pub iv: String,
    /// Always true for command requests
    pub encrypted: bool,
    /// Base64 ciphertext
    pub data: String,
}

/// Encrypted payload split across up to four announce fragments.
///
/// The local discovery protocol caps each record field at 255 bytes, so
/// longer ciphertexts arrive split across `data1..data4` and must be
/// concatenated in order before Base64 decoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 initialization vector
    #[serde(default)]
    pub iv: Option<String>,
    #[serde(default)]
    pub data1: Option<String>,
    #[serde(default)]
    pub data2: Option<String>,
    #[serde(default)]
    pub data3: Option<String>,
    #[serde(default)]
    pub data4: Option<String>,
}

impl EncryptedPayload {
    /// Build a single-fragment payload.
    pub fn from_data(iv: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            iv: Some(iv.into()),
            data1: Some(data.into()),
            ..Default::default()
        }
    }

    /// Concatenate the fragments in order, skipping absent ones.
    pub fn joined_data(&self) -> String {
        let mut joined = String::new();
        for fragment in [&self.data1, &self.data2, &self.data3, &self.data4] {
            if let Some(part) = fragment {
                joined.push_str(part);
            }
        }
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_join_in_order() {
        let payload = EncryptedPayload {
            iv: Some("aXY=".to_string()),
            data1: Some("AA".to_string()),
            data2: Some("BB".to_string()),
            data3: None,
            data4: Some("DD".to_string()),
        };

        assert_eq!(payload.joined_data(), "AABBDD");
    }

    #[test]
    fn test_envelope_wire_names_are_camel_case() {
        let envelope = LocalCommandEnvelope {
            sequence: "42".to_string(),
            device_id: "dev1".to_string(),
            client_key: CLIENT_KEY_MARKER.to_string(),
            iv: "aXY=".to_string(),
            encrypted: true,
            data: "Y2lwaGVy".to_string(),
        };

        let wire = serde_json::to_value(&envelope).unwrap();
        assert!(wire.get("deviceId").is_some());
        assert!(wire.get("clientKey").is_some());
        assert_eq!(wire["encrypted"], true);
    }
}
