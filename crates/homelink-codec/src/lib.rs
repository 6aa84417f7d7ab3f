//! Local-transport payload codec.
//!
//! Devices on the LAN speak an encrypted JSON protocol: AES-128-CBC with a
//! key derived from the per-device secret and a fresh IV on every message,
//! plus an HMAC-SHA256 digest authenticating the cloud login handshake.

pub mod crypto;
pub mod envelope;

pub use crypto::{auth_mac, decrypt, encrypt, CodecError};
pub use envelope::{EncryptedPayload, LocalCommandEnvelope, CLIENT_KEY_MARKER};
