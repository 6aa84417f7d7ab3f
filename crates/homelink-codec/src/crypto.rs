//! Symmetric encryption and authentication primitives.
//!
//! The per-device AES-128 key is the MD5 digest of the device secret, the
//! format the devices themselves implement. Every encryption draws a fresh
//! random IV; an IV is never reused across calls.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::envelope::{EncryptedPayload, LocalCommandEnvelope, CLIENT_KEY_MARKER};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Error type for codec operations.
///
/// Callers treat any error as "no usable payload" and drop the single
/// message; codec failures never abort the processing loop.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload is missing an initialization vector")]
    MissingIv,

    #[error("invalid base64 payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("initialization vector has the wrong length")]
    InvalidIv,

    #[error("decryption failed")]
    DecryptFailed,

    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Derive the 16-byte AES key for a device from its secret.
fn derive_key(device_key: &str) -> [u8; 16] {
    let digest = Md5::digest(device_key.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest);
    key
}

/// Encrypt a command payload for local delivery.
///
/// Draws a fresh random IV on every call, so two encryptions of identical
/// input never share an IV or ciphertext.
pub fn encrypt(
    plaintext: &str,
    device_key: &str,
    device_id: &str,
    sequence: u64,
) -> LocalCommandEnvelope {
    let key = derive_key(device_key);
    let mut iv = [0u8; 16];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes128CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    LocalCommandEnvelope {
        sequence: sequence.to_string(),
        device_id: device_id.to_string(),
        client_key: CLIENT_KEY_MARKER.to_string(),
        iv: BASE64.encode(iv),
        encrypted: true,
        data: BASE64.encode(ciphertext),
    }
}

/// Decrypt an encrypted payload arriving from the local transport.
///
/// Fragments are concatenated before decoding. Missing IV, wrong key or
/// malformed input yields an error rather than a panic.
pub fn decrypt(payload: &EncryptedPayload, device_key: &str) -> Result<String, CodecError> {
    let iv_encoded = payload.iv.as_deref().ok_or(CodecError::MissingIv)?;
    let iv = BASE64.decode(iv_encoded)?;
    let ciphertext = BASE64.decode(payload.joined_data())?;

    let iv: [u8; 16] = iv.try_into().map_err(|_| CodecError::InvalidIv)?;
    let key = derive_key(device_key);

    let plaintext = Aes128CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CodecError::DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| CodecError::InvalidUtf8)
}

/// Compute the Base64 HMAC-SHA256 digest authenticating a login request.
///
/// Deterministic: identical secret and data always reproduce the same
/// digest.
pub fn auth_mac(secret: &str, data: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}
