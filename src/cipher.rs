//! Encryption-at-rest capability for credential payloads.
//!
//! Generated credentials and failure messages are only ever persisted as
//! [`SealedBlob`]s produced by a [`Cipher`]. Cipher failures are fatal and
//! never retried: a blob that cannot be opened is treated as corruption,
//! not as "no credentials".

use crate::{KeyturnError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// AES-256-GCM nonce length in bytes, prepended to every sealed payload.
const NONCE_LEN: usize = 12;

/// Ciphertext produced by a [`Cipher`]. Opaque to every component except
/// through [`Cipher::open`]. Serializes as base64 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob(Vec<u8>);

impl SealedBlob {
    /// Wraps raw ciphertext bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw ciphertext.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Ciphertext length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SealedBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for SealedBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(text.as_bytes())
            .map_err(|e| D::Error::custom(format!("invalid base64 sealed blob: {}", e)))?;
        Ok(Self(bytes))
    }
}

/// Seals and opens credential payloads at rest.
///
/// Implementations must be `Send + Sync`. The crate ships
/// [`AesGcmCipher`]; deployments with an external KMS inject their own.
#[async_trait]
pub trait Cipher: Send + Sync {
    /// Encrypts a plaintext payload.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::Fatal`] on any encryption failure.
    async fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob>;

    /// Decrypts a sealed payload.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::Fatal`] if the blob is truncated, tampered
    /// with, or sealed under a different key. The error message never
    /// includes the payload.
    async fn open(&self, blob: &SealedBlob) -> Result<Vec<u8>>;
}

/// AES-256-GCM cipher with a random nonce per seal.
///
/// The sealed layout is `nonce || ciphertext`; the nonce is not secret.
///
/// # Example
///
/// ```
/// use keyturn::cipher::{AesGcmCipher, Cipher};
///
/// #[tokio::main]
/// async fn main() -> keyturn::Result<()> {
///     let cipher = AesGcmCipher::generate();
///
///     let blob = cipher.seal(b"s3cret").await?;
///     let plaintext = cipher.open(&blob).await?;
///     assert_eq!(plaintext, b"s3cret");
///     Ok(())
/// }
/// ```
pub struct AesGcmCipher {
    key: Aes256Gcm,
}

impl AesGcmCipher {
    /// Creates a cipher from a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyturnError::Fatal`] if the key is not exactly 32 bytes.
    pub fn new(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != 32 {
            return Err(KeyturnError::Fatal(format!(
                "cipher key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            key: Aes256Gcm::new(key),
        })
    }

    /// Creates a cipher from a base64-encoded 32-byte key, the usual shape
    /// of a key handed down through configuration.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| KeyturnError::Fatal(format!("cipher key is not valid base64: {}", e)))?;
        Self::new(&bytes)
    }

    /// Creates a cipher with a freshly generated random key.
    ///
    /// Convenient for tests and ephemeral deployments; production setups
    /// should provision a stable key so sealed rows survive restarts.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            key: Aes256Gcm::new(&key),
        }
    }
}

#[async_trait]
impl Cipher for AesGcmCipher {
    async fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .key
            .encrypt(&nonce, plaintext)
            .map_err(|_| KeyturnError::Fatal("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(SealedBlob::new(sealed))
    }

    async fn open(&self, blob: &SealedBlob) -> Result<Vec<u8>> {
        let bytes = blob.as_bytes();
        if bytes.len() <= NONCE_LEN {
            return Err(KeyturnError::Fatal(
                "sealed blob is truncated".to_string(),
            ));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        self.key
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| KeyturnError::Fatal("failed to open sealed blob".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seal_open_round_trip() {
        let cipher = AesGcmCipher::generate();

        let blob = cipher.seal(b"username=app_user_1;password=hunter2").await.unwrap();
        let plaintext = cipher.open(&blob).await.unwrap();

        assert_eq!(plaintext, b"username=app_user_1;password=hunter2");
    }

    #[tokio::test]
    async fn test_distinct_nonces_per_seal() {
        let cipher = AesGcmCipher::generate();

        let a = cipher.seal(b"same").await.unwrap();
        let b = cipher.seal(b"same").await.unwrap();

        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_tampered_blob_is_fatal() {
        let cipher = AesGcmCipher::generate();

        let blob = cipher.seal(b"payload").await.unwrap();
        let mut bytes = blob.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let result = cipher.open(&SealedBlob::new(bytes)).await;
        assert!(matches!(result, Err(KeyturnError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_is_fatal() {
        let sealer = AesGcmCipher::generate();
        let opener = AesGcmCipher::generate();

        let blob = sealer.seal(b"payload").await.unwrap();
        let result = opener.open(&blob).await;

        assert!(matches!(result, Err(KeyturnError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_truncated_blob_is_fatal() {
        let cipher = AesGcmCipher::generate();
        let result = cipher.open(&SealedBlob::new(vec![0u8; 4])).await;
        assert!(matches!(result, Err(KeyturnError::Fatal(_))));
    }

    #[test]
    fn test_key_length_enforced() {
        assert!(AesGcmCipher::new(&[0u8; 16]).is_err());
        assert!(AesGcmCipher::new(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_sealed_blob_serde_round_trip() {
        let blob = SealedBlob::new(vec![1, 2, 3, 250]);
        let json = serde_json::to_string(&blob).unwrap();
        let back: SealedBlob = serde_json::from_str(&json).unwrap();
        assert_eq!(blob, back);
    }

    #[test]
    fn test_sealed_blob_serde_rejects_bad_base64() {
        let result: std::result::Result<SealedBlob, _> = serde_json::from_str("\"not base64!!\"");
        assert!(result.is_err());
    }
}
