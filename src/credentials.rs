//! Per-caller upstream credentials.
//!
//! Credentials are stored encrypted at rest and decrypted with a single process-wide
//! AES-256-GCM key each time an analytics operation runs. The stored form is
//! `base64(nonce || ciphertext)`.

use crate::error::AnalyticsError;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

const NONCE_LEN: usize = 12;

/// A decrypted upstream access token, scoped to one analytics operation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// A credential as held by the store.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct EncryptedCredential(String);

impl EncryptedCredential {
    pub fn new(sealed: impl Into<String>) -> Self {
        Self(sealed.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lookup of stored credentials by verified caller identity.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup(&self, caller_id: &str) -> Option<EncryptedCredential>;
}

#[derive(Deserialize)]
struct StoredCredential {
    caller_id: String,
    encrypted_token: EncryptedCredential,
}

/// Credential store held in process memory.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: RwLock<HashMap<String, EncryptedCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads entries from a JSON array of `{ "caller_id", "encrypted_token" }` objects.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let stored: Vec<StoredCredential> =
            serde_json::from_str(json).context("credentials file is not valid JSON")?;
        tracing::info!(count = stored.len(), "Loaded stored credentials");
        let entries = stored
            .into_iter()
            .map(|entry| (entry.caller_id, entry.encrypted_token))
            .collect();
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read credentials file {}", path.display()))?;
        Self::from_json(&json)
    }

    pub async fn insert(&self, caller_id: impl Into<String>, credential: EncryptedCredential) {
        self.entries
            .write()
            .await
            .insert(caller_id.into(), credential);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn lookup(&self, caller_id: &str) -> Option<EncryptedCredential> {
        self.entries.read().await.get(caller_id).cloned()
    }
}

/// AES-256-GCM cipher over the process-wide credential key.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn from_key(key: &[u8]) -> anyhow::Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| anyhow::anyhow!("credential key must be 32 bytes, got {}", key.len()))?;
        Ok(Self { cipher })
    }

    /// Builds the cipher from a base64 encoded key, as found in configuration.
    pub fn from_base64_key(encoded: &str) -> anyhow::Result<Self> {
        let key = STANDARD
            .decode(encoded.trim())
            .context("credential key is not valid base64")?;
        Self::from_key(&key)
    }

    pub fn encrypt(&self, token: &str) -> anyhow::Result<EncryptedCredential> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, token.as_bytes())
            .map_err(|_| anyhow::anyhow!("failed to encrypt credential"))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(EncryptedCredential(STANDARD.encode(sealed)))
    }

    pub fn decrypt(&self, sealed: &EncryptedCredential) -> Result<Credential, AnalyticsError> {
        let bytes = STANDARD
            .decode(sealed.as_str())
            .map_err(|e| corrupt(format!("not valid base64: {e}")))?;
        if bytes.len() <= NONCE_LEN {
            return Err(corrupt(format!(
                "sealed credential is {} bytes, too short to hold a nonce and ciphertext",
                bytes.len()
            )));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| corrupt("authentication tag mismatch".to_string()))?;
        let token =
            String::from_utf8(plaintext).map_err(|_| corrupt("token is not UTF-8".to_string()))?;

        Ok(Credential(token))
    }
}

fn corrupt(reason: String) -> AnalyticsError {
    AnalyticsError::CredentialCorrupt { reason }
}

/// Resolves the upstream credential for a verified caller.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
    cipher: CredentialCipher,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>, cipher: CredentialCipher) -> Self {
        Self { store, cipher }
    }

    /// Looks up and decrypts the caller's credential. Neither a miss nor a decrypt failure
    /// is retried.
    pub async fn resolve(&self, caller_id: &str) -> Result<Credential, AnalyticsError> {
        let Some(sealed) = self.store.lookup(caller_id).await else {
            tracing::warn!(caller = %caller_id, "No stored credential for caller");
            return Err(AnalyticsError::UnknownCaller {
                caller_id: caller_id.to_string(),
            });
        };

        self.cipher.decrypt(&sealed).inspect_err(|e| {
            tracing::error!(caller = %caller_id, "Stored credential is unusable: {}", e);
        })
    }
}
