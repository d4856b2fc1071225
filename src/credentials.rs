//! Credential store contract and implementations.
//!
//! The store owns broker secrets; the Auth Manager only ever reads through
//! it. Encryption at rest is the store's responsibility; the environment
//! and in-memory implementations here are for development and tests, with
//! secrets wrapped in `zeroize` so they are wiped from memory on drop.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;
use zeroize::Zeroizing;

use crate::domain::entities::broker::BrokerId;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("No credential stored for {0}")]
    NotFound(BrokerId),

    #[error("Credential store is read-only")]
    ReadOnly,

    #[error("Credential validation failed: {0}")]
    ValidationFailed(String),
}

/// Opaque secret bundle for one broker.
pub struct BrokerCredential {
    pub api_key: Zeroizing<String>,
    pub api_secret: Zeroizing<String>,
    /// Broker-specific extra material (TOTP seed, client id).
    pub extra: Option<Zeroizing<String>>,
}

impl BrokerCredential {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        BrokerCredential {
            api_key: Zeroizing::new(api_key.into()),
            api_secret: Zeroizing::new(api_secret.into()),
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(Zeroizing::new(extra.into()));
        self
    }
}

/// Contract the Auth Manager depends on.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, broker: BrokerId) -> Result<BrokerCredential, CredentialError>;
    async fn put(&self, broker: BrokerId, credential: BrokerCredential)
        -> Result<(), CredentialError>;
    async fn delete(&self, broker: BrokerId) -> Result<(), CredentialError>;
}

/// Reads credentials from `DALALI_<BROKER>_API_KEY` / `_API_SECRET` /
/// `_EXTRA` environment variables. Read-only.
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    fn var(broker: BrokerId, suffix: &str) -> Option<Zeroizing<String>> {
        let name = format!("DALALI_{}_{}", broker.key().to_uppercase(), suffix);
        std::env::var(&name).ok().map(Zeroizing::new)
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, broker: BrokerId) -> Result<BrokerCredential, CredentialError> {
        let api_key = Self::var(broker, "API_KEY").ok_or(CredentialError::NotFound(broker))?;
        let api_secret = Self::var(broker, "API_SECRET").ok_or(CredentialError::NotFound(broker))?;
        warn!(
            "Loading {} credentials from environment variables (insecure for production)",
            broker
        );
        Ok(BrokerCredential {
            api_key,
            api_secret,
            extra: Self::var(broker, "EXTRA"),
        })
    }

    async fn put(&self, _broker: BrokerId, _credential: BrokerCredential)
        -> Result<(), CredentialError> {
        Err(CredentialError::ReadOnly)
    }

    async fn delete(&self, _broker: BrokerId) -> Result<(), CredentialError> {
        Err(CredentialError::ReadOnly)
    }
}

/// Mutable in-memory store, used in tests and as a session-scoped cache.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<BrokerId, BrokerCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, broker: BrokerId) -> Result<BrokerCredential, CredentialError> {
        let entries = self.entries.lock().await;
        let credential = entries.get(&broker).ok_or(CredentialError::NotFound(broker))?;
        Ok(BrokerCredential {
            api_key: credential.api_key.clone(),
            api_secret: credential.api_secret.clone(),
            extra: credential.extra.clone(),
        })
    }

    async fn put(&self, broker: BrokerId, credential: BrokerCredential)
        -> Result<(), CredentialError> {
        validate_secret_strength(&credential.api_secret, 8)?;
        self.entries.lock().await.insert(broker, credential);
        Ok(())
    }

    async fn delete(&self, broker: BrokerId) -> Result<(), CredentialError> {
        self.entries
            .lock()
            .await
            .remove(&broker)
            .map(|_| ())
            .ok_or(CredentialError::NotFound(broker))
    }
}

/// Reject obviously weak secrets before they reach a broker.
pub fn validate_secret_strength(secret: &str, min_length: usize) -> Result<(), CredentialError> {
    if secret.len() < min_length {
        return Err(CredentialError::ValidationFailed(format!(
            "Secret too short: {} characters (minimum: {})",
            secret.len(),
            min_length
        )));
    }
    let weak_patterns = ["changeme", "placeholder", "example", "12345"];
    let lowered = secret.to_lowercase();
    for pattern in &weak_patterns {
        if lowered.contains(pattern) {
            return Err(CredentialError::ValidationFailed(format!(
                "Secret contains weak pattern: {}",
                pattern
            )));
        }
    }
    Ok(())
}
