//! Object storage collaborator used by the artifact and image executors.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{KilnError, Result};

/// How long signed URLs handed to clients stay valid.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Narrow object-storage contract: put bytes, then sign a URL for them.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// A stored object and its client URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// Content-addressed key: `<prefix>/<sha256 hex>.<ext>`.
pub fn content_key(prefix: &str, ext: &str, bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}/{hex}.{ext}")
}

/// Put then sign. Either step failing fails the whole persist.
pub async fn persist(
    store: &dyn ObjectStore,
    key: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<StoredObject> {
    store.put(key, bytes, content_type).await?;
    let url = store.signed_url(key, SIGNED_URL_TTL).await?;
    Ok(StoredObject {
        key: key.to_string(),
        url,
    })
}

/// Process-local store, for development and tests.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    base_url: String,
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl InMemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.read().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| KilnError::Unknown("object store lock poisoned".into()))?;
        objects.insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String> {
        if self.get(key).is_none() {
            return Err(KilnError::Unknown(format!("no object at {key}")));
        }
        Ok(format!("{}/{key}?expires_in={}", self.base_url, ttl.as_secs()))
    }
}
