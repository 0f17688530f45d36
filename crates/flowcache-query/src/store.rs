//! Artifact access strategies.
//!
//! The engine fetches artifacts by key through one small trait; whether the
//! bytes come from a networked file server or a local directory is the
//! store's business. `FallbackStore` chains two strategies so a deployment
//! can prefer the network and fall back to a local copy.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("artifact not found: {key}")]
    NotFound { key: String },
    #[error("fetching artifact {key}")]
    Http {
        key: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading artifact {key}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Fetch an artifact's bytes by its cache key.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

// ============================================================================
// Filesystem store
// ============================================================================

/// Reads artifacts from a local cache directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.root.join(key);
        tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StoreError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }
}

// ============================================================================
// HTTP store
// ============================================================================

/// Fetches artifacts from a file server under one base URL.
pub struct HttpStore {
    base: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ArtifactStore for HttpStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = format!("{}/{}", self.base, key);
        let http_err = |source: reqwest::Error| StoreError::Http {
            key: key.to_string(),
            source,
        };

        let response = self.client.get(&url).send().await.map_err(http_err)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        let response = response.error_for_status().map_err(http_err)?;
        let bytes = response.bytes().await.map_err(http_err)?;
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// Fallback combinator
// ============================================================================

/// Tries the primary store first; any primary failure falls through to the
/// fallback (the primary error is logged, the fallback's error is the one
/// surfaced).
pub struct FallbackStore {
    primary: Arc<dyn ArtifactStore>,
    fallback: Arc<dyn ArtifactStore>,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn ArtifactStore>, fallback: Arc<dyn ArtifactStore>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl ArtifactStore for FallbackStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        match self.primary.get(key).await {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                tracing::warn!(key, error = %err, "primary artifact store failed, trying fallback");
                self.fallback.get(key).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl ArtifactStore for Failing {
        async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::NotFound {
                key: key.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn fs_store_distinguishes_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("summary.json"), b"{}").unwrap();

        let store = FsStore::new(dir.path());
        assert_eq!(store.get("summary.json").await.unwrap(), b"{}");
        assert!(store.get("missing.json").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn fallback_recovers_from_primary_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.json"), b"{}").unwrap();

        let store = FallbackStore::new(Arc::new(Failing), Arc::new(FsStore::new(dir.path())));
        assert_eq!(store.get("index.json").await.unwrap(), b"{}");
        assert!(store.get("missing.json").await.unwrap_err().is_not_found());
    }
}
