//! Object storage for generated artifacts.
//!
//! Paths handed to these backends are always tenant-namespaced by
//! [`crate::carnet::paths`]; the backends themselves are tenant-agnostic.

use std::env;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object '{0}' not found")]
    NotFound(String),
    #[error("invalid object path '{0}'")]
    InvalidPath(String),
    #[error("storage I/O failed for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage request failed: {0}")]
    Remote(String),
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` at `path`, replacing any previous object. Readers never
    /// observe a partially written object.
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Absolute URL for a stored object, used for assets embedded in cards.
    fn public_url(&self, path: &str) -> String;
}

/// Filesystem-backed storage rooted at a directory.
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(path: &str, source: std::io::Error) -> StorageError {
    if source.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io {
            path: path.to_string(),
            source,
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(&self, path: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(path, e))?;
        }

        // Write beside the target and rename so a crash never leaves a truncated file.
        let staging = target.with_extension(format!("{}.partial", Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&staging, data).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error(path, e));
        }
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error(path, e));
        }

        log::debug!("Stored {} bytes at {}", data.len(), target.display());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target).await.map_err(|e| io_error(path, e))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path, e)),
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub bucket_name: String,
}

impl SupabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let supabase_url = env::var("SUPABASE_URL").map_err(|_| ConfigError::Missing("SUPABASE_URL"))?;
        let supabase_anon_key =
            env::var("SUPABASE_ANON_KEY").map_err(|_| ConfigError::Missing("SUPABASE_ANON_KEY"))?;
        let bucket_name = env::var("BUCKET_NAME").unwrap_or_else(|_| "carnets".to_string());

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
            bucket_name,
        })
    }
}

/// Supabase Storage REST backend.
pub struct SupabaseStorage {
    config: SupabaseConfig,
    client: reqwest::Client,
}

impl SupabaseStorage {
    pub fn new(config: SupabaseConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.supabase_url,
            self.config.bucket_name,
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.config.supabase_anon_key)
            .header("apikey", &self.config.supabase_anon_key)
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .authorized(self.client.post(self.object_url(path)))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| StorageError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Remote(format!(
                "upload of '{}' failed with {}: {}",
                path, status, body
            )));
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .authorized(self.client.get(self.object_url(path)))
            .send()
            .await
            .map_err(|e| StorageError::Remote(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map(|bytes| bytes.to_vec())
                .map_err(|e| StorageError::Remote(e.to_string())),
            // Supabase answers 400 with a "not_found" body for missing objects.
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::BAD_REQUEST => {
                Err(StorageError::NotFound(path.to_string()))
            }
            status => Err(StorageError::Remote(format!(
                "download of '{}' failed with {}",
                path, status
            ))),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let response = self
            .authorized(self.client.delete(self.object_url(path)))
            .send()
            .await
            .map_err(|e| StorageError::Remote(e.to_string()))?;

        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(StorageError::Remote(format!(
                "delete of '{}' failed with {}",
                path,
                response.status()
            )))
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.supabase_url,
            self.config.bucket_name,
            path.trim_start_matches('/')
        )
    }
}
