use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::normalize::slugify;

/// Source of the read-only static material bundled per subject.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_extra_info(&self, slug: &str) -> Result<Option<Value>>;
    async fn fetch_file_index(&self, slug: &str) -> Result<Option<Vec<String>>>;
}

/// Reads `<root>/<slug>/extra_info.json` and `<root>/<slug>/index.json`.
#[derive(Debug, Clone)]
pub struct FsResourceFetcher {
    root: PathBuf,
}

impl FsResourceFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, slug: &str, file: &str) -> Result<Option<T>> {
        let path = self.root.join(slug).join(file);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        let parsed = serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?;
        Ok(Some(parsed))
    }
}

#[async_trait]
impl ResourceFetcher for FsResourceFetcher {
    async fn fetch_extra_info(&self, slug: &str) -> Result<Option<Value>> {
        self.read_json(slug, "extra_info.json").await
    }

    async fn fetch_file_index(&self, slug: &str) -> Result<Option<Vec<String>>> {
        self.read_json(slug, "index.json").await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectResources {
    pub slug: String,
    pub extra_info: Option<Value>,
    pub file_index: Option<Vec<String>>,
    pub fetched_at: DateTime<Utc>,
}

/// Process-wide get-or-fetch cache keyed by subject slug. Misses are cached
/// too, until `invalidate` or `clear`.
#[derive(Clone)]
pub struct ResourceCache {
    cache: Arc<RwLock<HashMap<String, Arc<SubjectResources>>>>,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl ResourceCache {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            fetcher,
        }
    }

    /// Accepts a subject name or slug; both map to the same entry.
    pub async fn get_or_fetch(&self, name_or_slug: &str) -> Result<Arc<SubjectResources>> {
        let slug = slugify(name_or_slug);

        if let Some(cached) = self.cache.read().await.get(&slug) {
            debug!("Resource cache hit for {}", slug);
            return Ok(Arc::clone(cached));
        }

        debug!("Resource cache miss for {}, fetching", slug);
        let extra_info = self.fetcher.fetch_extra_info(&slug).await?;
        let file_index = self.fetcher.fetch_file_index(&slug).await?;
        let fetched = Arc::new(SubjectResources {
            slug: slug.clone(),
            extra_info,
            file_index,
            fetched_at: Utc::now(),
        });

        let mut cache = self.cache.write().await;
        // Another task may have filled the slot while we were fetching.
        let entry = cache.entry(slug).or_insert(fetched);
        Ok(Arc::clone(entry))
    }

    pub async fn invalidate(&self, name_or_slug: &str) -> bool {
        let slug = slugify(name_or_slug);
        let removed = self.cache.write().await.remove(&slug).is_some();
        if removed {
            debug!("Invalidated resource cache entry for {}", slug);
        }
        removed
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
        info!("Resource cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}
