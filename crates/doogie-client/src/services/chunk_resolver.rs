use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::ApiError;
use super::http_client::ApiClient;

/// Chunk metadata from `GET /rag/chunks/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkInfo {
    pub chunk_id: String,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    pub document_id: String,
    pub document_title: String,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub document_filename: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Terminal outcome of resolving one chunk id.
///
/// `Failed` covers 404s — chunks legitimately disappear when documents are
/// reprocessed — and is terminal for the life of the process. The UI falls
/// back to showing the bare id with a search-in-admin link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResolution {
    Resolved {
        document_id: String,
        document_title: String,
    },
    Failed,
}

enum CacheEntry {
    /// Request in flight; listeners are woken once with the outcome.
    Loading(Vec<oneshot::Sender<ChunkResolution>>),
    Done(ChunkResolution),
}

/// Removes the `Loading` entry if the fetching future is dropped before it
/// completes, so attached listeners observe their closed channels instead of
/// hanging and the id stays retryable.
struct LoadingGuard<'a> {
    cache: &'a Mutex<HashMap<String, CacheEntry>>,
    id: String,
    armed: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut cache = self.cache.lock();
        if matches!(cache.get(&self.id), Some(CacheEntry::Loading(_))) {
            cache.remove(&self.id);
        }
    }
}

/// Process-wide cache mapping chunk id to its owning document.
///
/// Concurrent `resolve` calls for the same id coalesce onto one outgoing
/// request: the first caller fetches, later callers attach a listener to the
/// loading entry. Entries are immutable once the request completes.
pub struct ChunkResolver {
    client: Arc<ApiClient>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl ChunkResolver {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a set of chunk ids, deduplicated, returned in id order so
    /// callers can render a stable list.
    pub async fn resolve(&self, ids: &[String]) -> Vec<(String, ChunkResolution)> {
        let mut unique: Vec<String> = ids.to_vec();
        unique.sort();
        unique.dedup();

        let mut ready: HashMap<String, ChunkResolution> = HashMap::new();
        let mut waiters: Vec<(String, oneshot::Receiver<ChunkResolution>)> = Vec::new();
        let mut to_fetch: Vec<String> = Vec::new();

        {
            let mut cache = self.cache.lock();
            for id in &unique {
                match cache.get_mut(id) {
                    Some(CacheEntry::Done(resolution)) => {
                        ready.insert(id.clone(), resolution.clone());
                    }
                    Some(CacheEntry::Loading(listeners)) => {
                        let (tx, rx) = oneshot::channel();
                        listeners.push(tx);
                        waiters.push((id.clone(), rx));
                    }
                    None => {
                        cache.insert(id.clone(), CacheEntry::Loading(Vec::new()));
                        to_fetch.push(id.clone());
                    }
                }
            }
        }

        let fetches = to_fetch.into_iter().map(|id| self.fetch_one(id));
        for (id, resolution) in futures::future::join_all(fetches).await {
            ready.insert(id, resolution);
        }

        for (id, rx) in waiters {
            // A dropped sender means the fetching task was torn down; treat
            // the id as unresolved rather than hanging.
            let resolution = rx.await.unwrap_or(ChunkResolution::Failed);
            ready.insert(id, resolution);
        }

        unique
            .into_iter()
            .map(|id| {
                let resolution = ready.remove(&id).unwrap_or(ChunkResolution::Failed);
                (id, resolution)
            })
            .collect()
    }

    /// Non-blocking cache read for in-place UI updates.
    pub fn lookup(&self, id: &str) -> Option<ChunkResolution> {
        match self.cache.lock().get(id) {
            Some(CacheEntry::Done(resolution)) => Some(resolution.clone()),
            _ => None,
        }
    }

    async fn fetch_one(&self, id: String) -> (String, ChunkResolution) {
        let mut guard = LoadingGuard {
            cache: &self.cache,
            id: id.clone(),
            armed: true,
        };
        let resolution = match self
            .client
            .get::<ChunkInfo>(&format!("/rag/chunks/{id}"))
            .await
        {
            Ok(info) => ChunkResolution::Resolved {
                document_id: info.document_id,
                document_title: info.document_title,
            },
            Err(ApiError::NotFound) => {
                debug!(chunk_id = %id, "Chunk no longer exists");
                ChunkResolution::Failed
            }
            Err(e) => {
                warn!(chunk_id = %id, error = %e, "Chunk resolution failed");
                ChunkResolution::Failed
            }
        };

        // Loading -> Done transitions exactly once; listeners fire once.
        let listeners = {
            let mut cache = self.cache.lock();
            guard.armed = false;
            match cache.insert(id.clone(), CacheEntry::Done(resolution.clone())) {
                Some(CacheEntry::Loading(listeners)) => listeners,
                _ => Vec::new(),
            }
        };
        for tx in listeners {
            let _ = tx.send(resolution.clone());
        }

        (id, resolution)
    }
}
