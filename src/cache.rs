//! Bounded result cache wrapped around the whole workflow

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde_json::json;
use tracing::debug;

use crate::config::CacheConfig;
use crate::generator::GenerationRequest;
use crate::orchestrator::WorkflowResult;

struct CacheEntry {
    result: WorkflowResult,
    stored_at: Instant,
}

pub struct WorkflowCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

/// Stable key over the fields that shape a workflow's output
///
/// Correlation ids and cache flags are excluded so retries of the same
/// request share an entry.
pub fn cache_key(request: &GenerationRequest) -> String {
    let canonical = json!({
        "content_type": request.content_type,
        "context": request.context,
        "temperature": request.options.temperature,
        "max_tokens": request.options.max_tokens,
    });
    blake3::hash(canonical.to_string().as_bytes())
        .to_hex()
        .to_string()
}

impl WorkflowCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<WorkflowResult> {
        let mut entries = self.entries();
        let expired = match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                debug!(key, "Workflow cache hit");
                return Some(entry.result.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!(key, "Workflow cache entry expired");
            entries.pop(key);
        }
        None
    }

    pub fn put(&self, key: String, result: WorkflowResult) {
        self.entries().put(
            key,
            CacheEntry {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
