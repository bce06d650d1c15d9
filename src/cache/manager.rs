//! cache::manager
//!
//! Central registry of the named caches, used by the invalidation
//! endpoint.

use std::sync::Arc;

use super::Cache;
use crate::errors::{GfError, Result};

/// Object-safe view of a cache, independent of its value type.
pub trait ManagedCache: Send + Sync {
    fn scan_keys(&self) -> Vec<String>;
    fn delete(&self, key: &str);
}

impl<T: Clone + Send + Sync + 'static> ManagedCache for Cache<T> {
    fn scan_keys(&self) -> Vec<String> {
        Cache::scan_keys(self)
    }

    fn delete(&self, key: &str) {
        Cache::delete(self, key)
    }
}

/// Registry of `{endpoint → cache}` for explicit invalidation.
pub struct Manager {
    caches: Vec<(&'static str, Arc<dyn ManagedCache>)>,
}

impl Manager {
    pub fn new(
        repositories: Arc<dyn ManagedCache>,
        organizations: Arc<dyn ManagedCache>,
        branches: Arc<dyn ManagedCache>,
        pull_requests: Arc<dyn ManagedCache>,
        pipelines: Arc<dyn ManagedCache>,
    ) -> Self {
        Self {
            caches: vec![
                ("repositories", repositories),
                ("organizations", organizations),
                ("branches", branches),
                ("pullrequests", pull_requests),
                ("pipelines", pipelines),
            ],
        }
    }

    /// Drop every key in the named cache.
    pub fn invalidate(&self, endpoint: &str) -> Result<()> {
        let cache = self
            .caches
            .iter()
            .find(|(name, _)| *name == endpoint)
            .map(|(_, cache)| cache)
            .ok_or_else(|| GfError::BadRequest("unsupported endpoint".into()))?;

        for key in cache.scan_keys() {
            cache.delete(&key);
        }

        Ok(())
    }

    pub fn supported_endpoints(&self) -> Vec<&'static str> {
        self.caches.iter().map(|(name, _)| *name).collect()
    }
}
