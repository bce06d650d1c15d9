//! services::branches

use std::sync::Arc;

use super::fingerprint;
use crate::cache::{self, Cache};
use crate::control_plane::{GitServerService, GitServerSettings};
use crate::errors::Result;
use crate::models::Branch;
use crate::providers::{lookup, ProviderRegistry};

/// Registry lookup plus caching for branch listings.
pub struct BranchDispatcher {
    registry: Arc<ProviderRegistry>,
    cache: Cache<Vec<Branch>>,
}

impl BranchDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            cache: cache::branch_cache(),
        }
    }

    pub fn cache(&self) -> Cache<Vec<Branch>> {
        self.cache.clone()
    }

    pub async fn list_branches(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Vec<Branch>> {
        let provider = lookup(&self.registry, settings.provider)?;

        // Trailing empty segment reserved for a future name filter, so
        // keys stay stable if one is added.
        let key = fingerprint(&[&settings.git_server_name, owner, repo, ""]);

        let owner = owner.to_string();
        let repo = repo.to_string();
        let settings = settings.clone();

        self.cache
            .get_or_fetch(&key, move || {
                let provider = provider.clone();
                let owner = owner.clone();
                let repo = repo.clone();
                let settings = settings.clone();

                async move { provider.list_branches(&owner, &repo, &settings).await }
            })
            .await
    }
}

/// Branch operations keyed by git server name.
pub struct BranchService {
    git_servers: GitServerService,
    dispatcher: Arc<BranchDispatcher>,
}

impl BranchService {
    pub fn new(git_servers: GitServerService, dispatcher: Arc<BranchDispatcher>) -> Self {
        Self {
            git_servers,
            dispatcher,
        }
    }

    pub async fn list_branches(
        &self,
        git_server_name: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<Branch>> {
        let settings = self.git_servers.get_settings(git_server_name).await?;

        self.dispatcher.list_branches(owner, repo, &settings).await
    }
}
