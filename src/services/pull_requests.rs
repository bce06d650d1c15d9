//! services::pull_requests

use std::sync::Arc;

use super::fingerprint;
use crate::cache::{self, Cache};
use crate::control_plane::{GitServerService, GitServerSettings};
use crate::errors::Result;
use crate::models::{PullRequestListOptions, PullRequestsResponse};
use crate::providers::{lookup, ProviderRegistry};

/// Registry lookup plus caching for pull request listings. Every
/// state/page combination is its own cache entry.
pub struct PullRequestDispatcher {
    registry: Arc<ProviderRegistry>,
    cache: Cache<PullRequestsResponse>,
}

impl PullRequestDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            cache: cache::pull_request_cache(),
        }
    }

    pub fn cache(&self) -> Cache<PullRequestsResponse> {
        self.cache.clone()
    }

    pub async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
        opts: &PullRequestListOptions,
    ) -> Result<PullRequestsResponse> {
        let provider = lookup(&self.registry, settings.provider)?;

        let key = fingerprint(&[
            &settings.git_server_name,
            owner,
            repo,
            &opts.state,
            &opts.page.to_string(),
            &opts.per_page.to_string(),
        ]);

        let owner = owner.to_string();
        let repo = repo.to_string();
        let settings = settings.clone();
        let opts = opts.clone();

        self.cache
            .get_or_fetch(&key, move || {
                let provider = provider.clone();
                let owner = owner.clone();
                let repo = repo.clone();
                let settings = settings.clone();
                let opts = opts.clone();

                async move {
                    provider
                        .list_pull_requests(&owner, &repo, &settings, &opts)
                        .await
                }
            })
            .await
    }
}

/// Pull request operations keyed by git server name.
pub struct PullRequestService {
    git_servers: GitServerService,
    dispatcher: Arc<PullRequestDispatcher>,
}

impl PullRequestService {
    pub fn new(git_servers: GitServerService, dispatcher: Arc<PullRequestDispatcher>) -> Self {
        Self {
            git_servers,
            dispatcher,
        }
    }

    pub async fn list_pull_requests(
        &self,
        git_server_name: &str,
        owner: &str,
        repo: &str,
        opts: &PullRequestListOptions,
    ) -> Result<PullRequestsResponse> {
        let settings = self.git_servers.get_settings(git_server_name).await?;

        self.dispatcher
            .list_pull_requests(owner, repo, &settings, opts)
            .await
    }
}
