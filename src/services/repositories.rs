//! services::repositories

use std::sync::Arc;

use super::fingerprint;
use crate::cache::{self, Cache};
use crate::control_plane::{GitServerService, GitServerSettings};
use crate::errors::Result;
use crate::models::{ListOptions, Repository};
use crate::providers::{lookup, ProviderRegistry};

/// Registry lookup plus caching for repository reads.
pub struct RepositoryDispatcher {
    registry: Arc<ProviderRegistry>,
    cache: Cache<Vec<Repository>>,
}

impl RepositoryDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            cache: cache::repository_cache(),
        }
    }

    pub fn cache(&self) -> Cache<Vec<Repository>> {
        self.cache.clone()
    }

    /// Single-repository reads bypass the cache.
    pub async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Repository> {
        let provider = lookup(&self.registry, settings.provider)?;

        provider.get_repository(owner, repo, settings).await
    }

    pub async fn list_repositories(
        &self,
        owner: &str,
        settings: &GitServerSettings,
        opts: &ListOptions,
    ) -> Result<Vec<Repository>> {
        let provider = lookup(&self.registry, settings.provider)?;

        let key = fingerprint(&[
            &settings.git_server_name,
            owner,
            opts.name.as_deref().unwrap_or(""),
        ]);

        let owner = owner.to_string();
        let settings = settings.clone();
        let opts = opts.clone();

        self.cache
            .get_or_fetch(&key, move || {
                let provider = provider.clone();
                let owner = owner.clone();
                let settings = settings.clone();
                let opts = opts.clone();

                async move { provider.list_repositories(&owner, &settings, &opts).await }
            })
            .await
    }
}

/// Repository operations keyed by git server name.
pub struct RepositoryService {
    git_servers: GitServerService,
    dispatcher: Arc<RepositoryDispatcher>,
}

impl RepositoryService {
    pub fn new(git_servers: GitServerService, dispatcher: Arc<RepositoryDispatcher>) -> Self {
        Self {
            git_servers,
            dispatcher,
        }
    }

    pub async fn get_repository(
        &self,
        git_server_name: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Repository> {
        let settings = self.git_servers.get_settings(git_server_name).await?;

        self.dispatcher.get_repository(owner, repo, &settings).await
    }

    pub async fn list_repositories(
        &self,
        git_server_name: &str,
        owner: &str,
        opts: &ListOptions,
    ) -> Result<Vec<Repository>> {
        let settings = self.git_servers.get_settings(git_server_name).await?;

        self.dispatcher
            .list_repositories(owner, &settings, opts)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::testing::{github_record, InMemoryControlPlane};
    use crate::control_plane::Provider;
    use crate::errors::GfError;
    use crate::models::{
        Branch, Organization, PipelineListOptions, PipelineResponse, PipelineVariable,
        PipelinesResponse, PullRequestListOptions, PullRequestsResponse,
    };
    use crate::providers::GitProvider;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counting stub adapter. Only the repository capabilities answer;
    /// the rest are unreachable in these tests.
    pub(crate) struct StubProvider {
        pub calls: AtomicUsize,
        pub repos: Vec<Repository>,
    }

    impl StubProvider {
        pub(crate) fn with_repos(repos: Vec<Repository>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                repos,
            }
        }
    }

    fn repo(name: &str) -> Repository {
        Repository {
            id: name.to_string(),
            name: name.to_string(),
            owner: None,
            url: None,
            default_branch: None,
            description: None,
            visibility: None,
        }
    }

    #[async_trait]
    impl GitProvider for StubProvider {
        async fn get_repository(
            &self,
            _owner: &str,
            repo_name: &str,
            _settings: &GitServerSettings,
        ) -> Result<Repository> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            self.repos
                .iter()
                .find(|r| r.name == repo_name)
                .cloned()
                .ok_or_else(|| GfError::NotFound(format!("repository {repo_name} not found")))
        }

        async fn list_repositories(
            &self,
            _owner: &str,
            _settings: &GitServerSettings,
            opts: &ListOptions,
        ) -> Result<Vec<Repository>> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            Ok(self
                .repos
                .iter()
                .filter(|r| crate::providers::matches_name_filter(&r.name, opts.name.as_deref()))
                .cloned()
                .collect())
        }

        async fn list_user_organizations(
            &self,
            _settings: &GitServerSettings,
        ) -> Result<Vec<Organization>> {
            unreachable!()
        }

        async fn list_branches(
            &self,
            _owner: &str,
            _repo: &str,
            _settings: &GitServerSettings,
        ) -> Result<Vec<Branch>> {
            unreachable!()
        }

        async fn list_pull_requests(
            &self,
            _owner: &str,
            _repo: &str,
            _settings: &GitServerSettings,
            _opts: &PullRequestListOptions,
        ) -> Result<PullRequestsResponse> {
            unreachable!()
        }

        async fn list_pipelines(
            &self,
            _project: &str,
            _settings: &GitServerSettings,
            _opts: &PipelineListOptions,
        ) -> Result<PipelinesResponse> {
            unreachable!()
        }

        async fn trigger_pipeline(
            &self,
            _project: &str,
            _ref_name: &str,
            _variables: &[PipelineVariable],
            _settings: &GitServerSettings,
        ) -> Result<PipelineResponse> {
            unreachable!()
        }
    }

    fn registry_with(provider: Arc<StubProvider>) -> Arc<ProviderRegistry> {
        let mut registry: ProviderRegistry = HashMap::new();
        registry.insert(Provider::GitHub, provider);

        Arc::new(registry)
    }

    fn settings() -> GitServerSettings {
        GitServerSettings {
            url: String::new(),
            token: "tok".into(),
            provider: Provider::GitHub,
            git_server_name: "srv".into(),
        }
    }

    #[tokio::test]
    async fn list_hits_cache_on_repeat() {
        let stub = Arc::new(StubProvider::with_repos(vec![repo("widget")]));
        let dispatcher = RepositoryDispatcher::new(registry_with(stub.clone()));

        let opts = ListOptions::default();
        let first = dispatcher
            .list_repositories("acme", &settings(), &opts)
            .await
            .unwrap();
        let second = dispatcher
            .list_repositories("acme", &settings(), &opts)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn name_filter_gets_its_own_cache_entry() {
        let stub = Arc::new(StubProvider::with_repos(vec![repo("widget"), repo("gadget")]));
        let dispatcher = RepositoryDispatcher::new(registry_with(stub.clone()));

        let all = dispatcher
            .list_repositories("acme", &settings(), &ListOptions::default())
            .await
            .unwrap();
        let filtered = dispatcher
            .list_repositories(
                "acme",
                &settings(),
                &ListOptions {
                    name: Some("wid".into()),
                },
            )
            .await
            .unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(filtered.len(), 1);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn get_repository_bypasses_cache() {
        let stub = Arc::new(StubProvider::with_repos(vec![repo("widget")]));
        let dispatcher = RepositoryDispatcher::new(registry_with(stub.clone()));

        for _ in 0..3 {
            dispatcher
                .get_repository("acme", "widget", &settings())
                .await
                .unwrap();
        }

        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_provider_is_unsupported() {
        let dispatcher = RepositoryDispatcher::new(Arc::new(HashMap::new()));

        let err = dispatcher
            .get_repository("acme", "widget", &settings())
            .await
            .unwrap_err();

        assert_eq!(err, GfError::Unsupported("unsupported provider: github".into()));
    }

    #[tokio::test]
    async fn service_resolves_settings_by_server_name() {
        let stub = Arc::new(StubProvider::with_repos(vec![repo("widget")]));
        let control_plane =
            Arc::new(InMemoryControlPlane::default().with_server(github_record("srv"), "tok"));

        let service = RepositoryService::new(
            GitServerService::new(control_plane),
            Arc::new(RepositoryDispatcher::new(registry_with(stub))),
        );

        let found = service.get_repository("srv", "acme", "widget").await.unwrap();
        assert_eq!(found.name, "widget");

        let err = service
            .get_repository("missing", "acme", "widget")
            .await
            .unwrap_err();
        assert!(matches!(err, GfError::NotFound(_)));
    }
}
