//! services::pipelines

use std::sync::Arc;

use super::fingerprint;
use crate::cache::{self, Cache};
use crate::control_plane::{GitServerService, GitServerSettings};
use crate::errors::Result;
use crate::models::{PipelineListOptions, PipelineResponse, PipelineVariable, PipelinesResponse};
use crate::providers::{lookup, ProviderRegistry};

/// Registry lookup plus caching for pipeline listings. Triggering goes
/// straight to the provider.
pub struct PipelineDispatcher {
    registry: Arc<ProviderRegistry>,
    cache: Cache<PipelinesResponse>,
}

impl PipelineDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            cache: cache::pipeline_cache(),
        }
    }

    pub fn cache(&self) -> Cache<PipelinesResponse> {
        self.cache.clone()
    }

    pub async fn list_pipelines(
        &self,
        project: &str,
        settings: &GitServerSettings,
        opts: &PipelineListOptions,
    ) -> Result<PipelinesResponse> {
        let provider = lookup(&self.registry, settings.provider)?;

        let key = fingerprint(&[
            &settings.git_server_name,
            project,
            opts.ref_name.as_deref().unwrap_or(""),
            opts.status.as_deref().unwrap_or(""),
            &opts.page.to_string(),
            &opts.per_page.to_string(),
        ]);

        let project = project.to_string();
        let settings = settings.clone();
        let opts = opts.clone();

        self.cache
            .get_or_fetch(&key, move || {
                let provider = provider.clone();
                let project = project.clone();
                let settings = settings.clone();
                let opts = opts.clone();

                async move { provider.list_pipelines(&project, &settings, &opts).await }
            })
            .await
    }

    /// Trigger bypasses the cache: it is a write.
    pub async fn trigger_pipeline(
        &self,
        project: &str,
        ref_name: &str,
        variables: &[PipelineVariable],
        settings: &GitServerSettings,
    ) -> Result<PipelineResponse> {
        let provider = lookup(&self.registry, settings.provider)?;

        provider
            .trigger_pipeline(project, ref_name, variables, settings)
            .await
    }
}

/// Pipeline operations keyed by git server name.
pub struct PipelineService {
    git_servers: GitServerService,
    dispatcher: Arc<PipelineDispatcher>,
}

impl PipelineService {
    pub fn new(git_servers: GitServerService, dispatcher: Arc<PipelineDispatcher>) -> Self {
        Self {
            git_servers,
            dispatcher,
        }
    }

    pub async fn list_pipelines(
        &self,
        git_server_name: &str,
        project: &str,
        opts: &PipelineListOptions,
    ) -> Result<PipelinesResponse> {
        let settings = self.git_servers.get_settings(git_server_name).await?;

        self.dispatcher.list_pipelines(project, &settings, opts).await
    }

    pub async fn trigger_pipeline(
        &self,
        git_server_name: &str,
        project: &str,
        ref_name: &str,
        variables: &[PipelineVariable],
    ) -> Result<PipelineResponse> {
        let settings = self.git_servers.get_settings(git_server_name).await?;

        self.dispatcher
            .trigger_pipeline(project, ref_name, variables, &settings)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::Provider;
    use crate::errors::GfError;
    use crate::models::{
        Branch, ListOptions, ListResponse, Organization, Pagination, PullRequestListOptions,
        PullRequestsResponse, Repository,
    };
    use crate::providers::GitProvider;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PipelineStub {
        list_calls: AtomicUsize,
        trigger_calls: AtomicUsize,
    }

    #[async_trait]
    impl GitProvider for PipelineStub {
        async fn get_repository(
            &self,
            _owner: &str,
            _repo: &str,
            _settings: &GitServerSettings,
        ) -> Result<Repository> {
            unreachable!()
        }

        async fn list_repositories(
            &self,
            _owner: &str,
            _settings: &GitServerSettings,
            _opts: &ListOptions,
        ) -> Result<Vec<Repository>> {
            unreachable!()
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
            opts: &PipelineListOptions,
        ) -> Result<PipelinesResponse> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);

            Ok(ListResponse {
                data: Vec::new(),
                pagination: Pagination {
                    total: 0,
                    page: Some(opts.page),
                    per_page: Some(opts.per_page),
                },
            })
        }

        async fn trigger_pipeline(
            &self,
            _project: &str,
            ref_name: &str,
            _variables: &[PipelineVariable],
            _settings: &GitServerSettings,
        ) -> Result<PipelineResponse> {
            self.trigger_calls.fetch_add(1, Ordering::SeqCst);

            Ok(PipelineResponse {
                id: 7,
                web_url: "https://ci.example/7".into(),
                status: "created".into(),
                ref_name: ref_name.into(),
                sha: None,
            })
        }
    }

    fn dispatcher() -> (Arc<PipelineStub>, PipelineDispatcher) {
        let stub = Arc::new(PipelineStub {
            list_calls: AtomicUsize::new(0),
            trigger_calls: AtomicUsize::new(0),
        });

        let mut registry: ProviderRegistry = HashMap::new();
        registry.insert(Provider::GitLab, stub.clone());

        (stub, PipelineDispatcher::new(Arc::new(registry)))
    }

    fn settings() -> GitServerSettings {
        GitServerSettings {
            url: String::new(),
            token: "tok".into(),
            provider: Provider::GitLab,
            git_server_name: "srv".into(),
        }
    }

    #[tokio::test]
    async fn listing_is_cached_per_filter() {
        let (stub, dispatcher) = dispatcher();

        let base = PipelineListOptions {
            ref_name: None,
            status: None,
            page: 1,
            per_page: 20,
        };

        for _ in 0..2 {
            dispatcher
                .list_pipelines("acme/widget", &settings(), &base)
                .await
                .unwrap();
        }
        assert_eq!(stub.list_calls.load(Ordering::SeqCst), 1);

        dispatcher
            .list_pipelines(
                "acme/widget",
                &settings(),
                &PipelineListOptions {
                    ref_name: Some("main".into()),
                    ..base.clone()
                },
            )
            .await
            .unwrap();

        assert_eq!(stub.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn trigger_always_reaches_the_provider() {
        let (stub, dispatcher) = dispatcher();

        for _ in 0..2 {
            dispatcher
                .trigger_pipeline("acme/widget", "main", &[], &settings())
                .await
                .unwrap();
        }

        assert_eq!(stub.trigger_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_provider_is_unsupported() {
        let dispatcher = PipelineDispatcher::new(Arc::new(HashMap::new()));

        let err = dispatcher
            .trigger_pipeline("acme/widget", "main", &[], &settings())
            .await
            .unwrap_err();

        assert_eq!(err, GfError::Unsupported("unsupported provider: gitlab".into()));
    }
}
