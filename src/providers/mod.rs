//! providers
//!
//! Provider adapters and the capability interface they implement.
//!
//! # Design
//!
//! [`GitProvider`] is the uniform capability set. Each adapter translates
//! one upstream wire protocol (GitHub REST v3, GitLab REST v4, Bitbucket
//! Cloud REST v2) into the unified model and never leaks provider-native
//! enumeration strings. Capabilities an upstream cannot express return
//! [`GfError::Unsupported`].
//!
//! # Modules
//!
//! - `github`: GitHub adapter (workflow runs, merged/closed post-filter)
//! - `gitlab`: GitLab adapter (the only provider with pipeline triggering)
//! - `bitbucket`: Bitbucket Cloud adapter (pipelines query DSL)

pub mod bitbucket;
pub mod github;
pub mod gitlab;

pub use bitbucket::BitbucketProvider;
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::control_plane::{GitServerSettings, Provider};
use crate::errors::{GfError, Result};
use crate::models::{
    Branch, ListOptions, Organization, PipelineListOptions, PipelineResponse, PipelineVariable,
    PipelinesResponse, PullRequestListOptions, PullRequestsResponse, Repository,
};

/// The uniform capability set implemented by every provider adapter.
#[async_trait]
pub trait GitProvider: Send + Sync {
    async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Repository>;

    async fn list_repositories(
        &self,
        owner: &str,
        settings: &GitServerSettings,
        opts: &ListOptions,
    ) -> Result<Vec<Repository>>;

    /// Organizations for the authenticated user (groups on GitLab,
    /// workspaces on Bitbucket).
    async fn list_user_organizations(
        &self,
        settings: &GitServerSettings,
    ) -> Result<Vec<Organization>>;

    async fn list_branches(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Vec<Branch>>;

    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
        opts: &PullRequestListOptions,
    ) -> Result<PullRequestsResponse>;

    async fn list_pipelines(
        &self,
        project: &str,
        settings: &GitServerSettings,
        opts: &PipelineListOptions,
    ) -> Result<PipelinesResponse>;

    async fn trigger_pipeline(
        &self,
        project: &str,
        ref_name: &str,
        variables: &[PipelineVariable],
        settings: &GitServerSettings,
    ) -> Result<PipelineResponse>;
}

/// Adapter registry keyed by the provider tag.
pub type ProviderRegistry = HashMap<Provider, Arc<dyn GitProvider>>;

/// Build the registry with all available adapters.
pub fn default_registry() -> Arc<ProviderRegistry> {
    let mut providers: ProviderRegistry = HashMap::new();
    providers.insert(Provider::GitHub, Arc::new(GitHubProvider::new()));
    providers.insert(Provider::GitLab, Arc::new(GitLabProvider::new()));
    providers.insert(Provider::Bitbucket, Arc::new(BitbucketProvider::new()));

    Arc::new(providers)
}

/// Look up the adapter for a provider tag.
pub fn lookup(registry: &ProviderRegistry, provider: Provider) -> Result<Arc<dyn GitProvider>> {
    registry
        .get(&provider)
        .cloned()
        .ok_or_else(|| GfError::Unsupported(format!("unsupported provider: {provider}")))
}

/// Split a `owner/repo` (or `workspace/repo`) project string into its two
/// components.
pub fn split_project(project: &str) -> Result<(&str, &str)> {
    match project.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => Ok((owner, repo)),
        _ => Err(GfError::BadRequest(format!(
            "invalid project format {project:?}: expected \"owner/repo\""
        ))),
    }
}

/// Case-insensitive substring filter on repository names. An absent
/// filter passes everything.
pub(crate) fn matches_name_filter(name: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(filter) => name.to_lowercase().contains(&filter.to_lowercase()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_project_accepts_owner_repo() {
        assert_eq!(split_project("acme/widget").unwrap(), ("acme", "widget"));
    }

    #[test]
    fn split_project_keeps_extra_slashes_in_repo() {
        assert_eq!(split_project("group/sub/repo").unwrap(), ("group", "sub/repo"));
    }

    #[test]
    fn split_project_rejects_malformed_input() {
        for input in ["noslash", "/repo", "owner/", ""] {
            let err = split_project(input).unwrap_err();
            assert!(matches!(err, GfError::BadRequest(_)), "input {input:?}");
            assert!(err.to_string().contains("invalid project format"));
        }
    }

    #[test]
    fn registry_covers_all_providers() {
        let registry = default_registry();

        for provider in [Provider::GitHub, Provider::GitLab, Provider::Bitbucket] {
            assert!(lookup(&registry, provider).is_ok());
        }
    }

    #[test]
    fn name_filter_is_case_insensitive() {
        assert!(matches_name_filter("FooBar", Some("foo")));
        assert!(matches_name_filter("foobar", Some("OBA")));
        assert!(!matches_name_filter("bar", Some("foo")));
        assert!(matches_name_filter("anything", None));
    }
}
