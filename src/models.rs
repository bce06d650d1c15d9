//! models
//!
//! Unified data model shared by all providers.
//!
//! # Design
//!
//! Every enumeration here is a closed set: adapters translate provider
//! vocabularies into these types and never leak provider-native strings.
//! IDs are provider-native values preserved verbatim as strings (numeric
//! IDs are rendered base-10).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryVisibility {
    Public,
    Private,
}

/// A repository as seen through the unified API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "defaultBranch", skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<RepositoryVisibility>,
}

/// A branch. Providers expose richer structures; only the name is unified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
}

/// An organization, group, or workspace depending on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(rename = "avatarUrl", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Unified pull/merge request state.
///
/// GitHub conflates merged and closed; the GitHub adapter distinguishes
/// them via the merge timestamp, so a PR with a non-null `mergedAt` is
/// always `Merged`, never `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

/// Author of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub name: String,
    #[serde(rename = "avatarUrl", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A pull/merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: String,
    pub number: i64,
    pub title: String,
    pub state: PullRequestState,
    #[serde(rename = "sourceBranch")]
    pub source_branch: String,
    #[serde(rename = "targetBranch")]
    pub target_branch: String,
    pub url: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<bool>,
    #[serde(rename = "commitSha", skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Owner>,
}

/// Unified pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Skipped,
    Manual,
}

/// Unified pipeline trigger source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineSource {
    Push,
    MergeRequest,
    Schedule,
    Manual,
    Trigger,
    Other,
}

/// A CI/CD pipeline (workflow run on GitHub, pipeline elsewhere).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub status: PipelineStatus,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
    #[serde(rename = "webUrl")]
    pub web_url: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PipelineSource>,
}

/// Variable type for triggered pipeline variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariableType {
    EnvVar,
    File,
    /// Forwarded verbatim when the caller supplies a value outside the
    /// known set; the provider decides whether to accept it.
    #[serde(untagged)]
    Other(String),
}

/// A variable passed to a triggered pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineVariable {
    pub key: String,
    pub value: String,
    #[serde(rename = "variableType", skip_serializing_if = "Option::is_none")]
    pub variable_type: Option<PipelineVariableType>,
}

/// Result of triggering a pipeline. Status is whatever the provider
/// reported at creation time; the service does not track the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub id: i64,
    #[serde(rename = "webUrl")]
    pub web_url: String,
    pub status: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

/// Pagination metadata returned with list responses.
///
/// `total` is exact when the provider reports one, otherwise a lower-bound
/// estimate derived from the page arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(rename = "perPage", skip_serializing_if = "Option::is_none")]
    pub per_page: Option<i64>,
}

/// List envelope: items plus pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

pub type RepositoriesResponse = ListResponse<Repository>;
pub type BranchesResponse = ListResponse<Branch>;
pub type OrganizationsResponse = ListResponse<Organization>;
pub type PullRequestsResponse = ListResponse<PullRequest>;
pub type PipelinesResponse = ListResponse<Pipeline>;

impl<T> ListResponse<T> {
    /// Envelope for a full (non-paginated) result set.
    pub fn full(data: Vec<T>) -> Self {
        let total = data.len() as i64;
        Self {
            data,
            pagination: Pagination {
                total,
                page: None,
                per_page: None,
            },
        }
    }
}

/// Filters for repository and branch listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Case-insensitive substring filter on the name.
    pub name: Option<String>,
}

/// Filters for pull request listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestListOptions {
    /// One of "open", "closed", "merged", "all".
    pub state: String,
    pub page: i64,
    pub per_page: i64,
}

/// Filters for pipeline listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineListOptions {
    pub ref_name: Option<String>,
    /// A unified status string; adapters map it to their native filter
    /// or return an empty result when no equivalent exists.
    pub status: Option<String>,
    pub page: i64,
    pub per_page: i64,
}
