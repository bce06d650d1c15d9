//! providers::gitlab
//!
//! GitLab adapter using the REST v4 API.
//!
//! Project paths are addressed as a single percent-encoded path segment
//! (`owner%2Frepo`). GitLab is the only provider that supports pipeline
//! triggering. List totals come from the `x-total` response header.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{split_project, GitProvider};
use crate::control_plane::GitServerSettings;
use crate::errors::{GfError, Result};
use crate::models::{
    Branch, ListOptions, ListResponse, Organization, Owner, Pagination, Pipeline,
    PipelineListOptions, PipelineResponse, PipelineSource, PipelineStatus, PipelineVariable,
    PipelineVariableType, PipelinesResponse, PullRequest, PullRequestListOptions,
    PullRequestState, PullRequestsResponse, Repository, RepositoryVisibility,
};

/// Page size used for full-list scans.
const SCAN_PAGE_SIZE: i64 = 100;

pub struct GitLabProvider {
    client: Client,
}

impl Default for GitLabProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GitLabProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn get(&self, settings: &GitServerSettings, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", settings.url.trim_end_matches('/')))
            .header("PRIVATE-TOKEN", &settings.token)
    }

    fn post(&self, settings: &GitServerSettings, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", settings.url.trim_end_matches('/')))
            .header("PRIVATE-TOKEN", &settings.token)
    }

    /// Fetch every page of a list endpoint.
    async fn scan_pages<T: DeserializeOwned>(
        &self,
        settings: &GitServerSettings,
        path: &str,
        extra_query: &[(&str, &str)],
        not_found: impl Fn() -> String,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1i64;

        loop {
            let resp = self
                .get(settings, path)
                .query(&[
                    ("per_page", SCAN_PAGE_SIZE.to_string().as_str()),
                    ("page", page.to_string().as_str()),
                ])
                .query(extra_query)
                .send()
                .await?;

            if !resp.status().is_success() {
                return Err(error_from_response(resp, not_found()).await);
            }

            let batch: Vec<T> = resp.json().await?;
            let done = (batch.len() as i64) < SCAN_PAGE_SIZE;

            items.extend(batch);

            if done {
                return Ok(items);
            }

            page += 1;
        }
    }
}

/// A project path as a single URL path segment (`owner%2Frepo`).
fn encode_project(owner: &str, repo: &str) -> String {
    urlencoding::encode(&format!("{owner}/{repo}")).into_owned()
}

async fn error_from_response(resp: Response, not_found: String) -> GfError {
    let status = resp.status();

    match status {
        StatusCode::NOT_FOUND => GfError::NotFound(not_found),
        StatusCode::UNAUTHORIZED => GfError::Unauthorized("invalid credentials".into()),
        _ => {
            let body = resp.text().await.unwrap_or_default();
            GfError::Internal(format!("gitlab request failed: status {status}, body: {body}"))
        }
    }
}

/// Total item count reported by GitLab in the `x-total` header. Absent
/// or unparsable headers count as zero, matching upstream client
/// behavior.
fn total_items(resp: &Response) -> i64 {
    resp.headers()
        .get("x-total")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl GitProvider for GitLabProvider {
    async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Repository> {
        let resp = self
            .get(settings, &format!("/projects/{}", encode_project(owner, repo)))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(
                error_from_response(resp, format!("repository {owner}/{repo} not found")).await,
            );
        }

        let project: GitLabProject = resp.json().await?;

        Ok(convert_project(&project))
    }

    async fn list_repositories(
        &self,
        owner: &str,
        settings: &GitServerSettings,
        opts: &ListOptions,
    ) -> Result<Vec<Repository>> {
        // GitLab filters server-side via `search`.
        let mut extra: Vec<(&str, &str)> = Vec::new();
        if let Some(name) = opts.name.as_deref() {
            extra.push(("search", name));
        }

        let encoded_owner = urlencoding::encode(owner).into_owned();

        let projects: Vec<GitLabProject> = self
            .scan_pages(
                settings,
                &format!("/groups/{encoded_owner}/projects"),
                &extra,
                || format!("owner {owner} not found"),
            )
            .await?;

        Ok(projects.iter().map(convert_project).collect())
    }

    async fn list_user_organizations(
        &self,
        settings: &GitServerSettings,
    ) -> Result<Vec<Organization>> {
        let groups: Vec<GitLabGroup> = self
            .scan_pages(settings, "/groups", &[], || "groups not found".to_string())
            .await?;

        Ok(groups
            .into_iter()
            .map(|group| Organization {
                id: group.id.to_string(),
                name: group.full_path,
                avatar_url: group.avatar_url.filter(|url| !url.is_empty()),
            })
            .collect())
    }

    async fn list_branches(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Vec<Branch>> {
        let branches: Vec<GitLabBranch> = self
            .scan_pages(
                settings,
                &format!(
                    "/projects/{}/repository/branches",
                    encode_project(owner, repo)
                ),
                &[],
                || format!("repository {owner}/{repo} not found"),
            )
            .await?;

        Ok(branches
            .into_iter()
            .map(|b| Branch { name: b.name })
            .collect())
    }

    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
        opts: &PullRequestListOptions,
    ) -> Result<PullRequestsResponse> {
        let gl_state = map_pull_request_state(&opts.state);

        let resp = self
            .get(
                settings,
                &format!("/projects/{}/merge_requests", encode_project(owner, repo)),
            )
            .query(&[
                ("state", gl_state),
                ("page", &opts.page.to_string()),
                ("per_page", &opts.per_page.to_string()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(
                resp,
                format!("repository {owner}/{repo} not found"),
            )
            .await);
        }

        let total = total_items(&resp);
        let mrs: Vec<GitLabMergeRequest> = resp.json().await?;

        let data: Vec<PullRequest> = mrs.iter().map(convert_merge_request).collect();

        Ok(ListResponse {
            data,
            pagination: Pagination {
                total,
                page: Some(opts.page),
                per_page: Some(opts.per_page),
            },
        })
    }

    async fn list_pipelines(
        &self,
        project: &str,
        settings: &GitServerSettings,
        opts: &PipelineListOptions,
    ) -> Result<PipelinesResponse> {
        let (owner, repo) = split_project(project)?;

        let mut query: Vec<(&str, String)> = vec![
            ("page", opts.page.to_string()),
            ("per_page", opts.per_page.to_string()),
        ];

        if let Some(ref_name) = &opts.ref_name {
            query.push(("ref", ref_name.clone()));
        }

        if let Some(status) = &opts.status {
            if let Some(gl_status) = map_pipeline_status_filter(status) {
                query.push(("status", gl_status.to_string()));
            }
        }

        let resp = self
            .get(
                settings,
                &format!("/projects/{}/pipelines", encode_project(owner, repo)),
            )
            .query(&query)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp, format!("project {project} not found")).await);
        }

        let total = total_items(&resp);
        let pipelines: Vec<GitLabPipeline> = resp.json().await?;

        let data: Vec<Pipeline> = pipelines.iter().map(convert_pipeline).collect();

        Ok(ListResponse {
            data,
            pagination: Pagination {
                total,
                page: Some(opts.page),
                per_page: Some(opts.per_page),
            },
        })
    }

    async fn trigger_pipeline(
        &self,
        project: &str,
        ref_name: &str,
        variables: &[PipelineVariable],
        settings: &GitServerSettings,
    ) -> Result<PipelineResponse> {
        let (owner, repo) = split_project(project)?;

        let body = CreatePipelineRequest {
            ref_name: ref_name.to_string(),
            variables: if variables.is_empty() {
                None
            } else {
                Some(variables.iter().map(convert_variable).collect())
            },
        };

        let resp = self
            .post(
                settings,
                &format!("/projects/{}/pipeline", encode_project(owner, repo)),
            )
            .json(&body)
            .send()
            .await?;

        let status = resp.status();

        if !status.is_success() {
            return Err(match status {
                StatusCode::NOT_FOUND => {
                    GfError::NotFound(format!("project {project} or ref {ref_name} not found"))
                }
                StatusCode::UNAUTHORIZED => GfError::Unauthorized("invalid credentials".into()),
                _ => {
                    let body = resp.text().await.unwrap_or_default();
                    GfError::Internal(format!(
                        "create pipeline for {project} ref {ref_name}: status {status}, body: {body}"
                    ))
                }
            });
        }

        let created: GitLabCreatedPipeline = resp.json().await?;

        Ok(PipelineResponse {
            id: created.id,
            web_url: created.web_url,
            status: created.status,
            ref_name: created.ref_name,
            sha: created.sha.filter(|sha| !sha.is_empty()),
        })
    }
}

fn map_pull_request_state(state: &str) -> &'static str {
    match state {
        "open" => "opened",
        "closed" => "closed",
        "merged" => "merged",
        "all" => "all",
        _ => "opened",
    }
}

fn normalize_merge_request_state(state: &str) -> PullRequestState {
    match state {
        "opened" => PullRequestState::Open,
        "merged" => PullRequestState::Merged,
        "closed" => PullRequestState::Closed,
        _ => PullRequestState::Open,
    }
}

fn normalize_pipeline_status(status: &str) -> PipelineStatus {
    match status {
        "pending" | "created" | "waiting_for_resource" | "preparing" => PipelineStatus::Pending,
        "running" => PipelineStatus::Running,
        "success" => PipelineStatus::Success,
        "failed" => PipelineStatus::Failed,
        "canceled" => PipelineStatus::Cancelled,
        "skipped" => PipelineStatus::Skipped,
        "manual" | "scheduled" => PipelineStatus::Manual,
        _ => PipelineStatus::Pending,
    }
}

fn normalize_pipeline_source(source: &str) -> PipelineSource {
    match source {
        "push" => PipelineSource::Push,
        "merge_request_event" => PipelineSource::MergeRequest,
        "schedule" => PipelineSource::Schedule,
        "web" | "chat" => PipelineSource::Manual,
        "trigger" | "pipeline" | "api" => PipelineSource::Trigger,
        _ => PipelineSource::Other,
    }
}

/// Unified status filter to GitLab's pipeline status parameter. GitLab
/// spells cancellation "canceled".
fn map_pipeline_status_filter(status: &str) -> Option<&'static str> {
    match status {
        "pending" => Some("pending"),
        "running" => Some("running"),
        "success" => Some("success"),
        "failed" => Some("failed"),
        "cancelled" => Some("canceled"),
        "skipped" => Some("skipped"),
        "manual" => Some("manual"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct GitLabNamespace {
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: i64,
    path: String,
    namespace: Option<GitLabNamespace>,
    web_url: Option<String>,
    default_branch: Option<String>,
    description: Option<String>,
    visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabGroup {
    id: i64,
    full_path: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    id: i64,
    username: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabMergeRequest {
    id: i64,
    iid: i64,
    title: Option<String>,
    state: Option<String>,
    source_branch: Option<String>,
    target_branch: Option<String>,
    web_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    description: Option<String>,
    draft: Option<bool>,
    sha: Option<String>,
    author: Option<GitLabUser>,
}

#[derive(Debug, Deserialize)]
struct GitLabPipeline {
    id: i64,
    status: Option<String>,
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    sha: Option<String>,
    web_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    project_id: Option<i64>,
    source: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatePipelineRequest {
    #[serde(rename = "ref")]
    ref_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<Vec<CreatePipelineVariable>>,
}

#[derive(Debug, Serialize)]
struct CreatePipelineVariable {
    key: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    variable_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabCreatedPipeline {
    id: i64,
    web_url: String,
    status: String,
    #[serde(rename = "ref")]
    ref_name: String,
    sha: Option<String>,
}

fn convert_project(project: &GitLabProject) -> Repository {
    Repository {
        id: project.id.to_string(),
        name: project.path.clone(),
        owner: project.namespace.as_ref().map(|n| n.full_path.clone()),
        url: project.web_url.clone(),
        default_branch: project.default_branch.clone(),
        description: project.description.clone(),
        visibility: Some(if project.visibility.as_deref() == Some("private") {
            RepositoryVisibility::Private
        } else {
            RepositoryVisibility::Public
        }),
    }
}

fn convert_merge_request(mr: &GitLabMergeRequest) -> PullRequest {
    PullRequest {
        id: mr.id.to_string(),
        number: mr.iid,
        title: mr.title.clone().unwrap_or_default(),
        state: normalize_merge_request_state(mr.state.as_deref().unwrap_or("")),
        source_branch: mr.source_branch.clone().unwrap_or_default(),
        target_branch: mr.target_branch.clone().unwrap_or_default(),
        url: mr.web_url.clone().unwrap_or_default(),
        created_at: mr.created_at.unwrap_or(DateTime::UNIX_EPOCH),
        updated_at: mr.updated_at.unwrap_or(DateTime::UNIX_EPOCH),
        description: mr.description.clone().filter(|d| !d.is_empty()),
        draft: mr.draft,
        commit_sha: mr.sha.clone().filter(|sha| !sha.is_empty()),
        author: mr.author.as_ref().map(|author| Owner {
            id: author.id.to_string(),
            name: author.username.clone(),
            avatar_url: author.avatar_url.clone().filter(|url| !url.is_empty()),
        }),
    }
}

fn convert_pipeline(pipeline: &GitLabPipeline) -> Pipeline {
    Pipeline {
        id: pipeline.id.to_string(),
        status: normalize_pipeline_status(pipeline.status.as_deref().unwrap_or("")),
        ref_name: pipeline.ref_name.clone().unwrap_or_default(),
        sha: pipeline.sha.clone().unwrap_or_default(),
        web_url: pipeline.web_url.clone().unwrap_or_default(),
        created_at: pipeline.created_at.unwrap_or(DateTime::UNIX_EPOCH),
        updated_at: pipeline.updated_at,
        project_id: pipeline.project_id.filter(|id| *id != 0).map(|id| id.to_string()),
        source: pipeline
            .source
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(normalize_pipeline_source),
    }
}

fn convert_variable(variable: &PipelineVariable) -> CreatePipelineVariable {
    CreatePipelineVariable {
        key: variable.key.clone(),
        value: variable.value.clone(),
        // Unknown variable types are forwarded verbatim; the provider
        // decides whether to accept them.
        variable_type: variable.variable_type.as_ref().map(|t| match t {
            PipelineVariableType::EnvVar => "env_var".to_string(),
            PipelineVariableType::File => "file".to_string(),
            PipelineVariableType::Other(other) => other.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_status_table() {
        let cases = [
            ("pending", PipelineStatus::Pending),
            ("created", PipelineStatus::Pending),
            ("waiting_for_resource", PipelineStatus::Pending),
            ("preparing", PipelineStatus::Pending),
            ("running", PipelineStatus::Running),
            ("success", PipelineStatus::Success),
            ("failed", PipelineStatus::Failed),
            ("canceled", PipelineStatus::Cancelled),
            ("skipped", PipelineStatus::Skipped),
            ("manual", PipelineStatus::Manual),
            ("scheduled", PipelineStatus::Manual),
            ("mystery", PipelineStatus::Pending),
            ("", PipelineStatus::Pending),
        ];

        for (status, want) in cases {
            assert_eq!(normalize_pipeline_status(status), want, "{status:?}");
        }
    }

    #[test]
    fn pipeline_source_table() {
        let cases = [
            ("push", PipelineSource::Push),
            ("merge_request_event", PipelineSource::MergeRequest),
            ("schedule", PipelineSource::Schedule),
            ("web", PipelineSource::Manual),
            ("chat", PipelineSource::Manual),
            ("trigger", PipelineSource::Trigger),
            ("pipeline", PipelineSource::Trigger),
            ("api", PipelineSource::Trigger),
            ("mystery", PipelineSource::Other),
            ("", PipelineSource::Other),
        ];

        for (source, want) in cases {
            assert_eq!(normalize_pipeline_source(source), want, "{source:?}");
        }
    }

    #[test]
    fn status_filter_uses_gitlab_spelling() {
        assert_eq!(map_pipeline_status_filter("cancelled"), Some("canceled"));
        assert_eq!(map_pipeline_status_filter("unknown"), None);
    }

    #[test]
    fn merge_request_state_mapping() {
        assert_eq!(map_pull_request_state("open"), "opened");
        assert_eq!(map_pull_request_state("merged"), "merged");
        assert_eq!(map_pull_request_state("closed"), "closed");
        assert_eq!(map_pull_request_state("all"), "all");
        assert_eq!(map_pull_request_state("bogus"), "opened");

        assert_eq!(normalize_merge_request_state("opened"), PullRequestState::Open);
        assert_eq!(normalize_merge_request_state("merged"), PullRequestState::Merged);
        assert_eq!(normalize_merge_request_state("closed"), PullRequestState::Closed);
        assert_eq!(normalize_merge_request_state("locked"), PullRequestState::Open);
    }

    #[test]
    fn project_path_is_single_segment() {
        assert_eq!(encode_project("acme", "widget"), "acme%2Fwidget");
        assert_eq!(encode_project("group/sub", "repo"), "group%2Fsub%2Frepo");
    }

    #[test]
    fn unknown_variable_type_is_forwarded() {
        let variable = PipelineVariable {
            key: "K".into(),
            value: "V".into(),
            variable_type: Some(PipelineVariableType::Other("mystery".into())),
        };

        let converted = convert_variable(&variable);
        assert_eq!(converted.variable_type.as_deref(), Some("mystery"));

        let json = serde_json::to_string(&converted).unwrap();
        assert_eq!(json, r#"{"key":"K","value":"V","variable_type":"mystery"}"#);
    }

    #[test]
    fn trigger_body_omits_empty_variables() {
        let body = CreatePipelineRequest {
            ref_name: "main".into(),
            variables: None,
        };

        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"ref":"main"}"#);
    }
}
