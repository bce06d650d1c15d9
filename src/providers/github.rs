//! providers::github
//!
//! GitHub adapter using the REST v3 API.
//!
//! # Design
//!
//! GitHub conflates `merged` and `closed` pull requests under
//! `state=closed`; the adapter distinguishes them by `merged_at` and runs
//! a bounded post-filter loop over upstream pages for those states.
//! Workflow runs stand in for pipelines; triggering is not supported.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{matches_name_filter, split_project, GitProvider};
use crate::control_plane::GitServerSettings;
use crate::errors::{GfError, Result};
use crate::models::{
    Branch, ListOptions, ListResponse, Organization, Owner, Pagination, Pipeline,
    PipelineListOptions, PipelineResponse, PipelineSource, PipelineStatus, PipelineVariable,
    PipelinesResponse, PullRequest, PullRequestListOptions, PullRequestState,
    PullRequestsResponse, Repository, RepositoryVisibility,
};

/// Default GitHub API base URL.
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = "gitfusion-api";

const API_VERSION: &str = "2022-11-28";

/// Page size used for full-list scans.
const SCAN_PAGE_SIZE: i64 = 100;

/// Page size used when fetching for post-filtered states. The maximum
/// (100) reduces the number of API round-trips needed.
const POST_FILTER_PAGE_SIZE: i64 = 100;

/// Maximum number of upstream pages fetched when post-filtering
/// (merged/closed). Prevents unbounded API calls against repositories
/// with very many closed pull requests.
const POST_FILTER_MAX_PAGES: usize = 50;

pub struct GitHubProvider {
    client: Client,
}

impl Default for GitHubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn base_url(settings: &GitServerSettings) -> &str {
        if settings.url.is_empty() {
            DEFAULT_API_BASE
        } else {
            settings.url.trim_end_matches('/')
        }
    }

    fn get(&self, settings: &GitServerSettings, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", Self::base_url(settings)))
            .bearer_auth(&settings.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header("X-GitHub-Api-Version", API_VERSION)
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

    async fn owner_is_org(&self, owner: &str, settings: &GitServerSettings) -> bool {
        match self.get(settings, &format!("/orgs/{owner}")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Direct listing for states GitHub supports natively (open, all).
    async fn list_pull_requests_direct(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
        opts: &PullRequestListOptions,
        gh_state: &str,
    ) -> Result<PullRequestsResponse> {
        let resp = self
            .get(settings, &format!("/repos/{owner}/{repo}/pulls"))
            .query(&[
                ("state", gh_state),
                ("page", &opts.page.to_string()),
                ("per_page", &opts.per_page.to_string()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(
                resp,
                format!("pull requests for {owner}/{repo} not found"),
            )
            .await);
        }

        let last_page = resp
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_last_page);

        let pulls: Vec<GitHubPull> = resp.json().await?;

        let data: Vec<PullRequest> = pulls.iter().map(convert_pull_request).collect();

        let total = match last_page {
            Some(last) => last * opts.per_page,
            None if (data.len() as i64) < opts.per_page => {
                (opts.page - 1) * opts.per_page + data.len() as i64
            }
            None => opts.page * opts.per_page,
        };

        Ok(ListResponse {
            data,
            pagination: Pagination {
                total,
                page: Some(opts.page),
                per_page: Some(opts.per_page),
            },
        })
    }

    /// Post-filter loop for merged/closed: fetch `state=closed` pages,
    /// apply the `merged_at` predicate, skip the pages before the
    /// requested one, and collect up to `per_page` matches.
    async fn list_pull_requests_post_filter(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
        opts: &PullRequestListOptions,
        gh_state: &str,
    ) -> Result<PullRequestsResponse> {
        let needed = opts.per_page as usize;
        let mut skip = (opts.page - 1) * opts.per_page;

        let mut result: Vec<PullRequest> = Vec::with_capacity(needed);
        let mut gh_page = 1i64;

        for _ in 0..POST_FILTER_MAX_PAGES {
            let resp = self
                .get(settings, &format!("/repos/{owner}/{repo}/pulls"))
                .query(&[
                    ("state", gh_state),
                    ("page", &gh_page.to_string()),
                    ("per_page", &POST_FILTER_PAGE_SIZE.to_string()),
                ])
                .send()
                .await?;

            if !resp.status().is_success() {
                return Err(error_from_response(
                    resp,
                    format!("pull requests for {owner}/{repo} not found"),
                )
                .await);
            }

            let pulls: Vec<GitHubPull> = resp.json().await?;
            let exhausted = (pulls.len() as i64) < POST_FILTER_PAGE_SIZE;

            for pull in &pulls {
                if !matches_state_filter(pull, &opts.state) {
                    continue;
                }

                if skip > 0 {
                    skip -= 1;
                    continue;
                }

                result.push(convert_pull_request(pull));

                if result.len() >= needed {
                    // The page filled before upstream was exhausted:
                    // report a lower-bound total signalling that at
                    // least one more item may exist.
                    return Ok(ListResponse {
                        data: result,
                        pagination: Pagination {
                            total: opts.page * opts.per_page + 1,
                            page: Some(opts.page),
                            per_page: Some(opts.per_page),
                        },
                    });
                }
            }

            if exhausted {
                break;
            }

            gh_page += 1;
        }

        let total = (opts.page - 1) * opts.per_page + result.len() as i64;

        Ok(ListResponse {
            data: result,
            pagination: Pagination {
                total,
                page: Some(opts.page),
                per_page: Some(opts.per_page),
            },
        })
    }
}

#[async_trait]
impl GitProvider for GitHubProvider {
    async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Repository> {
        let resp = self
            .get(settings, &format!("/repos/{owner}/{repo}"))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(
                error_from_response(resp, format!("repository {owner}/{repo} not found")).await,
            );
        }

        let repo: GitHubRepo = resp.json().await?;

        Ok(convert_repository(&repo))
    }

    async fn list_repositories(
        &self,
        owner: &str,
        settings: &GitServerSettings,
        opts: &ListOptions,
    ) -> Result<Vec<Repository>> {
        let path = if self.owner_is_org(owner, settings).await {
            format!("/orgs/{owner}/repos")
        } else {
            format!("/users/{owner}/repos")
        };

        let repos: Vec<GitHubRepo> = self
            .scan_pages(settings, &path, &[], || {
                format!("organization or user {owner} not found")
            })
            .await?;

        Ok(repos
            .iter()
            .filter(|r| matches_name_filter(&r.name, opts.name.as_deref()))
            .map(convert_repository)
            .collect())
    }

    async fn list_user_organizations(
        &self,
        settings: &GitServerSettings,
    ) -> Result<Vec<Organization>> {
        let current_user = async {
            let resp = self.get(settings, "/user").send().await?;

            if !resp.status().is_success() {
                return Err(error_from_response(resp, "current user not found".into()).await);
            }

            let user: GitHubAccount = resp.json().await?;

            Ok(Organization {
                id: user.id.to_string(),
                name: user.login,
                avatar_url: user.avatar_url,
            })
        };

        let memberships = async {
            let memberships: Vec<GitHubMembership> = self
                .scan_pages(
                    settings,
                    "/user/memberships/orgs",
                    &[("state", "active")],
                    || "organization memberships not found".to_string(),
                )
                .await?;

            let orgs: Vec<Organization> = memberships
                .into_iter()
                .filter_map(|m| m.organization)
                .map(|org| Organization {
                    id: org.id.to_string(),
                    name: org.login,
                    avatar_url: org.avatar_url,
                })
                .collect();

            Ok(orgs)
        };

        // Fan out both calls; the first error wins. The "self" org is
        // appended after the memberships.
        let (user_org, mut orgs) = tokio::try_join!(current_user, memberships)?;

        orgs.push(user_org);

        Ok(orgs)
    }

    async fn list_branches(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Vec<Branch>> {
        let branches: Vec<GitHubBranch> = self
            .scan_pages(
                settings,
                &format!("/repos/{owner}/{repo}/branches"),
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
        let gh_state = map_pull_request_state(&opts.state);

        if opts.state == "merged" || opts.state == "closed" {
            return self
                .list_pull_requests_post_filter(owner, repo, settings, opts, gh_state)
                .await;
        }

        self.list_pull_requests_direct(owner, repo, settings, opts, gh_state)
            .await
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
            query.push(("branch", ref_name.clone()));
        }

        if let Some(status) = &opts.status {
            // An unmappable filter is dropped rather than rejected.
            if let Some(gh_status) = map_pipeline_status_filter(status) {
                query.push(("status", gh_status.to_string()));
            }
        }

        let resp = self
            .get(settings, &format!("/repos/{owner}/{repo}/actions/runs"))
            .query(&query)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp, format!("project {project} not found")).await);
        }

        let runs: GitHubWorkflowRuns = resp.json().await?;

        let data: Vec<Pipeline> = runs.workflow_runs.iter().map(convert_workflow_run).collect();

        Ok(ListResponse {
            data,
            pagination: Pagination {
                total: runs.total_count,
                page: Some(opts.page),
                per_page: Some(opts.per_page),
            },
        })
    }

    async fn trigger_pipeline(
        &self,
        _project: &str,
        _ref_name: &str,
        _variables: &[PipelineVariable],
        _settings: &GitServerSettings,
    ) -> Result<PipelineResponse> {
        Err(GfError::Unsupported(
            "trigger pipeline is not supported for GitHub".into(),
        ))
    }
}

async fn error_from_response(resp: Response, not_found: String) -> GfError {
    let status = resp.status();

    match status {
        StatusCode::NOT_FOUND => GfError::NotFound(not_found),
        StatusCode::UNAUTHORIZED => GfError::Unauthorized("invalid credentials".into()),
        _ => {
            let body = resp.text().await.unwrap_or_default();
            GfError::Internal(format!("github request failed: status {status}, body: {body}"))
        }
    }
}

/// Page number of the `rel="last"` link, if the header carries one.
fn parse_last_page(link_header: &str) -> Option<i64> {
    for part in link_header.split(',') {
        if !part.contains("rel=\"last\"") {
            continue;
        }

        let url = part.trim().strip_prefix('<')?.split('>').next()?;
        let query = url.split('?').nth(1)?;

        for pair in query.split('&') {
            if let Some(page) = pair.strip_prefix("page=") {
                return page.parse().ok();
            }
        }
    }

    None
}

fn map_pull_request_state(state: &str) -> &'static str {
    match state {
        "merged" | "closed" => "closed",
        "open" => "open",
        _ => "all",
    }
}

/// Whether a GitHub pull request matches the requested unified state.
/// `closed` means closed-but-not-merged.
fn matches_state_filter(pull: &GitHubPull, state: &str) -> bool {
    match state {
        "merged" => pull.merged_at.is_some(),
        "closed" => pull.merged_at.is_none(),
        _ => true,
    }
}

fn normalize_workflow_run_status(status: &str, conclusion: &str) -> PipelineStatus {
    match status {
        "queued" | "pending" | "waiting" | "requested" => PipelineStatus::Pending,
        "in_progress" => PipelineStatus::Running,
        "completed" => match conclusion {
            "success" | "neutral" => PipelineStatus::Success,
            "failure" | "timed_out" | "startup_failure" => PipelineStatus::Failed,
            "cancelled" | "stale" => PipelineStatus::Cancelled,
            "skipped" => PipelineStatus::Skipped,
            "action_required" => PipelineStatus::Manual,
            _ => PipelineStatus::Failed,
        },
        _ => PipelineStatus::Pending,
    }
}

fn normalize_workflow_run_event(event: &str) -> PipelineSource {
    match event {
        "push" => PipelineSource::Push,
        "pull_request" | "pull_request_target" => PipelineSource::MergeRequest,
        "schedule" => PipelineSource::Schedule,
        "workflow_dispatch" => PipelineSource::Manual,
        "repository_dispatch" | "workflow_call" => PipelineSource::Trigger,
        _ => PipelineSource::Other,
    }
}

/// Unified status filter to GitHub's workflow run status parameter.
/// GitHub has several pending-equivalent statuses but the API accepts a
/// single filter value; "queued" is the closest approximation.
fn map_pipeline_status_filter(status: &str) -> Option<&'static str> {
    match status {
        "pending" => Some("queued"),
        "running" => Some("in_progress"),
        "success" => Some("success"),
        "failed" => Some("failure"),
        "cancelled" => Some("cancelled"),
        "skipped" => Some("skipped"),
        "manual" => Some("action_required"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct GitHubAccount {
    id: i64,
    login: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    id: i64,
    name: String,
    owner: Option<GitHubAccount>,
    html_url: Option<String>,
    default_branch: Option<String>,
    description: Option<String>,
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitHubMembership {
    organization: Option<GitHubAccount>,
}

#[derive(Debug, Deserialize)]
struct GitHubRef {
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubPull {
    id: i64,
    number: i64,
    title: Option<String>,
    state: Option<String>,
    merged_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    body: Option<String>,
    draft: Option<bool>,
    html_url: Option<String>,
    head: Option<GitHubRef>,
    base: Option<GitHubRef>,
    user: Option<GitHubAccount>,
}

#[derive(Debug, Deserialize)]
struct GitHubWorkflowRuns {
    total_count: i64,
    workflow_runs: Vec<GitHubWorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct GitHubWorkflowRun {
    id: i64,
    status: Option<String>,
    conclusion: Option<String>,
    head_branch: Option<String>,
    head_sha: Option<String>,
    html_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    event: Option<String>,
    repository: Option<GitHubRunRepo>,
}

#[derive(Debug, Deserialize)]
struct GitHubRunRepo {
    id: i64,
}

fn convert_repository(repo: &GitHubRepo) -> Repository {
    Repository {
        id: repo.id.to_string(),
        name: repo.name.clone(),
        owner: repo.owner.as_ref().map(|o| o.login.clone()),
        url: repo.html_url.clone(),
        default_branch: repo.default_branch.clone(),
        description: repo.description.clone(),
        visibility: Some(if repo.private {
            RepositoryVisibility::Private
        } else {
            RepositoryVisibility::Public
        }),
    }
}

fn convert_pull_request(pull: &GitHubPull) -> PullRequest {
    let state = if pull.merged_at.is_some() {
        PullRequestState::Merged
    } else if pull.state.as_deref() == Some("closed") {
        PullRequestState::Closed
    } else {
        PullRequestState::Open
    };

    PullRequest {
        id: pull.id.to_string(),
        number: pull.number,
        title: pull.title.clone().unwrap_or_default(),
        state,
        source_branch: pull
            .head
            .as_ref()
            .and_then(|h| h.ref_name.clone())
            .unwrap_or_default(),
        target_branch: pull
            .base
            .as_ref()
            .and_then(|b| b.ref_name.clone())
            .unwrap_or_default(),
        url: pull.html_url.clone().unwrap_or_default(),
        created_at: pull.created_at.unwrap_or(DateTime::UNIX_EPOCH),
        updated_at: pull.updated_at.unwrap_or(DateTime::UNIX_EPOCH),
        description: pull.body.clone().filter(|b| !b.is_empty()),
        draft: pull.draft,
        commit_sha: pull
            .head
            .as_ref()
            .and_then(|h| h.sha.clone())
            .filter(|sha| !sha.is_empty()),
        author: pull.user.as_ref().map(|u| Owner {
            id: u.id.to_string(),
            name: u.login.clone(),
            avatar_url: u.avatar_url.clone(),
        }),
    }
}

fn convert_workflow_run(run: &GitHubWorkflowRun) -> Pipeline {
    Pipeline {
        id: run.id.to_string(),
        status: normalize_workflow_run_status(
            run.status.as_deref().unwrap_or(""),
            run.conclusion.as_deref().unwrap_or(""),
        ),
        ref_name: run.head_branch.clone().unwrap_or_default(),
        sha: run.head_sha.clone().unwrap_or_default(),
        web_url: run.html_url.clone().unwrap_or_default(),
        created_at: run.created_at.unwrap_or(DateTime::UNIX_EPOCH),
        updated_at: run.updated_at,
        project_id: run
            .repository
            .as_ref()
            .filter(|r| r.id != 0)
            .map(|r| r.id.to_string()),
        source: run
            .event
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(normalize_workflow_run_event),
    }
}
