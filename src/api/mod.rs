//! api
//!
//! HTTP boundary: query parameter handling, error mapping, and the
//! router.
//!
//! All list endpoints answer `{data, pagination}`; errors answer
//! `{code, message}` with the status derived from the error variant.
//! Handlers validate required query parameters themselves so the caller
//! gets an actionable message instead of a generic deserialization
//! failure.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::cache::Manager;
use crate::errors::GfError;
use crate::models::{
    ListOptions, ListResponse, Pagination, PipelineListOptions, PipelineVariable,
    PullRequestListOptions,
};
use crate::services::{
    BranchService, OrganizationService, PipelineService, PullRequestService, RepositoryService,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub repositories: Arc<RepositoryService>,
    pub organizations: Arc<OrganizationService>,
    pub branches: Arc<BranchService>,
    pub pull_requests: Arc<PullRequestService>,
    pub pipelines: Arc<PipelineService>,
    pub cache_manager: Arc<Manager>,
}

/// Wire shape of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Error type produced by handlers.
#[derive(Debug)]
pub struct ApiError(GfError);

impl From<GfError> for ApiError {
    fn from(err: GfError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            GfError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GfError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GfError::NotFound(_) => StatusCode::NOT_FOUND,
            GfError::Unsupported(_) | GfError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorBody {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Apply defaults and bounds to pagination parameters. Default page is
/// 1, default perPage is 20, max perPage is 100.
fn clamp_pagination(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let mut p = page.unwrap_or(1);

    let mut pp = per_page.unwrap_or(20);
    if pp > 100 {
        pp = 100;
    }

    if p < 1 {
        p = 1;
    }

    if pp < 1 {
        pp = 20;
    }

    (p, pp)
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    match value.as_deref().filter(|v| !v.is_empty()) {
        Some(value) => Ok(value),
        None => Err(GfError::BadRequest(format!("{name} parameter is required")).into()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryListParams {
    git_server: Option<String>,
    owner: Option<String>,
    repo_name: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitServerParams {
    git_server: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepoScopedParams {
    git_server: Option<String>,
    owner: Option<String>,
    repo_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestParams {
    git_server: Option<String>,
    owner: Option<String>,
    repo_name: Option<String>,
    state: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineListParams {
    git_server: Option<String>,
    project: Option<String>,
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    status: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerParams {
    git_server: Option<String>,
    project: Option<String>,
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    variables: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvalidateParams {
    endpoint: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub message: String,
    pub endpoint: String,
}

async fn list_repositories(
    State(state): State<AppState>,
    Query(params): Query<RepositoryListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let git_server = require(&params.git_server, "gitServer")?;
    let owner = require(&params.owner, "owner")?;

    let (page, per_page) = clamp_pagination(params.page, params.per_page);

    let opts = ListOptions {
        name: params.repo_name.clone().filter(|n| !n.is_empty()),
    };

    let data = state
        .repositories
        .list_repositories(git_server, owner, &opts)
        .await?;

    Ok(Json(ListResponse {
        pagination: Pagination {
            total: data.len() as i64,
            page: Some(page),
            per_page: Some(per_page),
        },
        data,
    }))
}

async fn get_repository(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<GitServerParams>,
) -> Result<impl IntoResponse, ApiError> {
    let git_server = require(&params.git_server, "gitServer")?;

    let repository = state
        .repositories
        .get_repository(git_server, &owner, &repo)
        .await?;

    Ok(Json(repository))
}

async fn list_organizations(
    State(state): State<AppState>,
    Query(params): Query<GitServerParams>,
) -> Result<impl IntoResponse, ApiError> {
    let git_server = require(&params.git_server, "gitServer")?;

    let orgs = state
        .organizations
        .list_user_organizations(git_server)
        .await?;

    Ok(Json(ListResponse::full(orgs)))
}

async fn list_branches(
    State(state): State<AppState>,
    Query(params): Query<RepoScopedParams>,
) -> Result<impl IntoResponse, ApiError> {
    let git_server = require(&params.git_server, "gitServer")?;
    let owner = require(&params.owner, "owner")?;
    let repo = require(&params.repo_name, "repoName")?;

    let branches = state.branches.list_branches(git_server, owner, repo).await?;

    Ok(Json(ListResponse::full(branches)))
}

async fn list_pull_requests(
    State(state): State<AppState>,
    Query(params): Query<PullRequestParams>,
) -> Result<impl IntoResponse, ApiError> {
    let git_server = require(&params.git_server, "gitServer")?;
    let owner = require(&params.owner, "owner")?;
    let repo = require(&params.repo_name, "repoName")?;

    let (page, per_page) = clamp_pagination(params.page, params.per_page);

    let opts = PullRequestListOptions {
        state: params.state.clone().unwrap_or_else(|| "open".to_string()),
        page,
        per_page,
    };

    let resp = state
        .pull_requests
        .list_pull_requests(git_server, owner, repo, &opts)
        .await?;

    Ok(Json(resp))
}

async fn list_pipelines(
    State(state): State<AppState>,
    Query(params): Query<PipelineListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let git_server = require(&params.git_server, "gitServer")?;
    let project = require(&params.project, "project")?;

    let (page, per_page) = clamp_pagination(params.page, params.per_page);

    let opts = PipelineListOptions {
        ref_name: params.ref_name.clone().filter(|r| !r.is_empty()),
        status: params.status.clone().filter(|s| !s.is_empty()),
        page,
        per_page,
    };

    let resp = state
        .pipelines
        .list_pipelines(git_server, project, &opts)
        .await?;

    Ok(Json(resp))
}

async fn trigger_pipeline(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> Result<impl IntoResponse, ApiError> {
    let git_server = require(&params.git_server, "gitServer")?;
    let project = require(&params.project, "project")?;
    let ref_name = require(&params.ref_name, "ref")?;

    let variables: Vec<PipelineVariable> = match params.variables.as_deref().filter(|v| !v.is_empty())
    {
        Some(raw) => serde_json::from_str(raw).map_err(|err| {
            GfError::BadRequest(format!(
                "invalid variables JSON format (expected array of {{key, value, variableType}}): {err}"
            ))
        })?,
        None => Vec::new(),
    };

    let created = state
        .pipelines
        .trigger_pipeline(git_server, project, ref_name, &variables)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn invalidate_cache(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> Result<impl IntoResponse, ApiError> {
    let endpoint = require(&params.endpoint, "endpoint")?;

    if let Err(err) = state.cache_manager.invalidate(endpoint) {
        // The one route with its own error code for validation misses.
        if err == GfError::BadRequest("unsupported endpoint".into()) {
            let body = ErrorBody {
                code: "invalid_endpoint".to_string(),
                message: err.to_string(),
            };

            return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
        }

        return Err(err.into());
    }

    Ok(Json(InvalidateResponse {
        message: format!("Cache for endpoint '{endpoint}' has been successfully invalidated"),
        endpoint: endpoint.to_string(),
    })
    .into_response())
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Build the application router with tracing and a 60s request timeout.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/repositories", get(list_repositories))
        .route("/repositories/{owner}/{repo}", get(get_repository))
        .route("/organizations", get(list_organizations))
        .route("/branches", get(list_branches))
        .route("/pullrequests", get(list_pull_requests))
        .route("/pipelines", get(list_pipelines).post(trigger_pipeline))
        .route("/cache/invalidate", post(invalidate_cache))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_defaults() {
        assert_eq!(clamp_pagination(None, None), (1, 20));
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp_pagination(Some(0), Some(0)), (1, 20));
        assert_eq!(clamp_pagination(Some(-5), Some(-1)), (1, 20));
        assert_eq!(clamp_pagination(Some(3), Some(250)), (3, 100));
        assert_eq!(clamp_pagination(Some(2), Some(50)), (2, 50));
    }

    #[test]
    fn require_rejects_missing_and_empty() {
        let missing: Option<String> = None;
        let err = require(&missing, "gitServer").unwrap_err();
        assert_eq!(err.0, GfError::BadRequest("gitServer parameter is required".into()));

        let empty = Some(String::new());
        assert!(require(&empty, "gitServer").is_err());

        let present = Some("gh1".to_string());
        assert_eq!(require(&present, "gitServer").unwrap(), "gh1");
    }
}
