//! providers::bitbucket
//!
//! Bitbucket Cloud adapter using the REST 2.0 API.
//!
//! Credentials arrive as a base64-encoded `username:app_password` pair
//! and are replayed as HTTP basic auth. Pipeline filtering goes through
//! Bitbucket's query DSL, so user-supplied values are escaped before
//! they are embedded in a predicate.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{split_project, GitProvider};
use crate::control_plane::GitServerSettings;
use crate::errors::{GfError, Result};
use crate::models::{
    Branch, ListOptions, ListResponse, Organization, Owner, Pagination, Pipeline,
    PipelineListOptions, PipelineResponse, PipelineSource, PipelineStatus, PipelineVariable,
    PipelinesResponse, PullRequest, PullRequestListOptions, PullRequestState,
    PullRequestsResponse, Repository,
};

/// Base URL for the Bitbucket Cloud REST API, used when the git server
/// record does not carry one (Bitbucket Data Center is not supported).
const DEFAULT_API_BASE: &str = "https://api.bitbucket.org/2.0";

/// Page size used for full-list scans.
const SCAN_PAGE_SIZE: i64 = 100;

pub struct BitbucketProvider {
    client: Client,
}

impl Default for BitbucketProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BitbucketProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn base_url(settings: &GitServerSettings) -> String {
        if settings.url.is_empty() {
            DEFAULT_API_BASE.to_string()
        } else {
            settings.url.trim_end_matches('/').to_string()
        }
    }

    fn get(&self, url: String, creds: &Credentials) -> RequestBuilder {
        self.client
            .get(url)
            .basic_auth(&creds.username, Some(&creds.password))
    }

    /// Fetch every page of a paged list endpoint by following `next`
    /// links.
    async fn scan_pages<T: DeserializeOwned>(
        &self,
        first_url: String,
        creds: &Credentials,
        not_found: impl Fn() -> String,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut url = Some(first_url);

        while let Some(page_url) = url.take() {
            let resp = self.get(page_url, creds).send().await?;

            if !resp.status().is_success() {
                return Err(error_from_response(resp, not_found()).await);
            }

            let page: BitbucketPage<T> = resp.json().await?;

            items.extend(page.values);
            url = page.next;
        }

        Ok(items)
    }
}

#[derive(Debug)]
struct Credentials {
    username: String,
    password: String,
}

/// Decode a base64 `username:app_password` token.
fn decode_token(token: &str) -> Result<Credentials> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .map_err(|err| GfError::BadRequest(format!("failed to decode bitbucket token: {err}")))?;

    let decoded = String::from_utf8(decoded)
        .map_err(|err| GfError::BadRequest(format!("failed to decode bitbucket token: {err}")))?;

    match decoded.split_once(':') {
        Some((username, password)) if !password.contains(':') => Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }),
        _ => Err(GfError::BadRequest("invalid token format".into())),
    }
}

async fn error_from_response(resp: Response, not_found: String) -> GfError {
    let status = resp.status();

    match status {
        StatusCode::NOT_FOUND => GfError::NotFound(not_found),
        StatusCode::UNAUTHORIZED => GfError::Unauthorized("invalid credentials".into()),
        _ => {
            let body = resp.text().await.unwrap_or_default();
            GfError::Internal(format!(
                "bitbucket request failed: status {status}, body: {body}"
            ))
        }
    }
}

/// Quote a value for the Bitbucket query DSL. Backslashes are escaped
/// before quotes so a trailing backslash cannot swallow the closing
/// quote.
fn quote_dsl(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| GfError::Internal(format!("failed to parse {field} time {value:?}: {err}")))
}

/// Pipeline UUIDs come wrapped in braces (`{uuid}`); strip them.
fn strip_braces(uuid: &str) -> &str {
    uuid.trim_start_matches('{').trim_end_matches('}')
}

#[async_trait]
impl GitProvider for BitbucketProvider {
    async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Repository> {
        let creds = decode_token(&settings.token)?;
        let base = Self::base_url(settings);

        let resp = self
            .get(
                format!(
                    "{base}/repositories/{}/{}",
                    urlencoding::encode(owner),
                    urlencoding::encode(repo)
                ),
                &creds,
            )
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(
                error_from_response(resp, format!("repository {owner}/{repo} not found")).await,
            );
        }

        let repository: BitbucketRepo = resp.json().await?;

        Ok(convert_repository(&repository))
    }

    async fn list_repositories(
        &self,
        owner: &str,
        settings: &GitServerSettings,
        opts: &ListOptions,
    ) -> Result<Vec<Repository>> {
        let creds = decode_token(&settings.token)?;
        let base = Self::base_url(settings);

        let mut url = format!(
            "{base}/repositories/{}?pagelen={SCAN_PAGE_SIZE}",
            urlencoding::encode(owner)
        );

        // Server-side keyword filter via the query DSL.
        if let Some(name) = opts.name.as_deref() {
            let q = format!("name ~ {}", quote_dsl(name));
            url.push_str(&format!("&q={}", urlencoding::encode(&q)));
        }

        let repos: Vec<BitbucketRepo> = self
            .scan_pages(url, &creds, || format!("workspace {owner} not found"))
            .await?;

        Ok(repos.iter().map(convert_repository).collect())
    }

    async fn list_user_organizations(
        &self,
        settings: &GitServerSettings,
    ) -> Result<Vec<Organization>> {
        let creds = decode_token(&settings.token)?;
        let base = Self::base_url(settings);

        let workspaces: Vec<BitbucketWorkspace> = self
            .scan_pages(
                format!("{base}/workspaces?pagelen={SCAN_PAGE_SIZE}"),
                &creds,
                || "workspaces not found".to_string(),
            )
            .await?;

        Ok(workspaces
            .into_iter()
            .map(|ws| Organization {
                id: ws.uuid,
                name: ws.name,
                avatar_url: None,
            })
            .collect())
    }

    async fn list_branches(
        &self,
        owner: &str,
        repo: &str,
        settings: &GitServerSettings,
    ) -> Result<Vec<Branch>> {
        let creds = decode_token(&settings.token)?;
        let base = Self::base_url(settings);

        let branches: Vec<BitbucketBranch> = self
            .scan_pages(
                format!(
                    "{base}/repositories/{}/{}/refs/branches?pagelen={SCAN_PAGE_SIZE}",
                    urlencoding::encode(owner),
                    urlencoding::encode(repo)
                ),
                &creds,
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
        let creds = decode_token(&settings.token)?;
        let base = Self::base_url(settings);

        let mut query: Vec<(&str, String)> = vec![
            ("page", opts.page.to_string()),
            ("pagelen", opts.per_page.to_string()),
        ];

        for state in map_pull_request_states(&opts.state) {
            query.push(("state", state.to_string()));
        }

        let resp = self
            .get(
                format!(
                    "{base}/repositories/{}/{}/pullrequests",
                    urlencoding::encode(owner),
                    urlencoding::encode(repo)
                ),
                &creds,
            )
            .query(&query)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(
                error_from_response(resp, format!("repository {owner}/{repo} not found")).await,
            );
        }

        let page: BitbucketSizedPage<BitbucketPullRequest> = resp.json().await?;

        let mut data = Vec::with_capacity(page.values.len());
        for pr in &page.values {
            data.push(convert_pull_request(pr)?);
        }

        Ok(ListResponse {
            data,
            pagination: Pagination {
                total: page.size,
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
        let creds = decode_token(&settings.token)?;
        let base = Self::base_url(settings);

        let mut predicates = Vec::new();

        if let Some(ref_name) = opts.ref_name.as_deref() {
            predicates.push(format!("target.ref_name={}", quote_dsl(ref_name)));
        }

        if let Some(status) = opts.status.as_deref() {
            match map_pipeline_status_query(status) {
                // Bitbucket has no equivalent state; nothing can match.
                None => {
                    return Ok(ListResponse {
                        data: Vec::new(),
                        pagination: Pagination {
                            total: 0,
                            page: Some(opts.page),
                            per_page: Some(opts.per_page),
                        },
                    });
                }
                Some(predicate) => predicates.push(predicate.to_string()),
            }
        }

        let mut query: Vec<(&str, String)> = vec![
            ("page", opts.page.to_string()),
            ("pagelen", opts.per_page.to_string()),
            ("sort", "-created_on".to_string()),
        ];

        if !predicates.is_empty() {
            query.push(("q", predicates.join(" AND ")));
        }

        let resp = self
            .get(
                format!(
                    "{base}/repositories/{}/{}/pipelines",
                    urlencoding::encode(owner),
                    urlencoding::encode(repo)
                ),
                &creds,
            )
            .query(&query)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp, format!("project {project} not found")).await);
        }

        let page: BitbucketSizedPage<BitbucketPipeline> = resp.json().await?;

        let mut data = Vec::with_capacity(page.values.len());
        for pipeline in &page.values {
            data.push(convert_pipeline(pipeline)?);
        }

        Ok(ListResponse {
            data,
            pagination: Pagination {
                total: page.size,
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
            "trigger pipeline is not supported for Bitbucket".into(),
        ))
    }
}

/// Unified PR state to Bitbucket state parameters. "all" expands to
/// every Bitbucket state as repeated parameters.
fn map_pull_request_states(state: &str) -> Vec<&'static str> {
    match state {
        "open" => vec!["OPEN"],
        "closed" => vec!["DECLINED"],
        "merged" => vec!["MERGED"],
        "all" => vec!["OPEN", "MERGED", "DECLINED", "SUPERSEDED"],
        _ => vec!["OPEN"],
    }
}

fn normalize_pull_request_state(state: &str) -> PullRequestState {
    match state {
        "OPEN" => PullRequestState::Open,
        "MERGED" => PullRequestState::Merged,
        "DECLINED" | "SUPERSEDED" => PullRequestState::Closed,
        _ => PullRequestState::Open,
    }
}

fn normalize_pipeline_status(state: &str, result: &str) -> PipelineStatus {
    match state {
        "PENDING" => PipelineStatus::Pending,
        "IN_PROGRESS" => PipelineStatus::Running,
        "COMPLETED" => match result {
            "SUCCESSFUL" => PipelineStatus::Success,
            "STOPPED" | "EXPIRED" => PipelineStatus::Cancelled,
            _ => PipelineStatus::Failed,
        },
        "HALTED" | "PAUSED" => PipelineStatus::Manual,
        _ => PipelineStatus::Pending,
    }
}

fn normalize_pipeline_trigger(trigger: &str) -> PipelineSource {
    match trigger {
        "PUSH" => PipelineSource::Push,
        "PULL_REQUEST" => PipelineSource::MergeRequest,
        "SCHEDULE" => PipelineSource::Schedule,
        "MANUAL" => PipelineSource::Manual,
        "TRIGGER" | "API" => PipelineSource::Trigger,
        _ => PipelineSource::Other,
    }
}

/// Unified status filter to a query DSL predicate. `None` means the
/// status cannot occur on Bitbucket.
fn map_pipeline_status_query(status: &str) -> Option<&'static str> {
    match status {
        "pending" => Some(r#"state.name="PENDING""#),
        "running" => Some(r#"state.name="IN_PROGRESS""#),
        "success" => Some(r#"state.result.name="SUCCESSFUL""#),
        "failed" => Some(r#"state.result.name="FAILED""#),
        "cancelled" => Some(r#"state.result.name="STOPPED""#),
        "manual" => Some(r#"state.name="HALTED""#),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct BitbucketPage<T> {
    values: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketSizedPage<T> {
    #[serde(default)]
    size: i64,
    values: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketLink {
    href: String,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketLinks {
    #[serde(default)]
    html: BitbucketLink,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketAccount {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketNamedRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct BitbucketRepo {
    uuid: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    owner: BitbucketAccount,
    #[serde(default)]
    mainbranch: BitbucketNamedRef,
    #[serde(default)]
    links: BitbucketLinks,
}

#[derive(Debug, Deserialize)]
struct BitbucketWorkspace {
    uuid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct BitbucketBranch {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketAvatarLinks {
    #[serde(default)]
    avatar: BitbucketLink,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketAuthor {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    links: BitbucketAvatarLinks,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketCommit {
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketEndpoint {
    #[serde(default)]
    branch: BitbucketNamedRef,
    #[serde(default)]
    commit: BitbucketCommit,
}

#[derive(Debug, Deserialize)]
struct BitbucketPullRequest {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    author: BitbucketAuthor,
    #[serde(default)]
    source: BitbucketEndpoint,
    #[serde(default)]
    destination: BitbucketEndpoint,
    #[serde(default)]
    links: BitbucketLinks,
    #[serde(default)]
    created_on: String,
    #[serde(default)]
    updated_on: String,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketPipelineState {
    #[serde(default)]
    name: String,
    #[serde(default)]
    result: BitbucketNamedRef,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketPipelineTarget {
    #[serde(default)]
    ref_name: String,
    #[serde(default)]
    commit: BitbucketCommit,
}

#[derive(Debug, Deserialize)]
struct BitbucketPipeline {
    uuid: String,
    #[serde(default)]
    state: BitbucketPipelineState,
    #[serde(default)]
    target: BitbucketPipelineTarget,
    #[serde(default)]
    trigger: BitbucketNamedRef,
    #[serde(default)]
    created_on: String,
    #[serde(default)]
    completed_on: Option<String>,
    #[serde(default)]
    links: BitbucketLinks,
}

fn convert_repository(repo: &BitbucketRepo) -> Repository {
    Repository {
        id: repo.uuid.clone(),
        name: repo.name.clone(),
        owner: Some(repo.owner.username.clone()).filter(|o| !o.is_empty()),
        url: Some(repo.links.html.href.clone()).filter(|u| !u.is_empty()),
        default_branch: Some(repo.mainbranch.name.clone()).filter(|b| !b.is_empty()),
        description: Some(repo.description.clone()).filter(|d| !d.is_empty()),
        // Bitbucket does not report visibility on this surface.
        visibility: None,
    }
}

fn convert_pull_request(pr: &BitbucketPullRequest) -> Result<PullRequest> {
    let created_at = parse_timestamp("created_on", &pr.created_on)?;
    let updated_at = parse_timestamp("updated_on", &pr.updated_on)?;

    Ok(PullRequest {
        id: pr.id.to_string(),
        number: pr.id,
        title: pr.title.clone(),
        state: normalize_pull_request_state(&pr.state),
        source_branch: pr.source.branch.name.clone(),
        target_branch: pr.destination.branch.name.clone(),
        url: pr.links.html.href.clone(),
        created_at,
        updated_at,
        description: Some(pr.description.clone()).filter(|d| !d.is_empty()),
        draft: Some(pr.draft),
        commit_sha: Some(pr.source.commit.hash.clone()).filter(|sha| !sha.is_empty()),
        author: Some(Owner {
            id: pr.author.uuid.clone(),
            name: pr.author.display_name.clone(),
            avatar_url: Some(pr.author.links.avatar.href.clone()).filter(|url| !url.is_empty()),
        }),
    })
}

fn convert_pipeline(pipeline: &BitbucketPipeline) -> Result<Pipeline> {
    let created_at = parse_timestamp("created_on", &pipeline.created_on)?;

    let updated_at = match pipeline.completed_on.as_deref().filter(|t| !t.is_empty()) {
        Some(completed_on) => Some(parse_timestamp("completed_on", completed_on)?),
        None => None,
    };

    Ok(Pipeline {
        id: strip_braces(&pipeline.uuid).to_string(),
        status: normalize_pipeline_status(&pipeline.state.name, &pipeline.state.result.name),
        ref_name: pipeline.target.ref_name.clone(),
        sha: pipeline.target.commit.hash.clone(),
        web_url: pipeline.links.html.href.clone(),
        created_at,
        updated_at,
        project_id: None,
        source: Some(normalize_pipeline_trigger(&pipeline.trigger.name)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    fn encode_token(user: &str, pass: &str) -> String {
        STANDARD.encode(format!("{user}:{pass}"))
    }

    #[test]
    fn token_decodes_to_credentials() {
        let creds = decode_token(&encode_token("alice", "app-pass")).unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "app-pass");
    }

    #[test]
    fn invalid_base64_token_is_bad_request() {
        let err = decode_token("not-valid-base64!!!").unwrap_err();
        assert!(matches!(err, GfError::BadRequest(_)));
        assert!(err.to_string().contains("failed to decode bitbucket token"));
    }

    #[test]
    fn token_without_separator_is_rejected() {
        let token = STANDARD.encode("justausername");
        let err = decode_token(&token).unwrap_err();
        assert_eq!(err, GfError::BadRequest("invalid token format".into()));

        let token = STANDARD.encode("a:b:c");
        let err = decode_token(&token).unwrap_err();
        assert_eq!(err, GfError::BadRequest("invalid token format".into()));
    }

    #[test]
    fn pipeline_status_table() {
        let cases = [
            ("PENDING", "", PipelineStatus::Pending),
            ("IN_PROGRESS", "", PipelineStatus::Running),
            ("COMPLETED", "SUCCESSFUL", PipelineStatus::Success),
            ("COMPLETED", "FAILED", PipelineStatus::Failed),
            ("COMPLETED", "ERROR", PipelineStatus::Failed),
            ("COMPLETED", "STOPPED", PipelineStatus::Cancelled),
            ("COMPLETED", "EXPIRED", PipelineStatus::Cancelled),
            ("COMPLETED", "SOMETHING", PipelineStatus::Failed),
            ("HALTED", "", PipelineStatus::Manual),
            ("PAUSED", "", PipelineStatus::Manual),
            ("UNKNOWN", "", PipelineStatus::Pending),
            ("", "", PipelineStatus::Pending),
        ];

        for (state, result, want) in cases {
            assert_eq!(
                normalize_pipeline_status(state, result),
                want,
                "{state:?}/{result:?}"
            );
        }
    }

    #[test]
    fn pipeline_trigger_table() {
        let cases = [
            ("PUSH", PipelineSource::Push),
            ("PULL_REQUEST", PipelineSource::MergeRequest),
            ("SCHEDULE", PipelineSource::Schedule),
            ("MANUAL", PipelineSource::Manual),
            ("TRIGGER", PipelineSource::Trigger),
            ("API", PipelineSource::Trigger),
            ("UNKNOWN", PipelineSource::Other),
            ("", PipelineSource::Other),
        ];

        for (trigger, want) in cases {
            assert_eq!(normalize_pipeline_trigger(trigger), want, "{trigger:?}");
        }
    }

    #[test]
    fn status_query_table() {
        let cases = [
            ("pending", Some(r#"state.name="PENDING""#)),
            ("running", Some(r#"state.name="IN_PROGRESS""#)),
            ("success", Some(r#"state.result.name="SUCCESSFUL""#)),
            ("failed", Some(r#"state.result.name="FAILED""#)),
            ("cancelled", Some(r#"state.result.name="STOPPED""#)),
            ("manual", Some(r#"state.name="HALTED""#)),
            ("skipped", None),
            ("unknown", None),
            ("", None),
        ];

        for (status, want) in cases {
            assert_eq!(map_pipeline_status_query(status), want, "{status:?}");
        }
    }

    #[test]
    fn dsl_quoting_escapes_quotes_and_backslashes() {
        assert_eq!(quote_dsl("main"), r#""main""#);
        assert_eq!(
            quote_dsl(r#"main" OR target.ref_name="develop"#),
            r#""main\" OR target.ref_name=\"develop""#
        );
        assert_eq!(quote_dsl(r"main\"), r#""main\\""#);
    }

    proptest::proptest! {
        // Unquoting must invert quoting for any ref, so no input can
        // terminate the predicate early.
        #[test]
        fn dsl_quoting_round_trips(ref_name in ".*") {
            let quoted = quote_dsl(&ref_name);

            let inner = quoted.strip_prefix('"').unwrap().strip_suffix('"').unwrap();

            let mut unquoted = String::new();
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    unquoted.push(chars.next().unwrap());
                } else {
                    proptest::prop_assert_ne!(c, '"');
                    unquoted.push(c);
                }
            }

            proptest::prop_assert_eq!(unquoted, ref_name);
        }
    }

    #[test]
    fn pull_request_state_params() {
        assert_eq!(map_pull_request_states("open"), vec!["OPEN"]);
        assert_eq!(map_pull_request_states("closed"), vec!["DECLINED"]);
        assert_eq!(map_pull_request_states("merged"), vec!["MERGED"]);
        assert_eq!(
            map_pull_request_states("all"),
            vec!["OPEN", "MERGED", "DECLINED", "SUPERSEDED"]
        );
        assert_eq!(map_pull_request_states("bogus"), vec!["OPEN"]);
    }

    #[test]
    fn pull_request_state_normalization() {
        assert_eq!(normalize_pull_request_state("OPEN"), PullRequestState::Open);
        assert_eq!(normalize_pull_request_state("MERGED"), PullRequestState::Merged);
        assert_eq!(normalize_pull_request_state("DECLINED"), PullRequestState::Closed);
        assert_eq!(normalize_pull_request_state("SUPERSEDED"), PullRequestState::Closed);
        assert_eq!(normalize_pull_request_state("ODD"), PullRequestState::Open);
    }

    #[test]
    fn pipeline_uuid_braces_are_stripped() {
        assert_eq!(strip_braces("{pipeline-uuid-123}"), "pipeline-uuid-123");
        assert_eq!(strip_braces("bare"), "bare");
    }

    #[test]
    fn pipeline_conversion_maps_all_fields() {
        let raw = r#"{
            "uuid": "{pipeline-uuid-123}",
            "build_number": 42,
            "state": {"name": "COMPLETED", "result": {"name": "SUCCESSFUL"}},
            "target": {"ref_name": "main", "commit": {"hash": "abc123def456"}},
            "trigger": {"name": "PUSH"},
            "created_on": "2026-01-15T10:30:00.123456+00:00",
            "completed_on": "2026-01-15T10:35:00.654321+00:00",
            "links": {"html": {"href": "https://bitbucket.org/owner/repo/pipelines/results/42"}}
        }"#;

        let pipeline: BitbucketPipeline = serde_json::from_str(raw).unwrap();
        let converted = convert_pipeline(&pipeline).unwrap();

        assert_eq!(converted.id, "pipeline-uuid-123");
        assert_eq!(converted.status, PipelineStatus::Success);
        assert_eq!(converted.ref_name, "main");
        assert_eq!(converted.sha, "abc123def456");
        assert_eq!(
            converted.web_url,
            "https://bitbucket.org/owner/repo/pipelines/results/42"
        );
        assert_eq!(converted.source, Some(PipelineSource::Push));
        assert!(converted.project_id.is_none());
        assert!(converted.updated_at.is_some());
    }

    #[test]
    fn bad_timestamp_is_internal_error() {
        let raw = r#"{
            "uuid": "{p1}",
            "state": {"name": "COMPLETED", "result": {"name": "SUCCESSFUL"}},
            "target": {"ref_name": "main", "commit": {"hash": "abc"}},
            "trigger": {"name": "PUSH"},
            "created_on": "not-a-timestamp",
            "links": {"html": {"href": "https://bb.org/p/1"}}
        }"#;

        let pipeline: BitbucketPipeline = serde_json::from_str(raw).unwrap();
        let err = convert_pipeline(&pipeline).unwrap_err();

        assert!(matches!(err, GfError::Internal(_)));
        assert!(err.to_string().contains("failed to parse created_on time"));
    }

    #[test]
    fn repository_conversion_omits_empty_fields() {
        let raw = r#"{"uuid": "{r1}", "name": "widget"}"#;
        let repo: BitbucketRepo = serde_json::from_str(raw).unwrap();
        let converted = convert_repository(&repo);

        assert_eq!(converted.id, "{r1}");
        assert!(converted.owner.is_none());
        assert!(converted.url.is_none());
        assert!(converted.default_branch.is_none());
        assert!(converted.visibility.is_none());
    }
}
