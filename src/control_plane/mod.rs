//! control_plane
//!
//! Git Server records and credential resolution.
//!
//! # Design
//!
//! A *Git Server* is a named configuration record owned by an external
//! control plane: it binds a provider tag, an API base URL, and a
//! reference to a secret holding the access token. The [`ControlPlane`]
//! trait is the boundary; [`GitServerService`] is the credential resolver
//! built on top of it. The resolver is stateless and re-reads the control
//! plane on every call.
//!
//! # Modules
//!
//! - `file_store`: file-backed [`ControlPlane`] implementation

mod file_store;

pub use file_store::FileControlPlane;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{GfError, Result};

/// Supported Git hosting providers. A closed sum: records carrying any
/// other tag fail to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    GitLab,
    Bitbucket,
}

impl Provider {
    /// Provider name as used in records and cache fingerprints.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::GitLab => "gitlab",
            Provider::Bitbucket => "bitbucket",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A Git Server configuration record as stored in the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitServerRecord {
    pub name: String,
    pub provider: Provider,
    /// Name of the secret holding the access token.
    #[serde(rename = "secretName")]
    pub secret_name: String,
    /// Provider API base URL.
    #[serde(rename = "apiUrl")]
    pub api_url: String,
}

/// A secret record. Only the token field is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub token: String,
}

/// Resolved settings for one Git Server, immutable for the lifetime of a
/// request.
#[derive(Debug, Clone)]
pub struct GitServerSettings {
    pub url: String,
    pub token: String,
    pub provider: Provider,
    pub git_server_name: String,
}

/// Boundary to the external control plane holding Git Server records and
/// credential secrets.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch one Git Server record by name.
    async fn get_git_server(&self, name: &str) -> Result<GitServerRecord>;

    /// List every Git Server record in the namespace.
    async fn list_git_servers(&self) -> Result<Vec<GitServerRecord>>;

    /// Fetch a secret by name.
    async fn get_secret(&self, name: &str) -> Result<SecretRecord>;
}

/// Credential resolver: turns a Git Server name into usable settings.
#[derive(Clone)]
pub struct GitServerService {
    control_plane: Arc<dyn ControlPlane>,
}

impl GitServerService {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Resolve the settings for one Git Server.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the record or its secret does not exist
    /// - `Internal` when the secret's token field is empty
    pub async fn get_settings(&self, git_server_name: &str) -> Result<GitServerSettings> {
        let record = self.control_plane.get_git_server(git_server_name).await?;

        self.settings_for_record(&record).await
    }

    /// Resolve settings for every known Git Server.
    ///
    /// The policy is strict: any per-record failure fails the whole list.
    pub async fn list_settings(&self) -> Result<Vec<GitServerSettings>> {
        let records = self.control_plane.list_git_servers().await?;

        let mut settings = Vec::with_capacity(records.len());

        for record in &records {
            let resolved = self.settings_for_record(record).await.map_err(|err| {
                GfError::Internal(format!(
                    "failed to get settings for git server {}: {err}",
                    record.name
                ))
            })?;

            settings.push(resolved);
        }

        Ok(settings)
    }

    async fn settings_for_record(&self, record: &GitServerRecord) -> Result<GitServerSettings> {
        let secret = self.control_plane.get_secret(&record.secret_name).await?;

        if secret.token.is_empty() {
            return Err(GfError::Internal("git provider token is empty".into()));
        }

        Ok(GitServerSettings {
            url: record.api_url.clone(),
            token: secret.token,
            provider: record.provider,
            git_server_name: record.name.clone(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{github_record, InMemoryControlPlane};
    use super::*;

    #[tokio::test]
    async fn get_settings_resolves_record_and_secret() {
        let cp = InMemoryControlPlane::default().with_server(github_record("gh1"), "token-123");
        let service = GitServerService::new(Arc::new(cp));

        let settings = service.get_settings("gh1").await.unwrap();
        assert_eq!(settings.provider, Provider::GitHub);
        assert_eq!(settings.token, "token-123");
        assert_eq!(settings.git_server_name, "gh1");
    }

    #[tokio::test]
    async fn missing_server_is_not_found() {
        let service = GitServerService::new(Arc::new(InMemoryControlPlane::default()));

        let err = service.get_settings("nope").await.unwrap_err();
        assert!(matches!(err, GfError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_token_is_internal() {
        let cp = InMemoryControlPlane::default().with_server(github_record("gh1"), "");
        let service = GitServerService::new(Arc::new(cp));

        let err = service.get_settings("gh1").await.unwrap_err();
        assert_eq!(
            err,
            GfError::Internal("git provider token is empty".into())
        );
    }

    #[tokio::test]
    async fn list_settings_is_strict() {
        let cp = InMemoryControlPlane::default()
            .with_server(github_record("gh1"), "ok")
            .with_server(github_record("gh2"), "");
        let service = GitServerService::new(Arc::new(cp));

        let err = service.list_settings().await.unwrap_err();
        assert!(err.to_string().contains("gh2"));
    }

    #[test]
    fn provider_tag_parses_lowercase() {
        let p: Provider = serde_json::from_str("\"bitbucket\"").unwrap();
        assert_eq!(p, Provider::Bitbucket);
        assert!(serde_json::from_str::<Provider>("\"gitea\"").is_err());
    }
}
