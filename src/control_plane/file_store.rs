//! control_plane::file_store
//!
//! File-backed control plane.
//!
//! Records are JSON documents laid out under a root directory:
//!
//! ```text
//! <root>/<namespace>/gitservers/<name>.json
//! <root>/<namespace>/secrets/<name>.json
//! ```
//!
//! The store is read-only from the service's point of view; an operator
//! (or a sync job) writes the documents. Secret tokens are never logged
//! or included in error messages.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{ControlPlane, GitServerRecord, SecretRecord};
use crate::errors::{GfError, Result};

/// File-backed [`ControlPlane`] implementation.
#[derive(Debug, Clone)]
pub struct FileControlPlane {
    root: PathBuf,
    namespace: String,
}

impl FileControlPlane {
    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
        }
    }

    fn gitservers_dir(&self) -> PathBuf {
        self.root.join(&self.namespace).join("gitservers")
    }

    fn secrets_dir(&self) -> PathBuf {
        self.root.join(&self.namespace).join("secrets")
    }

    fn read_doc<T: DeserializeOwned>(path: &Path, kind: &str, name: &str) -> Result<T> {
        if !path.exists() {
            return Err(GfError::NotFound(format!("{kind} {name} not found")));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| GfError::Internal(format!("cannot read {kind} {name}: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| GfError::Internal(format!("cannot parse {kind} {name}: {e}")))
    }
}

#[async_trait]
impl ControlPlane for FileControlPlane {
    async fn get_git_server(&self, name: &str) -> Result<GitServerRecord> {
        let path = self.gitservers_dir().join(format!("{name}.json"));
        Self::read_doc(&path, "git server", name)
    }

    async fn list_git_servers(&self) -> Result<Vec<GitServerRecord>> {
        let dir = self.gitservers_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&dir)
            .map_err(|e| GfError::Internal(format!("cannot list git servers: {e}")))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| GfError::Internal(format!("cannot list git servers: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            records.push(Self::read_doc::<GitServerRecord>(
                &path,
                "git server",
                &name,
            )?);
        }

        // Directory iteration order is filesystem-dependent.
        records.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(records)
    }

    async fn get_secret(&self, name: &str) -> Result<SecretRecord> {
        let path = self.secrets_dir().join(format!("{name}.json"));
        Self::read_doc(&path, "secret", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::Provider;
    use tempfile::TempDir;

    fn write_doc(dir: &Path, name: &str, body: &str) {
        std::fs::create_dir_all(dir).expect("mkdir");
        std::fs::write(dir.join(format!("{name}.json")), body).expect("write doc");
    }

    fn store() -> (TempDir, FileControlPlane) {
        let temp = TempDir::new().expect("create temp dir");
        let store = FileControlPlane::new(temp.path(), "krci");
        (temp, store)
    }

    #[tokio::test]
    async fn get_git_server_reads_record() {
        let (temp, store) = store();
        write_doc(
            &temp.path().join("krci/gitservers"),
            "gh1",
            r#"{"name":"gh1","provider":"github","secretName":"gh1-secret","apiUrl":"https://api.github.com"}"#,
        );

        let record = store.get_git_server("gh1").await.expect("get");
        assert_eq!(record.provider, Provider::GitHub);
        assert_eq!(record.secret_name, "gh1-secret");
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let (_temp, store) = store();

        let err = store.get_git_server("nope").await.unwrap_err();
        assert_eq!(err, GfError::NotFound("git server nope not found".into()));
    }

    #[tokio::test]
    async fn list_is_sorted_and_skips_non_json() {
        let (temp, store) = store();
        let dir = temp.path().join("krci/gitservers");
        write_doc(
            &dir,
            "zeta",
            r#"{"name":"zeta","provider":"gitlab","secretName":"s","apiUrl":"https://gitlab.com/api/v4"}"#,
        );
        write_doc(
            &dir,
            "alpha",
            r#"{"name":"alpha","provider":"github","secretName":"s","apiUrl":"https://api.github.com"}"#,
        );
        std::fs::write(dir.join("README.md"), "ignored").expect("write readme");

        let records = store.list_git_servers().await.expect("list");
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn empty_namespace_lists_nothing() {
        let (_temp, store) = store();

        let records = store.list_git_servers().await.expect("list");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn malformed_record_is_internal() {
        let (temp, store) = store();
        write_doc(&temp.path().join("krci/gitservers"), "bad", "{not json");

        let err = store.get_git_server("bad").await.unwrap_err();
        assert!(matches!(err, GfError::Internal(_)));
    }

    #[tokio::test]
    async fn secret_round_trip() {
        let (temp, store) = store();
        write_doc(
            &temp.path().join("krci/secrets"),
            "gh1-secret",
            r#"{"token":"abc123"}"#,
        );

        let secret = store.get_secret("gh1-secret").await.expect("get secret");
        assert_eq!(secret.token, "abc123");
    }
}
