//! services::organizations

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::{self, Cache};
use crate::control_plane::{GitServerService, GitServerSettings};
use crate::errors::Result;
use crate::models::Organization;
use crate::providers::{lookup, ProviderRegistry};

/// Registry lookup plus caching for organization listings. The
/// fingerprint is just the git server name: the listing is scoped to
/// the authenticated identity, which is fixed per server.
pub struct OrganizationDispatcher {
    registry: Arc<ProviderRegistry>,
    cache: Cache<Vec<Organization>>,
}

impl OrganizationDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            cache: cache::organization_cache(),
        }
    }

    pub fn cache(&self) -> Cache<Vec<Organization>> {
        self.cache.clone()
    }

    pub async fn list_user_organizations(
        &self,
        settings: &GitServerSettings,
    ) -> Result<Vec<Organization>> {
        let provider = lookup(&self.registry, settings.provider)?;

        let key = settings.git_server_name.clone();
        let settings = settings.clone();

        self.cache
            .get_or_fetch(&key, move || {
                let provider = provider.clone();
                let settings = settings.clone();

                async move { provider.list_user_organizations(&settings).await }
            })
            .await
    }
}

/// Organization operations keyed by git server name.
pub struct OrganizationService {
    git_servers: GitServerService,
    dispatcher: Arc<OrganizationDispatcher>,
}

impl OrganizationService {
    pub fn new(git_servers: GitServerService, dispatcher: Arc<OrganizationDispatcher>) -> Self {
        Self {
            git_servers,
            dispatcher,
        }
    }

    pub async fn list_user_organizations(
        &self,
        git_server_name: &str,
    ) -> Result<Vec<Organization>> {
        let settings = self.git_servers.get_settings(git_server_name).await?;

        self.dispatcher.list_user_organizations(&settings).await
    }
}

/// Populate the organization cache for every configured git server.
///
/// Runs detached so startup is never blocked on provider availability.
/// Failures are logged and swallowed; the cache fills on first request
/// instead.
pub fn spawn_warm_up(
    git_servers: GitServerService,
    dispatcher: Arc<OrganizationDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let settings_list = match git_servers.list_settings().await {
            Ok(list) => list,
            Err(err) => {
                error!(error = %err, "failed to list git server settings for cache warm-up");
                return;
            }
        };

        for settings in settings_list {
            match dispatcher.list_user_organizations(&settings).await {
                Ok(_) => info!(
                    provider = %settings.provider,
                    git_server = %settings.git_server_name,
                    "warmed up organization cache"
                ),
                Err(err) => error!(
                    provider = %settings.provider,
                    git_server = %settings.git_server_name,
                    error = %err,
                    "failed to warm up organization cache"
                ),
            }
        }
    })
}
