use async_trait::async_trait;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::naming::{derive_repo_name, logical_name_from_repo, LogicalName, RemoteRepoId};

const PER_PAGE: u32 = 100;

/// Read and create access to the hosting service's repository catalog
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Repositories of the authenticated owner that follow the naming convention
    async fn list_tracked_repositories(&self) -> SyncResult<BTreeMap<LogicalName, RemoteRepoId>>;

    /// Return the repository for a world, creating a private one when it does not exist
    async fn create_if_absent(&self, logical_name: &str) -> SyncResult<RemoteRepoId>;
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoSummary {
    name: String,
    owner: Login,
}

#[derive(Debug, Serialize)]
struct ListParams {
    per_page: u32,
    page: u32,
    affiliation: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateRepoBody<'a> {
    name: &'a str,
    description: String,
    private: bool,
    auto_init: bool,
}

/// GitHub client wrapper implementing [`RemoteCatalog`] over the REST API
pub struct GitHubCatalog {
    client: Octocrab,
    prefix: String,
    authenticated: bool,
    owner: OnceCell<String>,
}

impl GitHubCatalog {
    /// Build a client against `github.api_base_url`; a missing token is reported on first use
    pub fn new(config: &Config, token: Option<String>) -> SyncResult<Self> {
        let token = token.filter(|t| !t.is_empty());
        let authenticated = token.is_some();

        let mut builder = Octocrab::builder()
            .base_uri(config.github.api_base_url.as_str())
            .map_err(|e| SyncError::Config(format!("invalid api_base_url: {}", e)))?;
        if let Some(token) = token {
            builder = builder.personal_token(token);
        }
        let client = builder
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create GitHub client: {}", e)))?;

        Ok(Self {
            client,
            prefix: config.github.repo_prefix.clone(),
            authenticated,
            owner: OnceCell::new(),
        })
    }

    /// Login of the token's owner, fetched once and cached
    pub async fn owner(&self) -> SyncResult<&str> {
        if !self.authenticated {
            return Err(SyncError::Auth("no GitHub token configured".to_string()));
        }

        let login = self
            .owner
            .get_or_try_init(|| async {
                let user: Login = self
                    .client
                    .get("/user", None::<&()>)
                    .await
                    .map_err(classify_api_error)?;
                info!("Authenticated as GitHub user: {}", user.login);
                Ok::<_, SyncError>(user.login)
            })
            .await?;

        Ok(login.as_str())
    }

    async fn get_repo(&self, id: &RemoteRepoId) -> SyncResult<RemoteRepoId> {
        let route = format!("/repos/{}/{}", id.owner(), id.name());
        let repo: RepoSummary = self
            .client
            .get(route, None::<&()>)
            .await
            .map_err(classify_api_error)?;
        Ok(RemoteRepoId::new(repo.owner.login, repo.name))
    }

    /// Create a private repository and return the id GitHub assigned
    ///
    /// `None` when GitHub reports the name is already taken.
    async fn create_repo(&self, name: &str, logical_name: &str) -> SyncResult<Option<RemoteRepoId>> {
        let body = CreateRepoBody {
            name,
            description: format!("Automated backup for Minecraft world: {}", logical_name),
            private: true,
            auto_init: false,
        };
        let result: Result<RepoSummary, octocrab::Error> =
            self.client.post("/user/repos", Some(&body)).await;

        // GitHub may rewrite characters it does not allow in the name
        match result {
            Ok(repo) => Ok(Some(RemoteRepoId::new(repo.owner.login, repo.name))),
            Err(e) if status_of(&e) == Some(422) => Ok(None),
            Err(e) => Err(classify_api_error(e)),
        }
    }
}

#[async_trait]
impl RemoteCatalog for GitHubCatalog {
    async fn list_tracked_repositories(&self) -> SyncResult<BTreeMap<LogicalName, RemoteRepoId>> {
        let owner = self.owner().await?.to_string();
        debug!("Fetching repositories for: {}", owner);

        let mut tracked = BTreeMap::new();
        let mut page = 1u32;

        loop {
            let params = ListParams {
                per_page: PER_PAGE,
                page,
                affiliation: "owner",
            };
            let items: Vec<RepoSummary> = self
                .client
                .get("/user/repos", Some(&params))
                .await
                .map_err(classify_api_error)?;

            let count = items.len();
            for repo in items {
                if repo.owner.login != owner {
                    continue;
                }
                let Some(logical) = logical_name_from_repo(&self.prefix, &repo.name) else {
                    continue;
                };
                if let Some(existing) = tracked.get(&logical) {
                    warn!(
                        "Repositories {} and {} both map to world '{}', keeping the first",
                        existing,
                        repo.name,
                        logical
                    );
                    continue;
                }
                tracked.insert(logical, RemoteRepoId::new(repo.owner.login, repo.name));
            }

            if count < PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        info!("Found {} backup repositories", tracked.len());
        Ok(tracked)
    }

    async fn create_if_absent(&self, logical_name: &str) -> SyncResult<RemoteRepoId> {
        let owner = self.owner().await?.to_string();
        let id = RemoteRepoId::new(owner, derive_repo_name(&self.prefix, logical_name));

        match self.get_repo(&id).await {
            Ok(existing) => {
                debug!("Repository {} already exists", existing);
                return Ok(existing);
            }
            Err(SyncError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        match self.create_repo(id.name(), logical_name).await? {
            Some(created) => {
                info!("Created private repository {}", created);
                Ok(created)
            }
            None => {
                debug!("Repository {} already exists", id);
                self.get_repo(&id).await
            }
        }
    }
}

fn status_of(err: &octocrab::Error) -> Option<u16> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
        _ => None,
    }
}

/// Map octocrab failures onto the error taxonomy
fn classify_api_error(err: octocrab::Error) -> SyncError {
    match &err {
        octocrab::Error::GitHub { source, .. } => {
            let status = source.status_code.as_u16();
            let message = format!("{} ({})", source.message, status);
            match status {
                401 | 403 => SyncError::Auth(message),
                404 => SyncError::NotFound(message),
                _ => SyncError::Network(message),
            }
        }
        _ => SyncError::Network(err.to_string()),
    }
}
