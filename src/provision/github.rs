use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::provision::credentials::AccessToken;
use crate::provision::error::ProviderError;
use crate::provision::http::{parse_error_message, read_json, send_error};

const PROVIDER: &str = "GitHub";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryOwner {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRepository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
    pub html_url: String,
    pub owner: RepositoryOwner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub id: u64,
    pub name: String,
}

/// Source-control host the working tree is published to.
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// Fails with [`ProviderError::AlreadyExists`] when the account already
    /// owns a repository with this name.
    async fn create_repository(
        &self,
        token: &AccessToken,
        name: &str,
        visibility: Visibility,
    ) -> Result<CreatedRepository, ProviderError>;

    async fn list_repositories(
        &self,
        token: &AccessToken,
    ) -> Result<Vec<RepositorySummary>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
}

impl GitHubConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.github.com";

    pub fn from_env() -> Self {
        let api_url = std::env::var("SHOPFORGE_GITHUB_API_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| Self::DEFAULT_API_URL.to_owned());
        Self { api_url }
    }
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("build GitHub http client")?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &AccessToken,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_url))
            .bearer_auth(token.secret())
            .header(USER_AGENT, "shopforge/0.1")
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }
}

#[derive(Debug, Serialize)]
struct CreateRepositoryBody<'a> {
    name: &'a str,
    private: bool,
}

#[async_trait]
impl RepositoryProvider for GitHubClient {
    async fn create_repository(
        &self,
        token: &AccessToken,
        name: &str,
        visibility: Visibility,
    ) -> Result<CreatedRepository, ProviderError> {
        let response = self
            .request(reqwest::Method::POST, "/user/repos", token)
            .json(&CreateRepositoryBody {
                name,
                private: visibility == Visibility::Private,
            })
            .send()
            .await
            .map_err(send_error(PROVIDER))?;

        let status = response.status();
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            let raw = response.text().await.map_err(send_error(PROVIDER))?;
            let message = parse_error_message(&raw).unwrap_or(raw);
            if status == StatusCode::CONFLICT || message.contains("already exists") {
                return Err(ProviderError::AlreadyExists {
                    provider: PROVIDER,
                    message,
                });
            }
            return Err(ProviderError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message,
            });
        }

        let repository: CreatedRepository = read_json(PROVIDER, response).await?;
        tracing::info!(id = repository.id, name = %repository.full_name, "GitHub repository created");
        Ok(repository)
    }

    async fn list_repositories(
        &self,
        token: &AccessToken,
    ) -> Result<Vec<RepositorySummary>, ProviderError> {
        let response = self
            .request(reqwest::Method::GET, "/user/repos", token)
            .query(&[("visibility", "all"), ("per_page", "100")])
            .send()
            .await
            .map_err(send_error(PROVIDER))?;
        read_json(PROVIDER, response).await
    }
}

/// Whether the account already owns `name`. GitHub compares repository
/// names case-insensitively.
pub async fn repository_exists(
    provider: &dyn RepositoryProvider,
    token: &AccessToken,
    name: &str,
) -> Result<bool, ProviderError> {
    let repositories = provider.list_repositories(token).await?;
    Ok(repositories
        .iter()
        .any(|repo| repo.name.eq_ignore_ascii_case(name)))
}
