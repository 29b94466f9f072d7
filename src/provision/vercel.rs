use std::fmt;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};

use crate::provision::credentials::AccessToken;
use crate::provision::error::ProviderError;
use crate::provision::http::{read_json, send_error};

const PROVIDER: &str = "Vercel";

/// Deployment readiness as reported by the hosting provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeploymentState {
    Queued,
    Initializing,
    Building,
    Ready,
    Error,
    Canceled,
    Other(String),
}

impl DeploymentState {
    /// Only these states keep the poll loop going.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Initializing | Self::Building)
    }
}

impl From<String> for DeploymentState {
    fn from(raw: String) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "QUEUED" => Self::Queued,
            "INITIALIZING" => Self::Initializing,
            "BUILDING" => Self::Building,
            "READY" => Self::Ready,
            "ERROR" => Self::Error,
            "CANCELED" => Self::Canceled,
            _ => Self::Other(raw),
        }
    }
}

impl From<DeploymentState> for String {
    fn from(state: DeploymentState) -> Self {
        state.to_string()
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Initializing => "INITIALIZING",
            Self::Building => "BUILDING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
            Self::Canceled => "CANCELED",
            Self::Other(raw) => raw,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvTarget {
    Production,
    Preview,
    Development,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvKind {
    Encrypted,
    Plain,
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct EnvVariable {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: EnvKind,
    pub target: Vec<EnvTarget>,
}

impl EnvVariable {
    pub fn encrypted(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: EnvKind::Encrypted,
            target: vec![EnvTarget::Production, EnvTarget::Preview],
        }
    }
}

impl fmt::Debug for EnvVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvVariable")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// The repository a project or deployment builds from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    pub org: String,
    pub repo: String,
    pub git_ref: String,
}

impl GitSource {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLink {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub link: Option<ProjectLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnvSyncResult {
    pub created_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDeployment")]
pub struct Deployment {
    pub id: String,
    pub status: DeploymentState,
    pub url: Option<String>,
}

/// Wire shape: the state arrives as `readyState`, `status`, or both.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeployment {
    id: String,
    #[serde(default)]
    ready_state: Option<DeploymentState>,
    #[serde(default)]
    status: Option<DeploymentState>,
    #[serde(default)]
    url: Option<String>,
}

impl TryFrom<RawDeployment> for Deployment {
    type Error = String;

    fn try_from(raw: RawDeployment) -> Result<Self, Self::Error> {
        let status = raw
            .ready_state
            .or(raw.status)
            .ok_or_else(|| format!("deployment {} has no state", raw.id))?;
        Ok(Self {
            id: raw.id,
            status,
            url: raw.url,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasInfo {
    pub alias: String,
}

/// Hosting platform that builds and serves the storefront.
#[async_trait]
pub trait HostingProvider: Send + Sync {
    async fn create_project(
        &self,
        token: &AccessToken,
        name: &str,
        source: &GitSource,
    ) -> Result<ProjectInfo, ProviderError>;

    /// With `upsert`, existing keys are overwritten instead of duplicated.
    async fn set_env_variables(
        &self,
        token: &AccessToken,
        project_id: &str,
        variables: &[EnvVariable],
        upsert: bool,
    ) -> Result<EnvSyncResult, ProviderError>;

    /// Production deployment of `source` under `project`.
    async fn create_deployment(
        &self,
        token: &AccessToken,
        project: &ProjectInfo,
        source: &GitSource,
    ) -> Result<Deployment, ProviderError>;

    async fn get_deployment(
        &self,
        token: &AccessToken,
        deployment_id: &str,
    ) -> Result<Deployment, ProviderError>;

    async fn assign_alias(
        &self,
        token: &AccessToken,
        deployment_id: &str,
        alias: &str,
        redirect: Option<&str>,
    ) -> Result<AliasInfo, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct VercelConfig {
    pub api_url: String,
    pub team_id: Option<String>,
}

impl VercelConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.vercel.com";

    pub fn from_env() -> Self {
        let api_url = std::env::var("SHOPFORGE_VERCEL_API_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| Self::DEFAULT_API_URL.to_owned());
        let team_id = std::env::var("SHOPFORGE_VERCEL_TEAM_ID")
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());
        Self { api_url, team_id }
    }
}

#[derive(Debug, Clone)]
pub struct VercelClient {
    client: reqwest::Client,
    api_url: String,
    team_id: Option<String>,
}

impl VercelClient {
    pub fn new(config: VercelConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("build Vercel http client")?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            team_id: config.team_id,
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &AccessToken,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.api_url))
            .bearer_auth(token.secret())
            .header(USER_AGENT, "shopforge/0.1");
        if let Some(team_id) = &self.team_id {
            req = req.query(&[("teamId", team_id)]);
        }
        req
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectBody<'a> {
    name: &'a str,
    framework: &'a str,
    git_repository: GitRepositoryBody,
}

#[derive(Debug, Serialize)]
struct GitRepositoryBody {
    #[serde(rename = "type")]
    kind: &'static str,
    repo: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateDeploymentBody<'a> {
    name: &'a str,
    project: &'a str,
    target: &'a str,
    git_source: GitSourceBody<'a>,
}

#[derive(Debug, Serialize)]
struct GitSourceBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    org: &'a str,
    repo: &'a str,
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

#[derive(Debug, Serialize)]
struct AssignAliasBody<'a> {
    alias: &'a str,
    redirect: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateEnvResponse {
    #[serde(default)]
    created: serde_json::Value,
    #[serde(default)]
    failed: Vec<serde_json::Value>,
}

#[async_trait]
impl HostingProvider for VercelClient {
    async fn create_project(
        &self,
        token: &AccessToken,
        name: &str,
        source: &GitSource,
    ) -> Result<ProjectInfo, ProviderError> {
        let response = self
            .request(reqwest::Method::POST, "/v11/projects", token)
            .json(&CreateProjectBody {
                name,
                framework: "nextjs",
                git_repository: GitRepositoryBody {
                    kind: "github",
                    repo: source.full_name(),
                },
            })
            .send()
            .await
            .map_err(send_error(PROVIDER))?;
        let project: ProjectInfo = read_json(PROVIDER, response).await?;
        tracing::info!(id = %project.id, name = %project.name, "Vercel project created");
        Ok(project)
    }

    async fn set_env_variables(
        &self,
        token: &AccessToken,
        project_id: &str,
        variables: &[EnvVariable],
        upsert: bool,
    ) -> Result<EnvSyncResult, ProviderError> {
        let mut req = self.request(
            reqwest::Method::POST,
            &format!("/v10/projects/{project_id}/env"),
            token,
        );
        if upsert {
            req = req.query(&[("upsert", "true")]);
        }
        let response = req
            .json(variables)
            .send()
            .await
            .map_err(send_error(PROVIDER))?;
        let body: CreateEnvResponse = read_json(PROVIDER, response).await?;

        // `created` is a single object for one variable, an array for many.
        let created_count = match &body.created {
            serde_json::Value::Array(items) => items.len(),
            serde_json::Value::Object(_) => 1,
            _ => 0,
        };
        Ok(EnvSyncResult {
            created_count,
            failed_count: body.failed.len(),
        })
    }

    async fn create_deployment(
        &self,
        token: &AccessToken,
        project: &ProjectInfo,
        source: &GitSource,
    ) -> Result<Deployment, ProviderError> {
        let response = self
            .request(reqwest::Method::POST, "/v13/deployments", token)
            .json(&CreateDeploymentBody {
                name: &project.name,
                project: &project.id,
                target: "production",
                git_source: GitSourceBody {
                    kind: "github",
                    org: &source.org,
                    repo: &source.repo,
                    git_ref: &source.git_ref,
                },
            })
            .send()
            .await
            .map_err(send_error(PROVIDER))?;
        read_json(PROVIDER, response).await
    }

    async fn get_deployment(
        &self,
        token: &AccessToken,
        deployment_id: &str,
    ) -> Result<Deployment, ProviderError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/v13/deployments/{deployment_id}"),
                token,
            )
            .query(&[("withGitRepoInfo", "true")])
            .send()
            .await
            .map_err(send_error(PROVIDER))?;
        read_json(PROVIDER, response).await
    }

    async fn assign_alias(
        &self,
        token: &AccessToken,
        deployment_id: &str,
        alias: &str,
        redirect: Option<&str>,
    ) -> Result<AliasInfo, ProviderError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v2/deployments/{deployment_id}/aliases"),
                token,
            )
            .json(&AssignAliasBody { alias, redirect })
            .send()
            .await
            .map_err(send_error(PROVIDER))?;
        read_json(PROVIDER, response).await
    }
}
