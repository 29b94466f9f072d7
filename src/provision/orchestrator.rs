use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::provision::credentials::{AccessToken, Credentials};
use crate::provision::env_file::{encrypted_variables, read_env_file};
use crate::provision::error::ProvisionError;
use crate::provision::github::{RepositoryProvider, Visibility};
use crate::provision::publish::{PushResult, WorkingTreePublisher};
use crate::provision::vercel::{
    Deployment, DeploymentState, GitSource, HostingProvider, ProjectInfo,
};
use crate::store_config::StoreConfig;

#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub working_tree: PathBuf,
    pub env_file: PathBuf,
    pub visibility: Visibility,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub alias_suffix: String,
}

impl ProvisionSettings {
    pub const DEFAULT_POLL_SECS: u64 = 5;
    pub const DEFAULT_MAX_POLLS: u32 = 120;
    pub const DEFAULT_ALIAS_SUFFIX: &'static str = "vercel.app";

    pub fn new(working_tree: impl Into<PathBuf>) -> Self {
        let working_tree = working_tree.into();
        Self {
            env_file: working_tree.join(".env.local"),
            working_tree,
            visibility: Visibility::Public,
            poll_interval: Duration::from_secs(Self::DEFAULT_POLL_SECS),
            max_polls: Self::DEFAULT_MAX_POLLS,
            alias_suffix: Self::DEFAULT_ALIAS_SUFFIX.to_owned(),
        }
    }

    /// [`Self::new`] with `SHOPFORGE_DEPLOY_*` / `SHOPFORGE_ALIAS_SUFFIX`
    /// overrides applied.
    pub fn from_env(working_tree: impl Into<PathBuf>) -> Self {
        let mut settings = Self::new(working_tree);
        if let Some(secs) = env_parse::<u64>("SHOPFORGE_DEPLOY_POLL_SECS") {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse::<u32>("SHOPFORGE_DEPLOY_MAX_POLLS").filter(|v| *v > 0) {
            settings.max_polls = max;
        }
        if let Some(suffix) = std::env::var("SHOPFORGE_ALIAS_SUFFIX")
            .ok()
            .map(|v| v.trim().trim_start_matches('.').to_owned())
            .filter(|v| !v.is_empty())
        {
            settings.alias_suffix = suffix;
        }
        settings
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Start,
    RepoCreated,
    Pushed,
    ProjectCreated,
    EnvSet,
    DeployTriggered,
    Ready,
    Aliased,
}

/// Everything one provisioning attempt has produced so far, filled in
/// strictly in stage order.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningRun {
    pub stage: RunStage,
    pub repository_id: Option<u64>,
    pub clone_url: Option<String>,
    pub push_result: Option<PushResult>,
    pub project_id: Option<String>,
    pub deployment_id: Option<String>,
    pub deployment_status: Option<DeploymentState>,
    pub alias_url: Option<String>,
}

impl ProvisioningRun {
    fn new() -> Self {
        Self {
            stage: RunStage::Start,
            repository_id: None,
            clone_url: None,
            push_result: None,
            project_id: None,
            deployment_id: None,
            deployment_status: None,
            alias_url: None,
        }
    }

    fn advance(&mut self, stage: RunStage) {
        tracing::info!(from = ?self.stage, to = ?stage, "provisioning stage");
        self.stage = stage;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionOutcome {
    pub repository_url: String,
    pub project: ProjectInfo,
    pub deployment_url: Option<String>,
    /// `None` with `alias_error` set means the deployment is live but
    /// unaliased.
    pub alias: Option<String>,
    pub alias_error: Option<String>,
    pub run: ProvisioningRun,
}

/// Sequences repository creation, publish, project creation, env sync,
/// deployment and aliasing. One run at a time; no retries, no rollback.
pub struct Orchestrator {
    repositories: Arc<dyn RepositoryProvider>,
    publisher: Arc<dyn WorkingTreePublisher>,
    hosting: Arc<dyn HostingProvider>,
    store_config: Arc<StoreConfig>,
    settings: ProvisionSettings,
    run_guard: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        repositories: Arc<dyn RepositoryProvider>,
        publisher: Arc<dyn WorkingTreePublisher>,
        hosting: Arc<dyn HostingProvider>,
        store_config: Arc<StoreConfig>,
        settings: ProvisionSettings,
    ) -> Self {
        Self {
            repositories,
            publisher,
            hosting,
            store_config,
            settings,
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    pub async fn provision(
        &self,
        credentials: &Credentials,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let _guard = self
            .run_guard
            .try_lock()
            .map_err(|_| ProvisionError::RunInProgress)?;

        let github_token = credentials.require_source_control()?;
        let vercel_token = credentials.require_hosting()?;

        let identity = self.store_config.identity().await;
        identity.validate()?;
        let repo_name = identity.repo_name();
        let slug = identity.slug();

        // Read before any remote call so a bad env file leaves nothing behind.
        let variables = read_env_file(&self.settings.env_file)
            .map(encrypted_variables)
            .map_err(ProvisionError::EnvSync)?;

        let mut run = ProvisioningRun::new();
        tracing::info!(store = %identity.name, repo = %repo_name, "provisioning: start");

        let repository = self
            .repositories
            .create_repository(github_token, &repo_name, self.settings.visibility)
            .await
            .map_err(|err| {
                if err.is_already_exists() {
                    ProvisionError::RepositoryExists {
                        name: repo_name.clone(),
                    }
                } else {
                    ProvisionError::RepositoryProvider(err)
                }
            })?;
        run.repository_id = Some(repository.id);
        run.clone_url = Some(repository.clone_url.clone());
        run.advance(RunStage::RepoCreated);

        let push = self
            .publisher
            .publish(&self.settings.working_tree, &repository.clone_url, github_token)
            .await
            .map_err(ProvisionError::Publish)?;
        let source = GitSource {
            org: repository.owner.login.clone(),
            repo: repository.name.clone(),
            git_ref: push.branch.clone(),
        };
        run.push_result = Some(push);
        run.advance(RunStage::Pushed);

        let project = self
            .hosting
            .create_project(vercel_token, &slug, &source)
            .await
            .map_err(ProvisionError::ProjectCreation)?;
        run.project_id = Some(project.id.clone());
        run.advance(RunStage::ProjectCreated);

        let synced = self
            .hosting
            .set_env_variables(vercel_token, &project.id, &variables, true)
            .await
            .map_err(|err| ProvisionError::EnvSync(err.into()))?;
        if synced.failed_count > 0 {
            return Err(ProvisionError::EnvSync(anyhow::anyhow!(
                "{} of {} environment variables were rejected",
                synced.failed_count,
                variables.len()
            )));
        }
        tracing::info!(created = synced.created_count, "environment variables synced");
        run.advance(RunStage::EnvSet);

        let deployment = self
            .hosting
            .create_deployment(vercel_token, &project, &source)
            .await
            .map_err(ProvisionError::DeploymentTrigger)?;
        run.deployment_id = Some(deployment.id.clone());
        run.deployment_status = Some(deployment.status.clone());
        run.advance(RunStage::DeployTriggered);
        tracing::info!(deployment_id = %deployment.id, status = %deployment.status, "deployment created");

        let ready = self
            .wait_until_settled(vercel_token, &deployment.id, &mut run)
            .await?;
        run.advance(RunStage::Ready);
        tracing::info!(deployment_id = %deployment.id, url = ?ready.url, "deployment ready");

        let alias = format!("{slug}.{}", self.settings.alias_suffix);
        let (alias, alias_error) = match self
            .hosting
            .assign_alias(vercel_token, &deployment.id, &alias, None)
            .await
        {
            Ok(assigned) => {
                tracing::info!(alias = %assigned.alias, "alias assigned");
                run.alias_url = Some(assigned.alias.clone());
                run.advance(RunStage::Aliased);
                (Some(assigned.alias), None)
            }
            Err(source) => {
                let err = ProvisionError::Alias { alias, source };
                tracing::warn!(err = %err, "alias assignment failed; deployment stays live");
                (None, Some(err.to_string()))
            }
        };

        Ok(ProvisionOutcome {
            repository_url: repository.html_url,
            project,
            deployment_url: ready.url,
            alias,
            alias_error,
            run,
        })
    }

    /// Sleeps, then checks, for as long as the deployment is initializing or
    /// building, up to `max_polls` checks.
    async fn wait_until_settled(
        &self,
        token: &AccessToken,
        deployment_id: &str,
        run: &mut ProvisioningRun,
    ) -> Result<Deployment, ProvisionError> {
        for poll in 1..=self.settings.max_polls {
            tokio::time::sleep(self.settings.poll_interval).await;

            let deployment = self
                .hosting
                .get_deployment(token, deployment_id)
                .await
                .map_err(|source| ProvisionError::DeploymentStatus {
                    deployment_id: deployment_id.to_owned(),
                    source,
                })?;
            tracing::info!(deployment_id, poll, status = %deployment.status, "deployment status");
            run.deployment_status = Some(deployment.status.clone());

            if deployment.status.is_in_progress() {
                continue;
            }
            if deployment.status == DeploymentState::Ready {
                return Ok(deployment);
            }
            return Err(ProvisionError::DeploymentFailed {
                deployment_id: deployment_id.to_owned(),
                status: deployment.status.to_string(),
            });
        }

        Err(ProvisionError::DeploymentTimeout {
            deployment_id: deployment_id.to_owned(),
            polls: self.settings.max_polls,
        })
    }
}
