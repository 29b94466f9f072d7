//! Store provisioning: repository, push, hosting project, environment,
//! deployment and alias.

pub mod credentials;
pub mod env_file;
pub mod error;
pub mod github;
pub(crate) mod http;
pub mod orchestrator;
pub mod publish;
pub mod vercel;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::ProvisionArgs;
use crate::provision::credentials::Credentials;
use crate::provision::github::{GitHubClient, GitHubConfig, Visibility, repository_exists};
use crate::provision::orchestrator::{Orchestrator, ProvisionSettings};
use crate::provision::publish::GitCliPublisher;
use crate::provision::vercel::{VercelClient, VercelConfig};
use crate::store_config::{StoreConfig, StoreIdentity, store_config_path};

/// Orchestrator wired to the real GitHub, git and Vercel clients.
pub fn orchestrator_from_env(
    store_config: Arc<StoreConfig>,
    settings: ProvisionSettings,
) -> anyhow::Result<Orchestrator> {
    let github = GitHubClient::new(GitHubConfig::from_env()).context("init GitHub client")?;
    let vercel = VercelClient::new(VercelConfig::from_env()).context("init Vercel client")?;
    Ok(Orchestrator::new(
        Arc::new(github),
        Arc::new(GitCliPublisher::default()),
        Arc::new(vercel),
        store_config,
        settings,
    ))
}

/// Name of an existing repository the store would collide with, if the
/// source-control token is present and the listing succeeds.
pub async fn repository_collision(
    credentials: &Credentials,
    identity: &StoreIdentity,
) -> Option<String> {
    let token = credentials.source_control.as_ref()?;
    let client = match GitHubClient::new(GitHubConfig::from_env()) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(?err, "skipping repository name check");
            return None;
        }
    };
    let name = identity.repo_name();
    match repository_exists(&client, token, &name).await {
        Ok(true) => Some(name),
        Ok(false) => None,
        Err(err) => {
            tracing::warn!(err = %err, "repository name check failed");
            None
        }
    }
}

pub async fn run(data_dir: &Path, args: ProvisionArgs) -> anyhow::Result<()> {
    let store_config = StoreConfig::load(store_config_path(data_dir))
        .await
        .context("load store config")?;

    let mut settings = ProvisionSettings::from_env(&args.tree);
    if let Some(env_file) = args.env_file {
        settings.env_file = env_file;
    }
    if args.private {
        settings.visibility = Visibility::Private;
    }

    let orchestrator = orchestrator_from_env(Arc::new(store_config), settings)?;
    let outcome = orchestrator.provision(&Credentials::from_env()).await?;
    if let Some(err) = &outcome.alias_error {
        eprintln!("warning: deployment is live but unaliased: {err}");
    }

    let json = serde_json::to_string_pretty(&outcome).context("serialize outcome")?;
    println!("{json}");
    Ok(())
}

pub async fn repos() -> anyhow::Result<()> {
    let credentials = Credentials::from_env();
    let token = credentials.require_source_control()?;
    let client = GitHubClient::new(GitHubConfig::from_env())?;
    let repositories = github::RepositoryProvider::list_repositories(&client, token).await?;
    for repo in repositories {
        println!("{}\t{}", repo.id, repo.name);
    }
    Ok(())
}

pub fn connections() -> anyhow::Result<()> {
    let status = Credentials::from_env().status();
    let json = serde_json::to_string_pretty(&status).context("serialize status")?;
    println!("{json}");
    Ok(())
}
