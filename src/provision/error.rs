//! Typed errors for provisioning.
//!
//! Every variant of [`ProvisionError`] ends the run; nothing is retried or
//! rolled back automatically.

use thiserror::Error;

use crate::store_config::ConfigError;

/// Failure reported by a remote provider client.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 409/422-style conflict on create.
    #[error("{provider}: already exists: {message}")]
    AlreadyExists {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{provider} is not connected: no access token available")]
    CredentialMissing { provider: &'static str },

    #[error(transparent)]
    InvalidConfiguration(#[from] ConfigError),

    #[error("repository already exists: {name}")]
    RepositoryExists { name: String },

    #[error("create repository: {0}")]
    RepositoryProvider(#[source] ProviderError),

    #[error("publish working tree: {0:#}")]
    Publish(#[source] anyhow::Error),

    #[error("create hosting project: {0}")]
    ProjectCreation(#[source] ProviderError),

    #[error("sync environment variables: {0:#}")]
    EnvSync(#[source] anyhow::Error),

    #[error("trigger deployment: {0}")]
    DeploymentTrigger(#[source] ProviderError),

    #[error("poll deployment {deployment_id}: {source}")]
    DeploymentStatus {
        deployment_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("deployment {deployment_id} ended with status {status}")]
    DeploymentFailed {
        deployment_id: String,
        status: String,
    },

    #[error("deployment {deployment_id} not ready after {polls} status checks")]
    DeploymentTimeout { deployment_id: String, polls: u32 },

    #[error("assign alias {alias}: {source}")]
    Alias {
        alias: String,
        #[source]
        source: ProviderError,
    },

    #[error("another provisioning run is in progress")]
    RunInProgress,
}

impl ProvisionError {
    /// Short machine-readable kind, used in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CredentialMissing { .. } => "credential_missing",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::RepositoryExists { .. } => "repository_exists",
            Self::RepositoryProvider(_) => "repository_provider_error",
            Self::Publish(_) => "publish_error",
            Self::ProjectCreation(_) => "project_creation_error",
            Self::EnvSync(_) => "env_sync_error",
            Self::DeploymentTrigger(_) => "deployment_trigger_error",
            Self::DeploymentStatus { .. } => "deployment_status_error",
            Self::DeploymentFailed { .. } => "deployment_failed",
            Self::DeploymentTimeout { .. } => "deployment_timeout",
            Self::Alias { .. } => "alias_error",
            Self::RunInProgress => "run_in_progress",
        }
    }
}
