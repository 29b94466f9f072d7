use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cli::ConfigSetArgs;
use crate::json_store::{read_json, write_json_atomic};
use crate::provision::credentials::Credentials;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid store configuration: {0}")]
    InvalidConfiguration(String),

    #[error("persist store configuration: {0:#}")]
    Persist(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultImageIndexes {
    pub product_card: u32,
    pub product_page: u32,
    pub checkout_page: u32,
}

/// The storefront being administered.
///
/// Missing fields deserialize empty so [`StoreIdentity::validate`] can name
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub currency_sign: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub default_image: DefaultImageIndexes,
}

impl Default for StoreIdentity {
    fn default() -> Self {
        Self {
            name: "My Store".to_owned(),
            currency: "UAH".to_owned(),
            currency_sign: "₴".to_owned(),
            domain: "https://my-store.vercel.app".to_owned(),
            database: "my-store".to_owned(),
            default_image: DefaultImageIndexes::default(),
        }
    }
}

impl StoreIdentity {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.currency.trim().is_empty() {
            missing.push("currency");
        }
        if self.domain.trim().is_empty() {
            missing.push("domain");
        }
        if !missing.is_empty() {
            return Err(ConfigError::InvalidConfiguration(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        if repo_name(&self.name).is_empty() {
            return Err(ConfigError::InvalidConfiguration(format!(
                "name has no url-safe characters: {:?}",
                self.name
            )));
        }
        Ok(())
    }

    /// Remote repository name; case is preserved.
    pub fn repo_name(&self) -> String {
        repo_name(&self.name)
    }

    /// Lower-cased [`Self::repo_name`], used for hosting projects and aliases.
    pub fn slug(&self) -> String {
        self.repo_name().to_lowercase()
    }

    pub fn with_generated_database(mut self, today: NaiveDate) -> Self {
        self.database = format!("{}_{}", self.slug(), today.format("%Y-%m-%d"));
        self
    }
}

/// Collapses every run of characters outside `[A-Za-z0-9._-]` into one `-`
/// and trims separators from both ends.
pub fn repo_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    out.trim_matches(|c| c == '.' || c == '_').to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionedIdentity {
    pub version: u64,
    pub identity: StoreIdentity,
}

/// Process-wide StoreIdentity accessor.
///
/// Readers get an `Arc` of a complete record; writers validate, persist,
/// then swap the whole record under the write lock.
#[derive(Debug)]
pub struct StoreConfig {
    path: Option<PathBuf>,
    current: RwLock<Arc<VersionedIdentity>>,
}

impl StoreConfig {
    pub fn in_memory(identity: StoreIdentity) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(VersionedIdentity {
                version: 1,
                identity,
            })),
        }
    }

    /// Loads `path`, falling back to [`StoreIdentity::default`] when absent.
    pub async fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let stored = read_json::<VersionedIdentity>(&path).await?;
        let current = match stored {
            Some(stored) => stored,
            None => {
                tracing::info!(path = %path.display(), "no store config on disk; using defaults");
                VersionedIdentity {
                    version: 0,
                    identity: StoreIdentity::default(),
                }
            }
        };
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(current)),
        })
    }

    pub async fn get(&self) -> Arc<VersionedIdentity> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn identity(&self) -> StoreIdentity {
        self.get().await.identity.clone()
    }

    pub async fn update(
        &self,
        identity: StoreIdentity,
    ) -> Result<Arc<VersionedIdentity>, ConfigError> {
        identity.validate()?;

        let mut current = self.current.write().await;
        let next = Arc::new(VersionedIdentity {
            version: current.version + 1,
            identity,
        });
        if let Some(path) = &self.path {
            write_json_atomic(path, &*next)
                .await
                .map_err(ConfigError::Persist)?;
        }
        *current = Arc::clone(&next);
        tracing::info!(version = next.version, name = %next.identity.name, "store config updated");
        Ok(next)
    }
}

pub fn store_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("store.json")
}

pub async fn show(data_dir: &Path) -> anyhow::Result<()> {
    let config = StoreConfig::load(store_config_path(data_dir))
        .await
        .context("load store config")?;
    print_json(&*config.get().await)
}

pub async fn set(data_dir: &Path, args: ConfigSetArgs) -> anyhow::Result<()> {
    let config = StoreConfig::load(store_config_path(data_dir))
        .await
        .context("load store config")?;

    let mut identity = config.identity().await;
    if let Some(name) = args.name {
        identity.name = name;
    }
    if let Some(currency) = args.currency {
        identity.currency = currency;
    }
    if let Some(currency_sign) = args.currency_sign {
        identity.currency_sign = currency_sign;
    }
    if let Some(domain) = args.domain {
        identity.domain = domain;
    }
    let identity = match args.database {
        Some(database) => StoreIdentity {
            database,
            ..identity
        },
        None => identity.with_generated_database(Utc::now().date_naive()),
    };

    let updated = config.update(identity).await?;
    if let Some(name) =
        crate::provision::repository_collision(&Credentials::from_env(), &updated.identity).await
    {
        eprintln!(
            "warning: repository {name} already exists; provisioning will fail until the store is renamed"
        );
    }
    print_json(&*updated)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{json}");
    Ok(())
}
