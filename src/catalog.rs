use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use crate::formats::ProductRecord;
use crate::json_store::{read_json, write_json_tmp};

/// Durable destination for harvested products.
#[async_trait]
pub trait CatalogSink: Send + Sync {
    /// Persists the whole batch or nothing. Every record must carry an id.
    async fn save_many(&self, records: &[ProductRecord]) -> anyhow::Result<()>;
    async fn find(&self, id: Uuid) -> anyhow::Result<Option<ProductRecord>>;
    async fn list(&self) -> anyhow::Result<Vec<ProductRecord>>;
}

/// One JSON document per product under `<base_dir>/catalog/products`.
#[derive(Debug, Clone)]
pub struct LocalFsCatalogStore {
    base_dir: PathBuf,
}

impl LocalFsCatalogStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn products_dir(&self) -> PathBuf {
        self.base_dir.join("catalog").join("products")
    }

    fn product_path(&self, id: Uuid) -> PathBuf {
        self.products_dir().join(format!("{id}.json"))
    }
}

#[async_trait]
impl CatalogSink for LocalFsCatalogStore {
    async fn save_many(&self, records: &[ProductRecord]) -> anyhow::Result<()> {
        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let staged_one = match record.id {
                Some(id) => {
                    let path = self.product_path(id);
                    write_json_tmp(&path, record)
                        .await
                        .map(|tmp| (tmp, path))
                        .with_context(|| format!("stage product {id}"))
                }
                None => Err(anyhow::anyhow!(
                    "product has no id: {}",
                    record.external_id
                )),
            };
            match staged_one {
                Ok(pair) => staged.push(pair),
                Err(err) => {
                    discard_staged(&staged).await;
                    return Err(err);
                }
            }
        }

        let mut committed = Vec::with_capacity(staged.len());
        for (idx, (tmp, path)) in staged.iter().enumerate() {
            match commit_one(tmp, path).await {
                Ok(backup) => committed.push(Committed {
                    path: path.clone(),
                    backup,
                }),
                Err(err) => {
                    roll_back(&committed).await;
                    discard_staged(&staged[idx..]).await;
                    return Err(err);
                }
            }
        }

        for backup in committed.iter().filter_map(|c| c.backup.as_deref()) {
            if let Err(err) = remove_if_exists(backup).await {
                tracing::warn!(path = %backup.display(), ?err, "failed to remove replaced product");
            }
        }
        tracing::info!(count = records.len(), dir = %self.products_dir().display(), "catalog batch saved");
        Ok(())
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<ProductRecord>> {
        let path = self.product_path(id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn list(&self) -> anyhow::Result<Vec<ProductRecord>> {
        let dir = self.products_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read catalog dir: {}", dir.display()));
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = read_json::<ProductRecord>(&path).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

/// A product document moved into place, with the document it replaced.
struct Committed {
    path: PathBuf,
    backup: Option<PathBuf>,
}

/// Moves a staged document onto `path`. An existing document is first set
/// aside so the commit can be undone.
async fn commit_one(tmp: &Path, path: &Path) -> anyhow::Result<Option<PathBuf>> {
    let existing = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata.is_file(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => {
            return Err(err).with_context(|| format!("inspect product: {}", path.display()));
        }
    };

    let backup = if existing {
        let backup = path.with_extension(format!("bak.{}", Uuid::new_v4().simple()));
        fs::rename(path, &backup)
            .await
            .with_context(|| format!("set aside product: {}", path.display()))?;
        Some(backup)
    } else {
        None
    };

    if let Err(err) = fs::rename(tmp, path).await {
        if let Some(backup) = &backup
            && let Err(restore_err) = fs::rename(backup, path).await
        {
            tracing::error!(path = %path.display(), ?restore_err, "failed to restore product");
        }
        return Err(err).with_context(|| format!("commit product: {}", path.display()));
    }
    Ok(backup)
}

/// Undoes committed documents, newest first.
async fn roll_back(committed: &[Committed]) {
    for entry in committed.iter().rev() {
        let restored = match &entry.backup {
            Some(backup) => fs::rename(backup, &entry.path).await,
            None => remove_if_exists(&entry.path).await,
        };
        if let Err(err) = restored {
            tracing::error!(path = %entry.path.display(), ?err, "failed to roll back product");
        }
    }
    if !committed.is_empty() {
        tracing::warn!(count = committed.len(), "catalog batch rolled back");
    }
}

async fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        if let Err(err) = remove_if_exists(tmp).await {
            tracing::warn!(path = %tmp.display(), ?err, "failed to discard staged product");
        }
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
