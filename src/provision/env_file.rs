use std::path::Path;

use anyhow::Context as _;

use crate::provision::vercel::EnvVariable;

/// Reads every `KEY=value` pair from a dotenv file, in file order. A key
/// that appears twice keeps its last value.
pub fn read_env_file(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    if !path.exists() {
        anyhow::bail!("environment file not found: {}", path.display());
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    for item in dotenvy::from_path_iter(path)
        .with_context(|| format!("open environment file: {}", path.display()))?
    {
        let (key, value) =
            item.with_context(|| format!("parse environment file: {}", path.display()))?;
        match pairs.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => pairs.push((key, value)),
        }
    }

    let keys = pairs.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>();
    tracing::info!(path = %path.display(), ?keys, "read environment variables");
    Ok(pairs)
}

pub fn encrypted_variables(pairs: Vec<(String, String)>) -> Vec<EnvVariable> {
    pairs
        .into_iter()
        .map(|(key, value)| EnvVariable::encrypted(key, value))
        .collect()
}
