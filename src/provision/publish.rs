use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Serialize;
use tokio::process::Command;

use crate::provision::credentials::AccessToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushResult {
    pub branch: String,
    pub commit: String,
}

/// Replaces a working tree's history with one commit and force-pushes it.
#[async_trait]
pub trait WorkingTreePublisher: Send + Sync {
    /// `remote_url` must not carry credentials; `token` is handed to the
    /// transport only for the push.
    async fn publish(
        &self,
        tree: &Path,
        remote_url: &str,
        token: &AccessToken,
    ) -> anyhow::Result<PushResult>;
}

#[derive(Debug, Clone)]
pub struct GitCliPublisher {
    pub git_bin: PathBuf,
    pub branch: String,
    pub commit_message: String,
    pub author_name: String,
    pub author_email: String,
}

impl Default for GitCliPublisher {
    fn default() -> Self {
        Self {
            git_bin: PathBuf::from("git"),
            branch: "main".to_owned(),
            commit_message: "Initial commit".to_owned(),
            author_name: "shopforge".to_owned(),
            author_email: "shopforge@users.noreply.github.com".to_owned(),
        }
    }
}

impl GitCliPublisher {
    async fn git(&self, tree: &Path, args: &[&str]) -> anyhow::Result<String> {
        self.git_with_env(tree, args, &[]).await
    }

    async fn git_with_env(
        &self,
        tree: &Path,
        args: &[&str],
        env: &[(&str, String)],
    ) -> anyhow::Result<String> {
        let mut cmd = Command::new(&self.git_bin);
        cmd.current_dir(tree)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            cmd.env(key, value);
        }

        tracing::debug!(?args, tree = %tree.display(), "git");
        let output = cmd
            .output()
            .await
            .with_context(|| format!("spawn git: {}", self.git_bin.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed ({}): {}", args.join(" "), output.status, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    async fn ensure_branch(&self, tree: &Path) -> anyhow::Result<()> {
        let branch_ref = format!("refs/heads/{}", self.branch);
        let exists = self
            .git(tree, &["rev-parse", "--verify", "--quiet", &branch_ref])
            .await
            .is_ok();
        if exists {
            self.git(tree, &["checkout", &self.branch]).await?;
        } else {
            // Fresh repository: point the unborn HEAD at the branch.
            self.git(tree, &["symbolic-ref", "HEAD", &branch_ref]).await?;
        }
        Ok(())
    }
}

/// Header-based auth keeps the token out of argv, the remote URL and
/// `.git/config`.
fn auth_env(token: &AccessToken) -> Vec<(&'static str, String)> {
    let basic = base64::engine::general_purpose::STANDARD
        .encode(format!("x-access-token:{}", token.secret()));
    vec![
        ("GIT_CONFIG_COUNT", "1".to_owned()),
        ("GIT_CONFIG_KEY_0", "http.extraHeader".to_owned()),
        ("GIT_CONFIG_VALUE_0", format!("Authorization: Basic {basic}")),
    ]
}

async fn remove_git_dir(tree: &Path) -> anyhow::Result<()> {
    let git_dir = tree.join(".git");
    let metadata = match tokio::fs::symlink_metadata(&git_dir).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).context("inspect .git"),
    };
    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(&git_dir).await
    } else {
        tokio::fs::remove_file(&git_dir).await
    };
    removed.with_context(|| format!("remove {}", git_dir.display()))?;
    tracing::info!(tree = %tree.display(), "removed existing git history");
    Ok(())
}

#[async_trait]
impl WorkingTreePublisher for GitCliPublisher {
    async fn publish(
        &self,
        tree: &Path,
        remote_url: &str,
        token: &AccessToken,
    ) -> anyhow::Result<PushResult> {
        if !tree.is_dir() {
            anyhow::bail!("working tree is not a directory: {}", tree.display());
        }

        remove_git_dir(tree).await?;
        self.git(tree, &["init", "--quiet"]).await?;
        self.ensure_branch(tree).await?;
        self.git(tree, &["add", "--all"]).await?;

        let name_cfg = format!("user.name={}", self.author_name);
        let email_cfg = format!("user.email={}", self.author_email);
        self.git(
            tree,
            &[
                "-c",
                &name_cfg,
                "-c",
                &email_cfg,
                "commit",
                "--quiet",
                "--allow-empty",
                "-m",
                &self.commit_message,
            ],
        )
        .await?;
        let commit = self.git(tree, &["rev-parse", "HEAD"]).await?;

        self.git(tree, &["remote", "add", "origin", remote_url]).await?;
        self.git_with_env(
            tree,
            &["push", "--force", "-u", "origin", &self.branch],
            &auth_env(token),
        )
        .await
        .context("push to remote")?;

        tracing::info!(branch = %self.branch, %commit, remote = %remote_url, "working tree pushed");
        Ok(PushResult {
            branch: self.branch.clone(),
            commit,
        })
    }
}
