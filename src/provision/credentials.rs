use serde::Serialize;

use crate::provision::error::ProvisionError;

/// Bearer token for one provider. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// `None` for blank input.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_owned()))
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Tokens for the connected account, obtained out of band.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub source_control: Option<AccessToken>,
    pub hosting: Option<AccessToken>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub github: bool,
    pub vercel: bool,
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().and_then(AccessToken::new);
        Self {
            source_control: read("SHOPFORGE_GITHUB_TOKEN"),
            hosting: read("SHOPFORGE_VERCEL_TOKEN"),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            github: self.source_control.is_some(),
            vercel: self.hosting.is_some(),
        }
    }

    pub fn require_source_control(&self) -> Result<&AccessToken, ProvisionError> {
        self.source_control
            .as_ref()
            .ok_or(ProvisionError::CredentialMissing { provider: "GitHub" })
    }

    pub fn require_hosting(&self) -> Result<&AccessToken, ProvisionError> {
        self.hosting
            .as_ref()
            .ok_or(ProvisionError::CredentialMissing { provider: "Vercel" })
    }
}
