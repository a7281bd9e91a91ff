//! Ambient AWS credential resolution.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

use crate::error::{Error, Result};

const DEFAULT_PROFILE: &str = "default";

/// A resolved set of AWS credentials.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: Secret<String>,
    pub session_token: Option<Secret<String>>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Secret::new(secret_access_key.into()),
            session_token: session_token.map(Secret::new),
        }
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Source of credentials, consulted once per signed request.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self) -> Result<AwsCredentials>;
}

pub type SharedCredentialsProvider = Arc<dyn CredentialsProvider>;

/// Fixed credentials, mostly useful for tests and local endpoints.
pub struct StaticCredentialsProvider(AwsCredentials);

impl StaticCredentialsProvider {
    pub fn new(credentials: AwsCredentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn credentials(&self) -> Result<AwsCredentials> {
        Ok(self.0.clone())
    }
}

/// Resolves credentials from `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`/`AWS_SESSION_TOKEN`,
/// falling back to a profile in the shared credentials file.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialsProvider {
    profile: Option<String>,
    credentials_file: Option<PathBuf>,
}

impl EnvCredentialsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    #[must_use]
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// Resolve against an arbitrary variable lookup instead of the process environment.
    pub async fn resolve_with<F>(&self, var: F) -> Result<AwsCredentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let (Some(key_id), Some(secret)) =
            (var("AWS_ACCESS_KEY_ID"), var("AWS_SECRET_ACCESS_KEY"))
            && !key_id.is_empty()
            && !secret.is_empty()
        {
            debug!("using AWS credentials from environment");
            let token = var("AWS_SESSION_TOKEN").filter(|t| !t.is_empty());
            return Ok(AwsCredentials::new(key_id, secret, token));
        }

        let profile = self
            .profile
            .clone()
            .or_else(|| var("AWS_PROFILE"))
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        let path = self
            .credentials_file
            .clone()
            .or_else(|| var("AWS_SHARED_CREDENTIALS_FILE").map(PathBuf::from))
            .or_else(default_credentials_file);

        let Some(path) = path else {
            return Err(Error::MissingCredentials {
                checked: "no home directory".into(),
            });
        };

        match read_profile(&path, &profile).await? {
            Some(creds) => {
                debug!(profile = %profile, path = %path.display(), "using AWS credentials from shared file");
                Ok(creds)
            },
            None => Err(Error::MissingCredentials {
                checked: format!("profile '{profile}' in {}", path.display()),
            }),
        }
    }
}

#[async_trait]
impl CredentialsProvider for EnvCredentialsProvider {
    async fn credentials(&self) -> Result<AwsCredentials> {
        self.resolve_with(|name| std::env::var(name).ok()).await
    }
}

fn default_credentials_file() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".aws").join("credentials"))
}

async fn read_profile(path: &Path, profile: &str) -> Result<Option<AwsCredentials>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(parse_profile(&raw, profile))
}

/// Extract one profile from the INI-style shared credentials file.
fn parse_profile(raw: &str, profile: &str) -> Option<AwsCredentials> {
    let mut in_section = false;
    let mut key_id = None;
    let mut secret = None;
    let mut token = None;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let section = section.trim();
            in_section = section == profile || section == format!("profile {profile}");
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "aws_access_key_id" => key_id = Some(value),
            "aws_secret_access_key" => secret = Some(value),
            "aws_session_token" => token = Some(value),
            _ => {},
        }
    }

    Some(AwsCredentials::new(key_id?, secret?, token))
}

impl AwsCredentials {
    pub(crate) fn secret(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    pub(crate) fn token(&self) -> Option<&str> {
        self.session_token.as_ref().map(|t| t.expose_secret().as_str())
    }
}
