use crate::utils::error::{Result, TransferError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Access tokens from gcloud are valid for an hour; refresh well before that.
const TOKEN_LIFETIME: Duration = Duration::from_secs(45 * 60);

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A pre-issued bearer token, e.g. from `GCP_ACCESS_TOKEN`.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Mints tokens for a service-account key file through the gcloud CLI.
pub struct GcloudTokenProvider {
    credential_path: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl GcloudTokenProvider {
    pub fn new(credential_path: impl Into<String>) -> Self {
        Self {
            credential_path: credential_path.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<String> {
        tracing::debug!("Requesting access token for {}", self.credential_path);

        let output = Command::new("gcloud")
            .args(["auth", "application-default", "print-access-token"])
            .env("GOOGLE_APPLICATION_CREDENTIALS", &self.credential_path)
            .output()
            .await
            .map_err(|e| TransferError::AuthError {
                message: format!("could not run gcloud: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransferError::AuthError {
                message: format!("gcloud refused credential: {}", stderr.trim()),
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(TransferError::AuthError {
                message: "gcloud returned an empty access token".to_string(),
            });
        }
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for GcloudTokenProvider {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some((token, issued)) = cached.as_ref() {
            if issued.elapsed() < TOKEN_LIFETIME {
                return Ok(token.clone());
            }
        }

        let token = self.fetch().await?;
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }
}
