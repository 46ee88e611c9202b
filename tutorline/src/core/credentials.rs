//! Credential provider capability.
//!
//! The session asks for the realtime API key right before opening the
//! connection. A provider either returns a non-empty secret or fails with
//! `NotConfigured`, in which case no transport is opened.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use zeroize::Zeroize;

use crate::errors::{CallError, CallResult};

/// A bearer secret. Zeroized on drop and redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
}

impl Credential {
    /// Wrap a secret, rejecting empty values and the literal `undefined`
    /// some backends return for unset variables.
    pub fn new(secret: impl Into<String>) -> CallResult<Self> {
        let mut secret = secret.into();
        let trimmed = secret.trim();
        if trimmed.is_empty() || trimmed == "undefined" {
            secret.zeroize();
            return Err(CallError::NotConfigured(
                "credential is empty".to_string(),
            ));
        }
        Ok(Self { secret })
    }

    pub fn expose(&self) -> &str {
        &self.secret
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.secret)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("len", &self.secret.len())
            .finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Zero-argument capability returning the realtime API key.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> CallResult<Credential>;
}

/// Reads the key from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    var: String,
}

impl EnvCredentialProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn fetch(&self) -> CallResult<Credential> {
        let value = std::env::var(&self.var)
            .map_err(|_| CallError::NotConfigured(format!("{} is not set", self.var)))?;
        Credential::new(value)
            .map_err(|_| CallError::NotConfigured(format!("{} is empty", self.var)))
    }
}

/// Fixed key, for embedding hosts and tests.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: Option<Credential>,
}

impl StaticCredentialProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(secret).ok(),
        }
    }

    /// A provider with nothing configured.
    pub fn unset() -> Self {
        Self { credential: None }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn fetch(&self) -> CallResult<Credential> {
        self.credential
            .clone()
            .ok_or_else(|| CallError::NotConfigured("no static credential".to_string()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyResponse {
    #[serde(default)]
    api_key: Option<String>,
}

/// Fetches the key from a backend route returning `{"apiKey": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpCredentialProvider {
    url: String,
    client: reqwest::Client,
}

impl HttpCredentialProvider {
    pub fn new(url: impl Into<String>) -> CallResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                CallError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self) -> CallResult<Credential> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CallError::ConnectionFailed(format!("credential request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(CallError::NotConfigured(format!(
                "credential endpoint returned {status}"
            )));
        }

        let body: KeyResponse = response
            .json()
            .await
            .map_err(|e| CallError::ParseError(format!("credential response: {e}")))?;

        match body.api_key {
            Some(key) => Credential::new(key),
            None => Err(CallError::NotConfigured(
                "credential endpoint returned no key".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_rejects_empty() {
        assert!(matches!(
            Credential::new(""),
            Err(CallError::NotConfigured(_))
        ));
        assert!(Credential::new("   ").is_err());
        assert!(Credential::new("undefined").is_err());
        assert_eq!(Credential::new("sk-1").unwrap().bearer(), "Bearer sk-1");
    }

    #[test]
    fn test_debug_is_redacted() {
        let credential = Credential::new("sk-secret").unwrap();
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("sk-secret"));
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticCredentialProvider::new("sk-test");
        assert_eq!(provider.fetch().await.unwrap().expose(), "sk-test");

        let unset = StaticCredentialProvider::unset();
        assert!(matches!(
            unset.fetch().await,
            Err(CallError::NotConfigured(_))
        ));

        let empty = StaticCredentialProvider::new("");
        assert!(empty.fetch().await.is_err());
    }
}
