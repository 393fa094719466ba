use crate::config::AuthConfig;
use std::sync::Arc;

/// Source of the bearer token used for every workspace call.
/// `None` means "not authenticated".
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Token fixed at startup.
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl CredentialProvider for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        non_blank(self.token.clone())
    }
}

/// Re-reads an environment variable on every call so a rotated token is picked up.
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredential {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().and_then(non_blank)
    }
}

fn non_blank(token: String) -> Option<String> {
    if token.trim().is_empty() { None } else { Some(token) }
}

/// Picks the configured token when present, otherwise the env var named by `token_env`.
pub fn from_config(config: &AuthConfig) -> Arc<dyn CredentialProvider> {
    match config.token.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(token) => Arc::new(StaticCredential::new(token)),
        None => Arc::new(EnvCredential::new(config.token_env.clone())),
    }
}
