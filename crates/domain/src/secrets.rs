//! Credential store interface. The vault implementation is external; the
//! core only reads named secrets (provider API keys, channel tokens).

use crate::error::Result;

#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>>;
    async fn set(&self, name: &str, value: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
}

/// Secret store backed by process environment variables. Read-only; used as
/// the default when no vault is wired in.
pub struct EnvSecretStore;

#[async_trait::async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    async fn set(&self, name: &str, _value: &str) -> Result<()> {
        Err(crate::error::Error::Config(format!(
            "environment secret store is read-only (attempted to set '{name}')"
        )))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
