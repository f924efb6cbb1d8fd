use anyhow::Result;
use async_trait::async_trait;
use storage::Storage;
use tokio::sync::Mutex;

/// Well-known key the bearer token is persisted under.
pub const AUTH_TOKEN_KEY: &str = "authToken";

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, token: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Process-local store; nothing survives a restart of the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.token.lock().await.clone())
    }

    async fn save(&self, token: &str) -> Result<()> {
        *self.token.lock().await = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.token.lock().await.take();
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for Storage {
    async fn load(&self) -> Result<Option<String>> {
        self.get_value(AUTH_TOKEN_KEY).await
    }

    async fn save(&self, token: &str) -> Result<()> {
        self.put_value(AUTH_TOKEN_KEY, token).await
    }

    async fn clear(&self) -> Result<()> {
        self.delete_value(AUTH_TOKEN_KEY).await.map(|_| ())
    }
}
