use std::sync::Arc;

use shared::domain::{ConversationId, UserId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelConnection, ChannelEventHandler, ChannelStatus, Generation},
    credential::{Credential, TokenSource},
    credential_store::CredentialStore,
    error::ClientError,
    transport::ChannelTransport,
};

#[derive(Default)]
struct SessionState {
    credential: Option<Credential>,
    channel: Option<ChannelConnection>,
}

/// Owns the current credential and the channel opened for it.
///
/// All transitions run under one lock, so the credential and the channel are
/// always observed as a matching pair and a second transition waits for the
/// first one's teardown before opening anything.
pub struct SessionStore {
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn ChannelTransport>,
    router: Arc<dyn ChannelEventHandler>,
    generation: Generation,
    tokens: TokenSource,
    state: Mutex<SessionState>,
}

impl SessionStore {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn ChannelTransport>,
        router: Arc<dyn ChannelEventHandler>,
        generation: Generation,
        tokens: TokenSource,
    ) -> Self {
        Self {
            credentials,
            transport,
            router,
            generation,
            tokens,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    /// Installs the persisted credential, if there is a usable one.
    pub async fn restore(&self) -> Option<UserId> {
        let stored = match self.credentials.load().await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "session: failed to read stored credential");
                None
            }
        };
        let token = stored?;

        match self.set_credential(Some(&token)).await {
            Ok(identity) => identity,
            Err(err) => {
                debug!(error = %err, "session: discarding unusable stored credential");
                if let Err(err) = self.credentials.clear().await {
                    warn!(error = %format!("{err:#}"), "session: failed to clear stored credential");
                }
                None
            }
        }
    }

    /// Replaces the session credential. `None` signs out.
    ///
    /// A token that does not decode leaves the session exactly as it was.
    pub async fn set_credential(&self, token: Option<&str>) -> Result<Option<UserId>, ClientError> {
        let credential = token.map(Credential::from_token).transpose()?;

        let mut state = self.state.lock().await;
        if let Some(previous) = state.channel.take() {
            previous.close().await;
        }
        let generation = self.generation.advance();
        self.tokens
            .replace(credential.as_ref().map(|credential| credential.token().to_string()))
            .await;
        self.router
            .on_session_change(generation, credential.as_ref().map(Credential::identity))
            .await;

        let Some(credential) = credential else {
            state.credential = None;
            if let Err(err) = self.credentials.clear().await {
                warn!(error = %format!("{err:#}"), "session: failed to remove stored credential");
            }
            info!(generation, "session: signed out");
            return Ok(None);
        };

        if let Err(err) = self.credentials.save(credential.token()).await {
            warn!(error = %format!("{err:#}"), "session: failed to persist credential");
        }
        let identity = credential.identity();
        let channel = ChannelConnection::open(
            self.transport.as_ref(),
            credential.token(),
            generation,
            self.generation.clone(),
            Arc::clone(&self.router),
        )
        .await;
        *state = SessionState {
            credential: Some(credential),
            channel: Some(channel),
        };
        info!(generation, identity = %identity, "session: credential installed");
        Ok(Some(identity))
    }

    pub async fn logout(&self) {
        if let Err(err) = self.set_credential(None).await {
            warn!(error = %err, "session: sign-out failed");
        }
    }

    pub async fn identity(&self) -> Option<UserId> {
        self.state
            .lock()
            .await
            .credential
            .as_ref()
            .map(Credential::identity)
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.state.lock().await.credential.clone()
    }

    pub async fn channel_status(&self) -> Option<ChannelStatus> {
        self.state
            .lock()
            .await
            .channel
            .as_ref()
            .map(ChannelConnection::status)
    }

    pub async fn send(
        &self,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        let state = self.state.lock().await;
        let Some(channel) = state.channel.as_ref() else {
            return Err(ClientError::NotAuthenticated);
        };
        channel.send(conversation_id, content).await
    }

    pub async fn on_event(&self, handler: Arc<dyn ChannelEventHandler>) -> Result<(), ClientError> {
        let state = self.state.lock().await;
        let Some(channel) = state.channel.as_ref() else {
            return Err(ClientError::NotAuthenticated);
        };
        channel.on_event(handler).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
