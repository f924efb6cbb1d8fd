use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{ConversationId, UserId, UserProfile},
    protocol::{ChatEvent, ConversationSummary, ServerEvent},
};
use storage::Storage;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelEventHandler, ChannelSignal, ChannelStatus, Generation, Inbound},
    config::ClientSettings,
    credential::TokenSource,
    credential_store::CredentialStore,
    error::ClientError,
    http::HttpBackend,
    index::ConversationIndex,
    services::{is_searchable, AuthService, ConversationService, UserDirectory},
    session::SessionStore,
    timeline::{ConversationTimeline, HistoryState, SelectionTicket},
    transport::{ChannelTransport, WebSocketTransport},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SessionChanged(Option<UserId>),
    ChannelStatusChanged(ChannelStatus),
    ConversationsUpdated,
    TimelineUpdated { conversation_id: ConversationId },
    Error(String),
}

pub struct ClientDependencies {
    pub credentials: Arc<dyn CredentialStore>,
    /// Must be the source the HTTP collaborators authorize with.
    pub tokens: TokenSource,
    pub transport: Arc<dyn ChannelTransport>,
    pub auth: Arc<dyn AuthService>,
    pub conversations: Arc<dyn ConversationService>,
    pub directory: Arc<dyn UserDirectory>,
}

#[derive(Default)]
struct Views {
    index: ConversationIndex,
    timeline: ConversationTimeline,
}

/// Routes every inbound signal to the index and the timeline in arrival
/// order, after checking it belongs to the live session.
struct EventRouter {
    views: Arc<Mutex<Views>>,
    generation: Generation,
    events: broadcast::Sender<ClientEvent>,
}

#[async_trait]
impl ChannelEventHandler for EventRouter {
    async fn on_event(&self, inbound: Inbound) {
        let Inbound { generation, signal } = inbound;
        match signal {
            ChannelSignal::Event(ServerEvent::NewEvent {
                conversation_id,
                event,
            }) => {
                if event.conversation_id != conversation_id {
                    warn!(
                        %conversation_id,
                        event_conversation_id = %event.conversation_id,
                        "router: frame and event disagree on conversation; dropped"
                    );
                    return;
                }
                let (indexed, appended) = {
                    let mut views = self.views.lock().await;
                    if !self.generation.is_current(generation) {
                        debug!(generation, "router: stale event dropped");
                        return;
                    }
                    let indexed = views.index.apply_event(&event);
                    let appended = views.timeline.apply_pushed_event(event);
                    (indexed, appended)
                };
                if indexed {
                    let _ = self.events.send(ClientEvent::ConversationsUpdated);
                }
                if appended {
                    let _ = self
                        .events
                        .send(ClientEvent::TimelineUpdated { conversation_id });
                }
            }
            ChannelSignal::Event(ServerEvent::Unknown) => {
                debug!(generation, "router: ignoring unknown event type");
            }
            ChannelSignal::Status(status) => {
                if self.generation.is_current(generation) {
                    let _ = self.events.send(ClientEvent::ChannelStatusChanged(status));
                }
            }
        }
    }

    async fn on_session_change(&self, generation: u64, identity: Option<UserId>) {
        let mut views = self.views.lock().await;
        views.index.clear();
        views.timeline.clear();
        debug!(generation, "router: views reset for new session");
        let _ = self.events.send(ClientEvent::SessionChanged(identity));
    }
}

pub struct ChatClient {
    session: SessionStore,
    auth: Arc<dyn AuthService>,
    conversations: Arc<dyn ConversationService>,
    directory: Arc<dyn UserDirectory>,
    views: Arc<Mutex<Views>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(deps: ClientDependencies) -> Self {
        let (events, _) = broadcast::channel(1024);
        let views = Arc::new(Mutex::new(Views::default()));
        let generation = Generation::default();
        let router = Arc::new(EventRouter {
            views: Arc::clone(&views),
            generation: generation.clone(),
            events: events.clone(),
        });
        Self {
            session: SessionStore::new(
                deps.credentials,
                deps.transport,
                router,
                generation,
                deps.tokens,
            ),
            auth: deps.auth,
            conversations: deps.conversations,
            directory: deps.directory,
            views,
            events,
        }
    }

    /// Wires the HTTP backend, the websocket channel and sqlite persistence.
    pub async fn connect(settings: &ClientSettings) -> Result<Self> {
        let storage = Storage::new(&settings.credential_db_url)
            .await
            .context("failed to open credential storage")?;
        let tokens = TokenSource::default();
        let backend = Arc::new(HttpBackend::new(settings.server_url.clone(), tokens.clone()));
        let transport = Arc::new(WebSocketTransport::new(settings.websocket_url()?));
        Ok(Self::new(ClientDependencies {
            credentials: Arc::new(storage),
            tokens,
            transport,
            auth: backend.clone(),
            conversations: backend.clone(),
            directory: backend,
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Picks up a persisted credential at startup. Returns the restored
    /// identity, or `None` when the user has to sign in.
    pub async fn restore(&self) -> Option<UserId> {
        let identity = self.session.restore().await?;
        self.load_conversations().await;
        Some(identity)
    }

    pub async fn login(&self, user_name: &str, secret: &str) -> Result<UserId, ClientError> {
        let token = self.auth.login(user_name, secret).await?;
        self.install_token(&token).await
    }

    pub async fn register(&self, user_name: &str, secret: &str) -> Result<UserId, ClientError> {
        let token = self.auth.register(user_name, secret).await?;
        self.install_token(&token).await
    }

    pub async fn install_token(&self, token: &str) -> Result<UserId, ClientError> {
        let identity = self
            .session
            .set_credential(Some(token))
            .await?
            .ok_or(ClientError::NotAuthenticated)?;
        self.load_conversations().await;
        Ok(identity)
    }

    /// Signs out. The views are reset by the session transition itself.
    pub async fn logout(&self) {
        self.session.logout().await;
    }

    async fn load_conversations(&self) {
        if let Err(err) = self.refresh_conversations().await {
            warn!(error = %err, "client: initial conversation refresh failed");
        }
    }

    pub async fn identity(&self) -> Option<UserId> {
        self.session.identity().await
    }

    pub async fn channel_status(&self) -> Option<ChannelStatus> {
        self.session.channel_status().await
    }

    /// Replaces the conversation index with the server's list.
    pub async fn refresh_conversations(&self) -> Result<(), ClientError> {
        let identity = self
            .session
            .identity()
            .await
            .ok_or(ClientError::NotAuthenticated)?;
        let generation = self.session.generation().current();

        let result = self.conversations.list_conversations(&identity).await;

        let mut views = self.views.lock().await;
        if !self.session.generation().is_current(generation) {
            debug!(%identity, "client: conversation list outlived its session; discarded");
            return Ok(());
        }
        match result {
            Ok(snapshot) => {
                views.index.replace(snapshot);
                drop(views);
                let _ = self.events.send(ClientEvent::ConversationsUpdated);
                Ok(())
            }
            Err(err) => {
                let err = ClientError::fetch(err);
                views.index.record_failure(err.to_string());
                drop(views);
                let _ = self.events.send(ClientEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Selects a conversation: clears the timeline immediately, then merges
    /// the history fetch with anything pushed in the meantime.
    pub async fn select_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), ClientError> {
        if self.session.identity().await.is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        let generation = self.session.generation().current();
        let ticket = self
            .views
            .lock()
            .await
            .timeline
            .select(conversation_id.clone());
        let _ = self.events.send(ClientEvent::TimelineUpdated {
            conversation_id: conversation_id.clone(),
        });
        info!(%conversation_id, "client: conversation selected");

        let result = self.conversations.fetch_history(conversation_id).await;
        self.land_history(generation, &ticket, result).await
    }

    /// Fallback for a degraded channel: refreshes the index and re-fetches
    /// the selected history, merged under the same rules as a selection.
    pub async fn resync(&self) -> Result<(), ClientError> {
        self.refresh_conversations().await?;
        let generation = self.session.generation().current();
        let Some(ticket) = self.views.lock().await.timeline.refetch() else {
            return Ok(());
        };
        let result = self
            .conversations
            .fetch_history(ticket.conversation_id())
            .await;
        self.land_history(generation, &ticket, result).await
    }

    async fn land_history(
        &self,
        generation: u64,
        ticket: &SelectionTicket,
        result: anyhow::Result<Vec<ChatEvent>>,
    ) -> Result<(), ClientError> {
        let conversation_id = ticket.conversation_id().clone();
        let mut views = self.views.lock().await;
        if !self.session.generation().is_current(generation) {
            debug!(%conversation_id, "client: history outlived its session; discarded");
            return Ok(());
        }
        match result {
            Ok(events) => {
                if views.timeline.apply_history(ticket, events) {
                    drop(views);
                    let _ = self
                        .events
                        .send(ClientEvent::TimelineUpdated { conversation_id });
                }
                Ok(())
            }
            Err(err) => {
                let err = ClientError::fetch(err);
                if views.timeline.record_failure(ticket, err.to_string()) {
                    drop(views);
                    let _ = self.events.send(ClientEvent::Error(err.to_string()));
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    /// Sends a message over the channel. It shows up in the timeline only
    /// once the server pushes it back.
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<(), ClientError> {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        self.session.send(conversation_id.clone(), content).await
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserProfile>, ClientError> {
        if !is_searchable(query) {
            return Ok(Vec::new());
        }
        self.directory
            .search(query)
            .await
            .map_err(ClientError::fetch)
    }

    /// Creates a conversation with `other` and refreshes the index so the new
    /// entry (and any event that raced ahead of it) becomes visible.
    pub async fn start_conversation(
        &self,
        other: &UserId,
    ) -> Result<ConversationSummary, ClientError> {
        if self.session.identity().await.is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        let summary = self
            .conversations
            .create_conversation(other)
            .await
            .map_err(ClientError::fetch)?;
        if let Err(err) = self.refresh_conversations().await {
            warn!(error = %err, "client: refresh after conversation creation failed");
        }
        Ok(summary)
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.views.lock().await.index.iter().cloned().collect()
    }

    pub async fn conversation(&self, conversation_id: &ConversationId) -> Option<ConversationSummary> {
        self.views.lock().await.index.get(conversation_id).cloned()
    }

    pub async fn conversations_error(&self) -> Option<String> {
        self.views
            .lock()
            .await
            .index
            .last_error()
            .map(str::to_string)
    }

    pub async fn selected_conversation(&self) -> Option<ConversationId> {
        self.views.lock().await.timeline.selected().cloned()
    }

    pub async fn timeline(&self) -> Vec<ChatEvent> {
        self.views.lock().await.timeline.events().to_vec()
    }

    pub async fn history_state(&self) -> HistoryState {
        self.views.lock().await.timeline.history_state().clone()
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
