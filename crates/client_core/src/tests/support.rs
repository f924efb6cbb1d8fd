use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use shared::{
    domain::{ConversationId, EventId, Participant, UserId, UserProfile},
    protocol::{ChatEvent, ClientCommand, ConversationSummary, EventPayload, ServerEvent},
};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};

use crate::{
    channel::{ChannelEventHandler, Inbound},
    client::{ChatClient, ClientDependencies},
    credential::TokenSource,
    credential_store::{CredentialStore, MemoryCredentialStore},
    error::AuthError,
    services::{AuthService, ConversationService, UserDirectory},
    transport::{ChannelTransport, TransportLink, TransportMessage},
};

pub fn mint_token(sub: &str, user_name: &str) -> String {
    encode(
        &Header::default(),
        &serde_json::json!({ "sub": sub, "userName": user_name }),
        &EncodingKey::from_secret(b"test-secret"),
    )
    .expect("token")
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("timestamp")
}

pub fn profile(id: &str, user_name: &str) -> UserProfile {
    UserProfile {
        id: UserId::new(id),
        user_name: user_name.to_string(),
    }
}

pub fn chat_event(id: &str, conversation_id: &str, sender: &str, seconds: i64) -> ChatEvent {
    ChatEvent {
        id: EventId::new(id),
        conversation_id: ConversationId::new(conversation_id),
        sender: profile(sender, sender),
        payload: EventPayload {
            content: format!("message {id}"),
        },
        created_at: at(seconds),
    }
}

pub fn summary(id: &str, participants: &[(&str, &str)]) -> ConversationSummary {
    ConversationSummary {
        id: ConversationId::new(id),
        participants: participants
            .iter()
            .map(|(id, name)| Participant {
                user: profile(id, name),
            })
            .collect(),
        recent_events: Vec::new(),
    }
}

pub fn new_event_frame(event: &ChatEvent) -> TransportMessage {
    TransportMessage::Event(ServerEvent::NewEvent {
        conversation_id: event.conversation_id.clone(),
        event: event.clone(),
    })
}

pub fn ids(events: &[ChatEvent]) -> Vec<&str> {
    events.iter().map(|event| event.id.as_str()).collect()
}

pub struct FakeLink {
    pub token: String,
    pub inbound: mpsc::Sender<TransportMessage>,
    pub outbound: Mutex<mpsc::Receiver<ClientCommand>>,
}

impl FakeLink {
    pub fn is_open(&self) -> bool {
        !self.inbound.is_closed()
    }

    pub async fn push(&self, message: TransportMessage) -> bool {
        self.inbound.send(message).await.is_ok()
    }

    pub async fn next_command(&self) -> ClientCommand {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.lock().await.recv())
            .await
            .expect("command within timeout")
            .expect("outbound open")
    }
}

#[derive(Default)]
pub struct FakeTransport {
    links: Mutex<Vec<Arc<FakeLink>>>,
    max_open: AtomicUsize,
    fail_next: AtomicBool,
    connect_gate: Mutex<Option<oneshot::Receiver<()>>>,
    pub connect_started: Notify,
}

impl FakeTransport {
    pub fn fail_next_connect(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Parks the next `connect` until the returned sender fires.
    /// `connect_started` is notified once it is parked.
    pub async fn gate_next_connect(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.connect_gate.lock().await = Some(rx);
        tx
    }

    pub async fn links(&self) -> Vec<Arc<FakeLink>> {
        self.links.lock().await.clone()
    }

    pub async fn link(&self, index: usize) -> Arc<FakeLink> {
        Arc::clone(&self.links.lock().await[index])
    }

    pub async fn last_link(&self) -> Arc<FakeLink> {
        Arc::clone(self.links.lock().await.last().expect("at least one link"))
    }

    pub async fn open_count(&self) -> usize {
        self.links
            .lock()
            .await
            .iter()
            .filter(|link| link.is_open())
            .count()
    }

    /// Links whose owner has released them. A link can only be released
    /// once, so this counts completed closes.
    pub async fn closed_count(&self) -> usize {
        self.links
            .lock()
            .await
            .iter()
            .filter(|link| !link.is_open())
            .count()
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelTransport for FakeTransport {
    async fn connect(&self, token: &str) -> Result<TransportLink> {
        let gate = self.connect_gate.lock().await.take();
        if let Some(gate) = gate {
            self.connect_started.notify_one();
            let _ = gate.await;
        }
        tokio::task::yield_now().await;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        let mut links = self.links.lock().await;
        let open = links.iter().filter(|link| link.is_open()).count() + 1;
        self.max_open.fetch_max(open, Ordering::SeqCst);

        let (link, outbound_rx, inbound_tx) = TransportLink::channel();
        links.push(Arc::new(FakeLink {
            token: token.to_string(),
            inbound: inbound_tx,
            outbound: Mutex::new(outbound_rx),
        }));
        Ok(link)
    }
}

type HistoryGate = oneshot::Receiver<Result<Vec<ChatEvent>, String>>;

#[derive(Default)]
pub struct FakeBackend {
    pub accounts: Mutex<HashMap<String, String>>,
    pub conversations: Mutex<Vec<ConversationSummary>>,
    pub histories: Mutex<HashMap<ConversationId, Vec<ChatEvent>>>,
    history_gates: Mutex<HashMap<ConversationId, HistoryGate>>,
    pub gate_reached: Notify,
    pub directory: Mutex<Vec<UserProfile>>,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub fail_lists: AtomicBool,
    pub fail_histories: AtomicBool,
}

impl FakeBackend {
    /// Holds the next history fetch for `conversation_id` until the returned
    /// sender resolves it.
    pub async fn gate_history(
        &self,
        conversation_id: &str,
    ) -> oneshot::Sender<Result<Vec<ChatEvent>, String>> {
        let (tx, rx) = oneshot::channel();
        self.history_gates
            .lock()
            .await
            .insert(ConversationId::new(conversation_id), rx);
        tx
    }

    pub async fn set_history(&self, conversation_id: &str, events: Vec<ChatEvent>) {
        self.histories
            .lock()
            .await
            .insert(ConversationId::new(conversation_id), events);
    }

    pub async fn set_conversations(&self, conversations: Vec<ConversationSummary>) {
        *self.conversations.lock().await = conversations;
    }
}

#[async_trait]
impl AuthService for FakeBackend {
    async fn register(&self, user_name: &str, _secret: &str) -> Result<String, AuthError> {
        let accounts = self.accounts.lock().await;
        if accounts.contains_key(user_name) {
            return Err(AuthError::Rejected("User name already taken".to_string()));
        }
        Ok(mint_token(&format!("u-{user_name}"), user_name))
    }

    async fn login(&self, user_name: &str, secret: &str) -> Result<String, AuthError> {
        let accounts = self.accounts.lock().await;
        match accounts.get(user_name) {
            Some(token) if secret == "secret" => Ok(token.clone()),
            _ => Err(AuthError::Rejected("Invalid credentials".to_string())),
        }
    }
}

#[async_trait]
impl ConversationService for FakeBackend {
    async fn list_conversations(&self, _identity: &UserId) -> Result<Vec<ConversationSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(anyhow!("list unavailable"));
        }
        Ok(self.conversations.lock().await.clone())
    }

    async fn create_conversation(&self, other: &UserId) -> Result<ConversationSummary> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let created = summary(
            &format!("chat-{other}"),
            &[("u-1", "alice"), (other.as_str(), other.as_str())],
        );
        self.conversations.lock().await.push(created.clone());
        Ok(created)
    }

    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<ChatEvent>> {
        let gate = self.history_gates.lock().await.remove(conversation_id);
        if let Some(gate) = gate {
            self.gate_reached.notify_one();
            return gate
                .await
                .map_err(|_| anyhow!("gate dropped"))?
                .map_err(|err| anyhow!(err));
        }
        if self.fail_histories.load(Ordering::SeqCst) {
            return Err(anyhow!("history unavailable"));
        }
        Ok(self
            .histories
            .lock()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl UserDirectory for FakeBackend {
    async fn search(&self, prefix: &str) -> Result<Vec<UserProfile>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .directory
            .lock()
            .await
            .iter()
            .filter(|user| user.user_name.starts_with(prefix))
            .cloned()
            .collect())
    }
}

pub struct Harness {
    pub client: Arc<ChatClient>,
    pub backend: Arc<FakeBackend>,
    pub transport: Arc<FakeTransport>,
    pub credentials: Arc<MemoryCredentialStore>,
}

pub fn harness_with(
    backend: Arc<FakeBackend>,
    transport: Arc<FakeTransport>,
    credentials: Arc<MemoryCredentialStore>,
) -> Harness {
    let client = Arc::new(ChatClient::new(ClientDependencies {
        credentials: credentials.clone() as Arc<dyn CredentialStore>,
        tokens: TokenSource::default(),
        transport: transport.clone(),
        auth: backend.clone(),
        conversations: backend.clone(),
        directory: backend.clone(),
    }));
    Harness {
        client,
        backend,
        transport,
        credentials,
    }
}

pub fn harness() -> Harness {
    harness_with(
        Arc::new(FakeBackend::default()),
        Arc::new(FakeTransport::default()),
        Arc::new(MemoryCredentialStore::default()),
    )
}

pub async fn wait_for_timeline(
    client: &ChatClient,
    predicate: impl Fn(&[ChatEvent]) -> bool,
) -> Vec<ChatEvent> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let events = client.timeline().await;
            if predicate(&events) {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timeline condition within timeout")
}

pub async fn wait_for_preview(client: &ChatClient, conversation_id: &str, event_id: &str) {
    let conversation_id = ConversationId::new(conversation_id);
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let preview = client
                .conversation(&conversation_id)
                .await
                .and_then(|summary| summary.preview().map(|event| event.id.clone()));
            if preview.as_ref().map(EventId::as_str) == Some(event_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("preview within timeout")
}

#[derive(Default)]
pub struct RecordingHandler {
    pub received: Mutex<Vec<Inbound>>,
}

impl RecordingHandler {
    pub async fn wait_for(&self, count: usize) -> Vec<Inbound> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let received = self.received.lock().await;
                    if received.len() >= count {
                        return received.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("signals within timeout")
    }
}

#[async_trait]
impl ChannelEventHandler for RecordingHandler {
    async fn on_event(&self, inbound: Inbound) {
        self.received.lock().await.push(inbound);
    }
}
