use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use shared::{
    domain::{ConversationId, UserId},
    protocol::{ClientCommand, ServerEvent},
};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch, Mutex, RwLock,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    transport::{ChannelTransport, TransportMessage},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Connected,
    /// The server ended the connection.
    Disconnected,
    Failed(String),
    /// Closed locally; terminal.
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Event(ServerEvent),
    Status(ChannelStatus),
}

/// A signal stamped with the session generation of the channel it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub generation: u64,
    pub signal: ChannelSignal,
}

#[async_trait]
pub trait ChannelEventHandler: Send + Sync {
    async fn on_event(&self, inbound: Inbound);

    /// Called by the session while a credential transition is in progress:
    /// the previous channel is closed and `generation` is already current,
    /// but no channel for the new identity has been opened yet.
    async fn on_session_change(&self, _generation: u64, _identity: Option<UserId>) {}
}

/// Monotonic counter bumped on every credential change. A channel captures the
/// value it was opened under; deliveries from older generations are stale.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    pub(crate) fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

type Handlers = Arc<RwLock<Vec<Arc<dyn ChannelEventHandler>>>>;

/// One live connection bound to exactly one credential.
///
/// Handlers are acquired when the connection opens and released by
/// [`ChannelConnection::close`]; none outlives the connection.
pub struct ChannelConnection {
    generation: u64,
    outbound: Mutex<Option<mpsc::Sender<ClientCommand>>>,
    status: Arc<watch::Sender<ChannelStatus>>,
    handlers: Handlers,
    closed: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelConnection {
    pub async fn open(
        transport: &dyn ChannelTransport,
        token: &str,
        generation: u64,
        fence: Generation,
        handler: Arc<dyn ChannelEventHandler>,
    ) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Connecting);
        let connection = Self {
            generation,
            outbound: Mutex::new(None),
            status: Arc::new(status),
            handlers: Arc::new(RwLock::new(vec![handler])),
            closed: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        };

        let reader = ChannelReader {
            generation,
            fence,
            closed: Arc::clone(&connection.closed),
            status: Arc::clone(&connection.status),
            handlers: Arc::clone(&connection.handlers),
        };
        match transport.connect(token).await {
            Ok(link) => {
                *connection.outbound.lock().await = Some(link.outbound);
                reader.publish_status(ChannelStatus::Connected).await;
                *connection.reader.lock().await = Some(tokio::spawn(reader.run(link.inbound)));
                info!(generation, "channel: connected");
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(generation, error = %reason, "channel: connect failed");
                reader.publish_status(ChannelStatus::Failed(reason)).await;
            }
        }

        connection
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    /// Registers an additional handler. Ignored once the connection is closed.
    pub async fn on_event(&self, handler: Arc<dyn ChannelEventHandler>) {
        let mut handlers = self.handlers.write().await;
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        handlers.push(handler);
    }

    /// Queues a message without waiting for room on the link. The resulting
    /// event comes back through the inbound path, never as a reply to this
    /// call.
    pub async fn send(
        &self,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        let outbound = self.outbound.lock().await.clone();
        let Some(outbound) = outbound else {
            return Err(ClientError::Channel(format!(
                "channel is not open ({:?})",
                self.status()
            )));
        };
        outbound
            .try_send(ClientCommand::SendMessage {
                conversation_id,
                content: content.into(),
            })
            .map_err(|err| match err {
                TrySendError::Full(_) => ClientError::Channel("outbound queue is full".to_string()),
                TrySendError::Closed(_) => ClientError::Channel("connection closed".to_string()),
            })
    }

    /// Idempotent; safe on a connection that never managed to connect.
    pub async fn close(&self) {
        {
            let mut handlers = self.handlers.write().await;
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            handlers.clear();
        }
        self.outbound.lock().await.take();
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
            let _ = reader.await;
        }
        self.status.send_replace(ChannelStatus::Closed);
        info!(generation = self.generation, "channel: closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

struct ChannelReader {
    generation: u64,
    fence: Generation,
    closed: Arc<AtomicBool>,
    status: Arc<watch::Sender<ChannelStatus>>,
    handlers: Handlers,
}

impl ChannelReader {
    async fn run(self, mut inbound: mpsc::Receiver<TransportMessage>) {
        while let Some(message) = inbound.recv().await {
            if !self.is_live() {
                debug!(generation = self.generation, "channel: reader fenced off");
                return;
            }
            match message {
                TransportMessage::Event(event) => {
                    self.deliver(ChannelSignal::Event(event)).await;
                }
                TransportMessage::Dropped(reason) => {
                    warn!(generation = self.generation, %reason, "channel: connection dropped");
                    self.publish_status(ChannelStatus::Failed(reason)).await;
                    return;
                }
            }
        }
        if self.is_live() {
            info!(generation = self.generation, "channel: server closed connection");
            self.publish_status(ChannelStatus::Disconnected).await;
        }
    }

    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.fence.is_current(self.generation)
    }

    async fn publish_status(&self, status: ChannelStatus) {
        self.status.send_replace(status.clone());
        self.deliver(ChannelSignal::Status(status)).await;
    }

    async fn deliver(&self, signal: ChannelSignal) {
        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            handler
                .on_event(Inbound {
                    generation: self.generation,
                    signal: signal.clone(),
                })
                .await;
        }
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
