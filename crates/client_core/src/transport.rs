use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientCommand, ServerEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
};
use tracing::{debug, warn};

pub(crate) const LINK_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    Event(ServerEvent),
    /// The connection broke; nothing further will arrive on this link.
    Dropped(String),
}

/// Both directions of one live connection. Dropping `outbound` asks the
/// transport to close; `inbound` ends once the connection is gone.
pub struct TransportLink {
    pub outbound: mpsc::Sender<ClientCommand>,
    pub inbound: mpsc::Receiver<TransportMessage>,
}

impl TransportLink {
    pub fn channel() -> (
        TransportLink,
        mpsc::Receiver<ClientCommand>,
        mpsc::Sender<TransportMessage>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(LINK_BUFFER);
        (
            TransportLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            outbound_rx,
            inbound_tx,
        )
    }
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Opens a connection whose server-side identity is bound to `token`.
    async fn connect(&self, token: &str) -> Result<TransportLink>;
}

pub struct WebSocketTransport {
    ws_url: String,
}

impl WebSocketTransport {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn connect(&self, token: &str) -> Result<TransportLink> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid websocket url: {}", self.ws_url))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("token is not a valid header value")?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _) = connect_async(request)
            .await
            .with_context(|| format!("failed to connect websocket: {}", self.ws_url))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (link, mut outbound_rx, inbound_tx) = TransportLink::channel();

        tokio::spawn(async move {
            while let Some(command) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&command) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "ws: failed to encode outbound command");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    debug!("ws: send failed, connection already gone");
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = inbound_tx.closed() => break,
                    next = ws_reader.next() => next,
                };
                let Some(msg) = next else {
                    break;
                };
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if inbound_tx.send(TransportMessage::Event(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "ws: ignoring undecodable frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = inbound_tx
                            .send(TransportMessage::Dropped(format!(
                                "websocket receive failed: {err}"
                            )))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(link)
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
