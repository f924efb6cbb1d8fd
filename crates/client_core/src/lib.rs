//! Session, live channel and conversation state for the chat client.

pub mod channel;
pub mod client;
pub mod config;
pub mod credential;
pub mod credential_store;
pub mod error;
pub mod http;
pub mod index;
pub mod services;
pub mod session;
pub mod timeline;
pub mod transport;

pub use channel::{ChannelConnection, ChannelStatus};
pub use client::{ChatClient, ClientDependencies, ClientEvent};
pub use config::{load_settings, load_settings_from, ClientSettings};
pub use credential::{Credential, TokenSource};
pub use credential_store::{CredentialStore, MemoryCredentialStore, AUTH_TOKEN_KEY};
pub use error::{AuthError, ClientError};
pub use session::SessionStore;
pub use timeline::HistoryState;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
