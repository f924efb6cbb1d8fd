use thiserror::Error;

use crate::credential::DecodeError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The server refused the request; the message is meant for the user.
    #[error("{0}")]
    Rejected(String),
    #[error("authentication service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("invalid credential: {0}")]
    Decode(#[from] DecodeError),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("channel unavailable: {0}")]
    Channel(String),
    #[error("not signed in")]
    NotAuthenticated,
    #[error("message must not be empty")]
    EmptyMessage,
}

impl ClientError {
    pub fn fetch(err: anyhow::Error) -> Self {
        Self::Fetch(format!("{err:#}"))
    }

    /// Text suitable for showing in the presenter. Decode failures are not
    /// user-facing and fall back to a sign-in prompt.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(AuthError::Rejected(message)) => message.clone(),
            Self::Auth(AuthError::Unavailable(_)) => {
                "Server unreachable; check URL/network and retry sign-in.".to_string()
            }
            Self::Decode(_) | Self::NotAuthenticated => "Please sign in.".to_string(),
            other => other.to_string(),
        }
    }
}
