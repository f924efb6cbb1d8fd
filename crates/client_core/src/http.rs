use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ConversationId, UserId, UserProfile},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        AccessTokenResponse, ChatEvent, ConversationSummary, CreateConversationRequest,
        CredentialsRequest,
    },
};
use tracing::debug;

use crate::{
    credential::TokenSource,
    error::AuthError,
    services::{is_searchable, AuthService, ConversationService, UserDirectory},
};

/// REST client for the chat backend.
///
/// The bearer token is read from the session's [`TokenSource`] on every
/// request, so the backend always speaks for whichever session was installed
/// last.
pub struct HttpBackend {
    http: Client,
    server_url: String,
    tokens: TokenSource,
}

impl HttpBackend {
    pub fn new(server_url: impl Into<String>, tokens: TokenSource) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.current().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let request = self.authorized(self.http.get(self.endpoint(path)).query(query)).await;
        let response = request
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        decode_json(path, response).await
    }

    async fn authenticate(
        &self,
        path: &str,
        user_name: &str,
        secret: &str,
        fallback_message: &str,
    ) -> Result<String, AuthError> {
        let response = self
            .http
            .post(self.endpoint(path))
            .json(&CredentialsRequest {
                user_name: user_name.to_string(),
                password: secret.to_string(),
            })
            .send()
            .await
            .map_err(|err| AuthError::Unavailable(err.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AuthError::Unavailable(format!("server returned {status}")));
        }
        if !status.is_success() {
            let message = response
                .json::<ApiError>()
                .await
                .map(|body| body.message)
                .ok()
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| fallback_message.to_string());
            return Err(AuthError::Rejected(message));
        }

        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Unavailable(format!("invalid auth response: {err}")))?;
        Ok(body.access_token)
    }
}

async fn decode_json<T: DeserializeOwned>(path: &str, response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<ApiError>()
            .await
            .map(|body| body.message)
            .unwrap_or_else(|_| format!("request to {path} failed with {status}"));
        return Err(anyhow::Error::new(ApiException::new(
            ErrorCode::from_http_status(status.as_u16()),
            message,
        )));
    }
    response
        .json()
        .await
        .with_context(|| format!("invalid response body from {path}"))
}

#[async_trait]
impl AuthService for HttpBackend {
    async fn register(&self, user_name: &str, secret: &str) -> Result<String, AuthError> {
        self.authenticate("/api/auth/register", user_name, secret, "Registration failed")
            .await
    }

    async fn login(&self, user_name: &str, secret: &str) -> Result<String, AuthError> {
        self.authenticate("/api/auth/login", user_name, secret, "Login failed")
            .await
    }
}

#[async_trait]
impl ConversationService for HttpBackend {
    async fn list_conversations(&self, identity: &UserId) -> Result<Vec<ConversationSummary>> {
        debug!(identity = %identity, "http: listing conversations");
        self.get_json("/api/chats", &[]).await
    }

    async fn create_conversation(&self, other: &UserId) -> Result<ConversationSummary> {
        let path = "/api/chats";
        let request = self
            .authorized(self.http.post(self.endpoint(path)).json(&CreateConversationRequest {
                participant_id: other.clone(),
            }))
            .await;
        let response = request
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        decode_json(path, response).await
    }

    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<ChatEvent>> {
        self.get_json(&format!("/api/chats/{conversation_id}/events"), &[])
            .await
    }
}

#[async_trait]
impl UserDirectory for HttpBackend {
    async fn search(&self, prefix: &str) -> Result<Vec<UserProfile>> {
        if !is_searchable(prefix) {
            return Ok(Vec::new());
        }
        self.get_json("/api/users/search", &[("query", prefix)])
            .await
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
