//! Collaborator seams for the registry.
//!
//! The registry never talks to a concrete transport or identity provider;
//! the runtime supplies implementations backed by the service bus. Tests
//! substitute in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use viewgate_core::error::GatewayError;
use viewgate_core::protocol::AuthMethod;
use viewgate_core::session::{User, View};

/// Request/reply channel to a connected device. One logical address per view;
/// the implementation resolves the view id to wherever the device listens.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Send a message to the view's client and await its reply envelope
    /// within the given timeout. A transport failure or elapsed timeout is an
    /// error; an error envelope in the reply is not.
    async fn request(
        &self,
        view_id: &str,
        message: Value,
        timeout: Duration,
    ) -> Result<Value, GatewayError>;
}

/// Session record as held by the identity collaborator. The snapshot kept in
/// [`crate::sessions::SessionStore`] is derived from this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub id: String,
    pub user_id: String,
    pub views: Vec<View>,
}

/// Outcome of a successful credential check.
#[derive(Debug, Clone)]
pub struct AuthTicket {
    pub user: User,
    pub token: String,
}

/// Identity provider: credential checks, token generation, and the
/// authoritative session-to-view bookkeeping.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Verify a credential and return the user record plus a usable token.
    async fn authenticate(
        &self,
        user_id: &str,
        method: &AuthMethod,
    ) -> Result<AuthTicket, GatewayError>;

    /// Mint a fresh token from stored credentials, for calls made on the
    /// user's behalf after login (logout, action stamping).
    async fn generate_token(
        &self,
        user_id: &str,
        method: &AuthMethod,
    ) -> Result<String, GatewayError>;

    /// The user's current session, if one exists.
    async fn session_for_user(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Option<AuthSession>, GatewayError>;

    /// Persist a newly created session.
    async fn store_session(&self, session: &AuthSession, token: &str) -> Result<(), GatewayError>;

    /// Attach a view to an existing session; returns the updated record.
    async fn register_view(
        &self,
        session_id: &str,
        token: &str,
        view: &View,
    ) -> Result<AuthSession, GatewayError>;

    /// Detach a view from a session; returns the updated record.
    async fn remove_view(
        &self,
        session_id: &str,
        token: &str,
        view_id: &str,
    ) -> Result<AuthSession, GatewayError>;
}

/// Executor for client-requested actions (`performAction`). Implementations
/// bridge to HTTP and the service bus.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// POST a JSON body to an external endpoint. Rejects invalid addresses
    /// with a validation error.
    async fn http_post(&self, address: &str, body: Value) -> Result<(), GatewayError>;

    /// Publish a domain event under the given model id.
    async fn publish_event(&self, model: &str, event: Value) -> Result<(), GatewayError>;

    /// Targeted fire-and-forget send to a bus address.
    async fn send_message(&self, address: &str, body: Value) -> Result<(), GatewayError>;
}
