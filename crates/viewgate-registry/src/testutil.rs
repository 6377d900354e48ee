//! In-memory fakes for the collaborator traits, shared across test modules.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use viewgate_core::error::{GatewayError, error_response, ok_response};
use viewgate_core::protocol::AuthMethod;
use viewgate_core::session::{User, View};

use crate::traits::{ActionDispatcher, AuthService, AuthSession, AuthTicket, ClientTransport};

// ─── Transport ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum TransportMode {
    Ok,
    Fail,
    ErrorReply(u16, String),
}

/// Scripted client transport recording every request.
pub struct FakeTransport {
    mode: Mutex<TransportMode>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            mode: Mutex::new(TransportMode::Ok),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTransport {
    pub fn set_mode(&self, mode: TransportMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientTransport for FakeTransport {
    async fn request(
        &self,
        view_id: &str,
        message: Value,
        _timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            TransportMode::Fail => Err(GatewayError::operation("transport down")),
            TransportMode::Ok => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((view_id.to_string(), message));
                Ok(ok_response())
            }
            TransportMode::ErrorReply(code, text) => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((view_id.to_string(), message));
                Ok(error_response(code, &text))
            }
        }
    }
}

// ─── Identity ─────────────────────────────────────────────────────

/// Identity fake: accepts every credential, keeps sessions keyed by user.
#[derive(Default)]
pub struct FakeAuth {
    sessions: Mutex<HashMap<String, AuthSession>>,
    tokens_generated: Mutex<u32>,
}

impl FakeAuth {
    pub fn stored_session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn generated_token_count(&self) -> u32 {
        *self.tokens_generated.lock().unwrap()
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn authenticate(
        &self,
        user_id: &str,
        _method: &AuthMethod,
    ) -> Result<AuthTicket, GatewayError> {
        Ok(AuthTicket {
            user: User::new(user_id),
            token: format!("tok-{user_id}"),
        })
    }

    async fn generate_token(
        &self,
        user_id: &str,
        _method: &AuthMethod,
    ) -> Result<String, GatewayError> {
        *self.tokens_generated.lock().unwrap() += 1;
        Ok(format!("tok-{user_id}"))
    }

    async fn session_for_user(
        &self,
        user_id: &str,
        _token: &str,
    ) -> Result<Option<AuthSession>, GatewayError> {
        Ok(self.sessions.lock().unwrap().get(user_id).cloned())
    }

    async fn store_session(
        &self,
        session: &AuthSession,
        _token: &str,
    ) -> Result<(), GatewayError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.user_id.clone(), session.clone());
        Ok(())
    }

    async fn register_view(
        &self,
        session_id: &str,
        _token: &str,
        view: &View,
    ) -> Result<AuthSession, GatewayError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .values_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| GatewayError::NotFound(format!("No session with id {session_id}.")))?;
        session.views.push(view.clone());
        Ok(session.clone())
    }

    async fn remove_view(
        &self,
        session_id: &str,
        _token: &str,
        view_id: &str,
    ) -> Result<AuthSession, GatewayError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .values_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| GatewayError::NotFound(format!("No session with id {session_id}.")))?;
        session.views.retain(|v| v.id != view_id);
        Ok(session.clone())
    }
}

// ─── Dispatcher ───────────────────────────────────────────────────

/// Action dispatcher fake recording every call.
#[derive(Default)]
pub struct FakeDispatcher {
    posts: Mutex<Vec<(String, Value)>>,
    events: Mutex<Vec<(String, Value)>>,
    messages: Mutex<Vec<(String, Value)>>,
}

impl FakeDispatcher {
    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(String, Value)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionDispatcher for FakeDispatcher {
    async fn http_post(&self, address: &str, body: Value) -> Result<(), GatewayError> {
        self.posts.lock().unwrap().push((address.to_string(), body));
        Ok(())
    }

    async fn publish_event(&self, model: &str, event: Value) -> Result<(), GatewayError> {
        self.events.lock().unwrap().push((model.to_string(), event));
        Ok(())
    }

    async fn send_message(&self, address: &str, body: Value) -> Result<(), GatewayError> {
        self.messages
            .lock()
            .unwrap()
            .push((address.to_string(), body));
        Ok(())
    }
}
