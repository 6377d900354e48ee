//! In-memory fakes for the router's collaborators, shared across test
//! modules.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use viewgate_core::error::{GatewayError, ok_response};
use viewgate_core::protocol::AuthMethod;
use viewgate_core::session::{User, View};
use viewgate_registry::traits::{AuthService, AuthSession, AuthTicket, ClientTransport};

use crate::traits::{ContentSource, SmsGateway};

// ─── Transport ────────────────────────────────────────────────────

type FailPredicate = Box<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// Client transport recording every request, with an optional failure
/// predicate over (view id, message).
#[derive(Default)]
pub struct ScriptedTransport {
    fail_if: Mutex<Option<FailPredicate>>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn fail_when(&self, predicate: impl Fn(&str, &Value) -> bool + Send + Sync + 'static) {
        *self.fail_if.lock().unwrap() = Some(Box::new(predicate));
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientTransport for ScriptedTransport {
    async fn request(
        &self,
        view_id: &str,
        message: Value,
        _timeout: Duration,
    ) -> Result<Value, GatewayError> {
        if let Some(predicate) = self.fail_if.lock().unwrap().as_ref() {
            if predicate(view_id, &message) {
                return Err(GatewayError::operation("transport down"));
            }
        }
        self.sent
            .lock()
            .unwrap()
            .push((view_id.to_string(), message));
        Ok(ok_response())
    }
}

// ─── Identity ─────────────────────────────────────────────────────

/// Identity fake accepting every credential; sessions keyed by user.
#[derive(Default)]
pub struct FakeAuth {
    sessions: Mutex<HashMap<String, AuthSession>>,
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

// ─── Content ──────────────────────────────────────────────────────

/// Content source serving scripted manifests.
#[derive(Default)]
pub struct FakeContent {
    manifests: Mutex<HashMap<String, Result<Value, GatewayError>>>,
}

impl FakeContent {
    pub fn put(&self, package_id: &str, manifest: Value) {
        self.manifests
            .lock()
            .unwrap()
            .insert(package_id.to_string(), Ok(manifest));
    }

    pub fn fail(&self, package_id: &str, error: GatewayError) {
        self.manifests
            .lock()
            .unwrap()
            .insert(package_id.to_string(), Err(error));
    }
}

#[async_trait]
impl ContentSource for FakeContent {
    async fn manifest(&self, package_id: &str) -> Result<Value, GatewayError> {
        self.manifests
            .lock()
            .unwrap()
            .get(package_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(GatewayError::NotFound(format!(
                    "No content package {package_id}."
                )))
            })
    }

    fn base_url(&self, package_id: &str) -> String {
        format!("http://cds.local/content/{package_id}/")
    }
}

// ─── SMS ──────────────────────────────────────────────────────────

/// SMS gateway recording every sent message.
#[derive(Default)]
pub struct FakeSms {
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeSms {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsGateway for FakeSms {
    async fn send(&self, mobile: &str, text: &str) -> Result<(), GatewayError> {
        self.sent
            .lock()
            .unwrap()
            .push((mobile.to_string(), text.to_string()));
        Ok(())
    }
}
