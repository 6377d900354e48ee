//! Bus- and HTTP-backed implementations of the collaborator traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

use viewgate_core::error::{GatewayError, check_reply};
use viewgate_core::protocol::AuthMethod;
use viewgate_core::session::View;
use viewgate_registry::traits::{
    ActionDispatcher, AuthService, AuthSession, AuthTicket, ClientTransport,
};
use viewgate_router::traits::{ContentSource, SmsGateway};

use crate::bus::Bus;

// ─── Client transport ─────────────────────────────────────────────

/// Routes view sends to the `view:{id}` bus address.
pub struct BusTransport {
    bus: Arc<Bus>,
}

impl BusTransport {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ClientTransport for BusTransport {
    async fn request(
        &self,
        view_id: &str,
        message: Value,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        self.bus
            .request(&format!("view:{view_id}"), message, timeout)
            .await
    }
}

// ─── Action dispatcher ────────────────────────────────────────────

/// Executes client-requested actions: HTTP POSTs go out through reqwest,
/// events and targeted sends go out on the bus.
pub struct BusDispatcher {
    bus: Arc<Bus>,
    http: reqwest::Client,
}

impl BusDispatcher {
    pub fn new(bus: Arc<Bus>, http: reqwest::Client) -> Self {
        Self { bus, http }
    }
}

#[async_trait]
impl ActionDispatcher for BusDispatcher {
    async fn http_post(&self, address: &str, body: Value) -> Result<(), GatewayError> {
        let url = Url::parse(address).map_err(|_| {
            GatewayError::Validation("The [address] field contains no valid URI.".into())
        })?;
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::operation(format!("POST to {address} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::Operation {
                code: response.status().as_u16(),
                message: format!("POST to {address} returned {}.", response.status()),
            });
        }
        Ok(())
    }

    async fn publish_event(&self, model: &str, event: Value) -> Result<(), GatewayError> {
        self.bus.publish(model, event);
        Ok(())
    }

    async fn send_message(&self, address: &str, body: Value) -> Result<(), GatewayError> {
        self.bus.send(address, body)
    }
}

// ─── Identity ─────────────────────────────────────────────────────

/// Identity service spoken to over the bus.
pub struct BusAuthService {
    bus: Arc<Bus>,
    address: String,
    timeout: Duration,
}

impl BusAuthService {
    pub fn new(bus: Arc<Bus>, address: String, timeout: Duration) -> Self {
        Self {
            bus,
            address,
            timeout,
        }
    }

    async fn call(&self, body: Value) -> Result<Value, GatewayError> {
        let reply = self.bus.request(&self.address, body, self.timeout).await?;
        check_reply(&reply)?;
        Ok(reply)
    }
}

/// Request field name and value for a credential.
fn credential_field(method: &AuthMethod) -> (&'static str, &str) {
    match method {
        AuthMethod::Password(value) => ("password", value),
        AuthMethod::Pin(value) => ("pin", value),
        AuthMethod::Hash(value) => ("hash", value),
    }
}

fn parse_session(value: &Value) -> Result<AuthSession, GatewayError> {
    let malformed = || GatewayError::operation("Malformed reply from identity service.");
    let id = value.get("id").and_then(Value::as_str).ok_or_else(malformed)?;
    let user_id = value
        .get("userId")
        .and_then(Value::as_str)
        .ok_or_else(malformed)?;
    let views: Vec<View> = match value.get("views") {
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| malformed())?,
        None => Vec::new(),
    };
    Ok(AuthSession {
        id: id.to_string(),
        user_id: user_id.to_string(),
        views,
    })
}

fn session_body(session: &AuthSession) -> Value {
    json!({
        "id": session.id,
        "userId": session.user_id,
        "views": session.views,
    })
}

#[async_trait]
impl AuthService for BusAuthService {
    async fn authenticate(
        &self,
        user_id: &str,
        method: &AuthMethod,
    ) -> Result<AuthTicket, GatewayError> {
        let (field, value) = credential_field(method);
        let reply = self
            .call(json!({"action": "authenticate", "userId": user_id, field: value}))
            .await?;
        let user = serde_json::from_value(reply.get("user").cloned().unwrap_or(Value::Null))
            .map_err(|_| GatewayError::operation("Malformed reply from identity service."))?;
        let token = reply
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::operation("Malformed reply from identity service."))?;
        Ok(AuthTicket {
            user,
            token: token.to_string(),
        })
    }

    async fn generate_token(
        &self,
        user_id: &str,
        method: &AuthMethod,
    ) -> Result<String, GatewayError> {
        let (field, value) = credential_field(method);
        let reply = self
            .call(json!({"action": "generateToken", "userId": user_id, field: value}))
            .await?;
        reply
            .get("token")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| GatewayError::operation("Malformed reply from identity service."))
    }

    async fn session_for_user(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Option<AuthSession>, GatewayError> {
        let reply = self
            .call(json!({"action": "getSession", "userId": user_id, "token": token}))
            .await?;
        match reply.get("session") {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => Ok(Some(parse_session(raw)?)),
        }
    }

    async fn store_session(&self, session: &AuthSession, token: &str) -> Result<(), GatewayError> {
        self.call(json!({
            "action": "storeSession",
            "session": session_body(session),
            "token": token,
        }))
        .await?;
        Ok(())
    }

    async fn register_view(
        &self,
        session_id: &str,
        token: &str,
        view: &View,
    ) -> Result<AuthSession, GatewayError> {
        let reply = self
            .call(json!({
                "action": "addView",
                "sessionId": session_id,
                "token": token,
                "view": view,
            }))
            .await?;
        parse_session(reply.get("session").unwrap_or(&Value::Null))
    }

    async fn remove_view(
        &self,
        session_id: &str,
        token: &str,
        view_id: &str,
    ) -> Result<AuthSession, GatewayError> {
        let reply = self
            .call(json!({
                "action": "removeView",
                "sessionId": session_id,
                "token": token,
                "viewId": view_id,
            }))
            .await?;
        parse_session(reply.get("session").unwrap_or(&Value::Null))
    }
}

// ─── Content ──────────────────────────────────────────────────────

/// Content-delivery service over HTTP. Manifests live at
/// `{base}/{packageId}/content.json`; package files resolve against
/// `{base}/{packageId}/`.
pub struct HttpContentSource {
    http: reqwest::Client,
    base: String,
}

impl HttpContentSource {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn manifest(&self, package_id: &str) -> Result<Value, GatewayError> {
        let url = format!("{}/{package_id}/content.json", self.base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::operation(format!("Content request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::Operation {
                code: response.status().as_u16(),
                message: format!("Content service returned {}.", response.status()),
            });
        }
        response
            .json()
            .await
            .map_err(|e| GatewayError::operation(format!("Invalid content manifest: {e}")))
    }

    fn base_url(&self, package_id: &str) -> String {
        format!("{}/{package_id}/", self.base)
    }
}

// ─── SMS ──────────────────────────────────────────────────────────

/// SMS gateway over HTTP.
pub struct HttpSmsGateway {
    http: reqwest::Client,
    endpoint: String,
    sender: Option<String>,
}

impl HttpSmsGateway {
    pub fn new(http: reqwest::Client, endpoint: String, sender: Option<String>) -> Self {
        Self {
            http,
            endpoint,
            sender,
        }
    }

    fn payload(&self, mobile: &str, text: &str) -> Value {
        let mut body = json!({"to": mobile, "text": text});
        if let Some(sender) = &self.sender {
            body["from"] = json!(sender);
        }
        body
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, mobile: &str, text: &str) -> Result<(), GatewayError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&self.payload(mobile, text))
            .send()
            .await
            .map_err(|e| GatewayError::operation(format!("SMS request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::operation(format!(
                "SMS gateway returned {}.",
                response.status()
            )));
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────
