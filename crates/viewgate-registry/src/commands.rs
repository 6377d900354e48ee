//! Device-facing command handling.
//!
//! Two inbound surfaces: the registration channel (`handle_register`) and the
//! per-view command channel (`handle_command`). Every command on the view
//! channel counts as a performed action before it is interpreted, so even a
//! malformed body keeps the connection alive. Replies are always envelopes;
//! errors never propagate past this layer.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use viewgate_core::error::{GatewayError, ok_response};
use viewgate_core::protocol::{
    Activity, AuthMethod, ClientAction, ClientCommand, Location, LocationKind,
};

use crate::registry::{Credentials, Registry};
use crate::sessions::SessionStore;
use crate::traits::{ActionDispatcher, AuthService};

/// Shared dependencies of the command handlers.
pub struct CommandContext {
    pub registry: Arc<Registry>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<dyn AuthService>,
    pub dispatcher: Arc<dyn ActionDispatcher>,
    /// Configured site locations returned verbatim by `getFixLocations`.
    pub fix_locations: Vec<Value>,
}

/// Handle a device registration request.
pub async fn handle_register(ctx: &CommandContext, body: &Value) -> Value {
    let Some(device_id) = body
        .get("deviceId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    else {
        return GatewayError::Validation("Missing device identifier [deviceId].".into())
            .to_envelope();
    };
    let (view, session_id) = ctx.registry.register(device_id).await;
    let session = match session_id {
        Some(id) => ctx.sessions.get(&id).await,
        None => None,
    };
    match session {
        Some(session) => json!({"status": "ok", "view": view, "session": session}),
        None => json!({"status": "ok", "view": view}),
    }
}

/// Handle one command from a view's inbound channel and produce the reply
/// envelope.
pub async fn handle_command(ctx: &CommandContext, view_id: &str, body: &Value) -> Value {
    if ctx.registry.view_by_id(view_id).await.is_none() {
        return GatewayError::NotFound(format!("No view with id {view_id}.")).to_envelope();
    }
    ctx.registry.mark_action(view_id).await;

    let command = match ClientCommand::from_value(body) {
        Ok(command) => command,
        Err(error) => return error.to_envelope(),
    };
    let result = match command {
        ClientCommand::Login { user_id, method } => {
            login(ctx, view_id, user_id, method).await
        }
        ClientCommand::Logout => logout(ctx, view_id).await,
        ClientCommand::PerformAction { action } => perform_action(ctx, view_id, action).await,
        ClientCommand::SetLocation { location } => set_location(ctx, view_id, location).await,
        ClientCommand::GetFixLocations => {
            Ok(json!({"status": "ok", "locations": ctx.fix_locations}))
        }
        ClientCommand::SetUserActivity { activity } => {
            set_user_activity(ctx, view_id, &activity).await
        }
    };
    result.unwrap_or_else(|error| error.to_envelope())
}

async fn login(
    ctx: &CommandContext,
    view_id: &str,
    user_id: String,
    method: AuthMethod,
) -> Result<Value, GatewayError> {
    let view = ctx
        .registry
        .view_by_id(view_id)
        .await
        .ok_or_else(|| GatewayError::NotFound(format!("No view with id {view_id}.")))?;
    let ticket = ctx.auth.authenticate(&user_id, &method).await?;
    let session = ctx
        .sessions
        .register_view(ticket.user, &ticket.token, view)
        .await?;
    ctx.registry
        .bind_session(view_id, &session.id, Credentials { user_id, method })
        .await;
    Ok(json!({"status": "ok", "session": session}))
}

async fn logout(ctx: &CommandContext, view_id: &str) -> Result<Value, GatewayError> {
    let (session_id, credentials) = ctx
        .registry
        .binding(view_id)
        .await
        .ok_or_else(|| GatewayError::operation("No user session to log out."))?;
    let token = ctx
        .auth
        .generate_token(&credentials.user_id, &credentials.method)
        .await?;
    ctx.sessions.remove_view(&session_id, &token, view_id).await?;
    ctx.registry.unbind_session(view_id).await;
    Ok(ok_response())
}

async fn perform_action(
    ctx: &CommandContext,
    view_id: &str,
    action: ClientAction,
) -> Result<Value, GatewayError> {
    let (session_id, credentials) = ctx
        .registry
        .binding(view_id)
        .await
        .ok_or_else(|| GatewayError::Validation("No active user session.".into()))?;
    let token = ctx
        .auth
        .generate_token(&credentials.user_id, &credentials.method)
        .await?;
    match action {
        ClientAction::Post { address, body } => {
            ctx.dispatcher
                .http_post(&address, stamped(body, &session_id, &token))
                .await?;
        }
        ClientAction::PublishEvent { model, payload } => {
            let event = action_event(&model, &session_id, &token, payload);
            ctx.dispatcher.publish_event(&model, event).await?;
        }
        ClientAction::SendMessage { address, body } => {
            ctx.dispatcher
                .send_message(&address, stamped(body, &session_id, &token))
                .await?;
        }
    }
    Ok(ok_response())
}

async fn set_location(
    ctx: &CommandContext,
    view_id: &str,
    raw: Value,
) -> Result<Value, GatewayError> {
    let mut location: Location = serde_json::from_value(raw)
        .map_err(|e| GatewayError::Validation(format!("Invalid location object [location]: {e}")))?;
    location.last_update = Some(Utc::now());
    if location.kind == LocationKind::Fix {
        ctx.registry.set_location(view_id, location).await;
    }
    Ok(ok_response())
}

async fn set_user_activity(
    ctx: &CommandContext,
    view_id: &str,
    raw: &str,
) -> Result<Value, GatewayError> {
    let activity: Activity = raw.parse()?;
    ctx.registry.set_activity(view_id, activity).await;
    if let Some((session_id, _)) = ctx.registry.binding(view_id).await {
        let body = json!({"sessionId": session_id, "activity": activity.as_str()});
        if let Err(error) = ctx.dispatcher.publish_event("userActivitySwitch", body).await {
            warn!(view = %view_id, %error, "publishing activity switch failed");
        }
    }
    Ok(ok_response())
}

/// Stamp the session id and a fresh token onto an outgoing body without
/// clobbering fields the client already set.
fn stamped(mut body: Value, session_id: &str, token: &str) -> Value {
    if let Some(map) = body.as_object_mut() {
        map.entry("sessionId").or_insert_with(|| json!(session_id));
        map.entry("token").or_insert_with(|| json!(token));
    }
    body
}

/// Domain event published on a client's behalf.
fn action_event(model: &str, session_id: &str, token: &str, payload: Value) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "model": model,
        "created": Utc::now().to_rfc3339(),
        "session": session_id,
        "token": token,
        "payload": payload,
    })
}

// ─── Tests ────────────────────────────────────────────────────────
