//! Connection records and the view registry.
//!
//! One record per physical device, created at registration and kept across
//! reconnects: a device presenting a known `deviceId` gets its previous view
//! identity and state back. Each record is driven by its own heartbeat task;
//! liveness decisions come from the pure state machine in
//! `viewgate_core::connection` and this module performs the effects. State
//! changes are announced on an event channel; the registry's event loop
//! removes records that reach `Disconnected`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use viewgate_core::connection::{
    ConnEvent, Effect, HeartbeatPolicy, SendDisposition, ViewState, probe_due, send_disposition,
    transition,
};
use viewgate_core::error::{GatewayError, check_reply};
use viewgate_core::protocol::{Activity, AuthMethod, Location, client_message};
use viewgate_core::session::View;

use crate::sessions::SessionStore;
use crate::traits::ClientTransport;

// ─── Records ──────────────────────────────────────────────────────

/// Credentials retained after login for later token regeneration.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub method: AuthMethod,
}

/// State change announcement consumed by the registry event loop and the
/// runtime.
#[derive(Debug, Clone)]
pub struct ViewStateChange {
    pub view: View,
    pub state: ViewState,
    pub session_id: Option<String>,
}

struct CachedMessage {
    message: Value,
    completion: oneshot::Sender<Result<(), GatewayError>>,
}

struct ConnectionRecord {
    view: View,
    state: ViewState,
    last_action: DateTime<Utc>,
    cache: VecDeque<CachedMessage>,
    session_id: Option<String>,
    credentials: Option<Credentials>,
    last_fix: Option<Location>,
    activity: Activity,
    heartbeat: Option<JoinHandle<()>>,
}

impl ConnectionRecord {
    fn new(view: View) -> Self {
        Self {
            view,
            state: ViewState::Disconnected,
            last_action: Utc::now(),
            cache: VecDeque::new(),
            session_id: None,
            credentials: None,
            last_fix: None,
            activity: Activity::Unknown,
            heartbeat: None,
        }
    }
}

// ─── Registry ─────────────────────────────────────────────────────

pub struct Registry {
    // Registration order matters: session-wide merges iterate in insertion
    // order, so lookups scan the vector instead of hashing.
    records: Mutex<Vec<ConnectionRecord>>,
    transport: Arc<dyn ClientTransport>,
    sessions: Arc<SessionStore>,
    policy: HeartbeatPolicy,
    device_class: String,
    events: mpsc::UnboundedSender<ViewStateChange>,
}

impl Registry {
    pub fn new(
        transport: Arc<dyn ClientTransport>,
        sessions: Arc<SessionStore>,
        policy: HeartbeatPolicy,
        device_class: impl Into<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ViewStateChange>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            records: Mutex::new(Vec::new()),
            transport,
            sessions,
            policy,
            device_class: device_class.into(),
            events,
        });
        (registry, rx)
    }

    pub fn policy(&self) -> &HeartbeatPolicy {
        &self.policy
    }

    /// Register a device. A known `device_id` gets its existing record back
    /// (view identity, state, session binding and cache intact) with a fresh
    /// heartbeat; an unknown one gets a new record. Returns the view and the
    /// bound session id, if any.
    pub async fn register(self: &Arc<Self>, device_id: &str) -> (View, Option<String>) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.view.device_id == device_id) {
            if let Some(handle) = record.heartbeat.take() {
                handle.abort();
            }
            record.heartbeat = Some(self.spawn_heartbeat(record.view.id.clone()));
            debug!(view = %record.view.id, device = device_id, "device re-registered");
            return (record.view.clone(), record.session_id.clone());
        }

        let view = View::new(&self.device_class, device_id);
        let mut record = ConnectionRecord::new(view.clone());
        record.heartbeat = Some(self.spawn_heartbeat(view.id.clone()));
        records.push(record);
        info!(view = %view.id, device = device_id, "device registered");
        (view, None)
    }

    /// Record a real client action: refresh the idle clock, force the state
    /// to `Connected`, and replay the cache when recovering from
    /// `Connecting`. Replay runs on its own task, strictly in enqueue order.
    pub async fn mark_action(&self, view_id: &str) {
        let now = Utc::now();
        let mut replay: Option<Vec<CachedMessage>> = None;
        {
            let mut records = self.records.lock().await;
            let Some(record) = records.iter_mut().find(|r| r.view.id == view_id) else {
                return;
            };
            record.last_action = now;
            let tr = transition(
                record.state,
                record.last_action,
                ConnEvent::ActionPerformed,
                now,
                &self.policy,
            );
            let changed = tr.state != record.state;
            record.state = tr.state;
            if tr.effects.contains(&Effect::ReplayCache) {
                replay = Some(record.cache.drain(..).collect());
            }
            if changed {
                info!(view = %view_id, state = ?tr.state, "view state changed");
                let _ = self.events.send(ViewStateChange {
                    view: record.view.clone(),
                    state: tr.state,
                    session_id: record.session_id.clone(),
                });
            }
        }
        if let Some(messages) = replay {
            let transport = Arc::clone(&self.transport);
            let send_timeout = Duration::from_millis(self.policy.send_timeout_ms);
            let view_id = view_id.to_string();
            tokio::spawn(async move {
                for cached in messages {
                    let result =
                        deliver(transport.as_ref(), &view_id, cached.message, send_timeout).await;
                    let _ = cached.completion.send(result);
                }
            });
        }
    }

    /// Send a message to a view, routed by its connection state: delivered
    /// directly when connected, parked in the cache until recovery or
    /// disconnection while connecting, rejected outright when disconnected.
    /// Resolves with the final outcome in every case.
    pub async fn send_to_view(&self, view_id: &str, message: Value) -> Result<(), GatewayError> {
        // Routing decided under the lock; the send itself happens outside it.
        enum Routed {
            Direct(Value),
            Parked(oneshot::Receiver<Result<(), GatewayError>>),
        }
        let routed = {
            let mut records = self.records.lock().await;
            let record = records
                .iter_mut()
                .find(|r| r.view.id == view_id)
                .ok_or_else(|| GatewayError::NotFound(format!("No view with id {view_id}.")))?;
            match send_disposition(record.state) {
                SendDisposition::Direct => Routed::Direct(message),
                SendDisposition::Cache => {
                    let (tx, rx) = oneshot::channel();
                    record.cache.push_back(CachedMessage {
                        message,
                        completion: tx,
                    });
                    Routed::Parked(rx)
                }
                SendDisposition::Reject => return Err(GatewayError::Disconnected),
            }
        };
        match routed {
            Routed::Direct(message) => {
                let send_timeout = Duration::from_millis(self.policy.send_timeout_ms);
                deliver(self.transport.as_ref(), view_id, message, send_timeout).await
            }
            Routed::Parked(rx) => rx.await.unwrap_or(Err(GatewayError::Disconnected)),
        }
    }

    /// Handle a failed or timed-out probe. Returns the resulting state so the
    /// heartbeat task knows whether to stop.
    async fn probe_failed(&self, view_id: &str) -> ViewState {
        let now = Utc::now();
        let mut failed: Vec<CachedMessage> = Vec::new();
        let mut logout: Option<(String, Credentials)> = None;
        let state = {
            let mut records = self.records.lock().await;
            let Some(record) = records.iter_mut().find(|r| r.view.id == view_id) else {
                return ViewState::Disconnected;
            };
            let tr = transition(
                record.state,
                record.last_action,
                ConnEvent::ProbeFailed,
                now,
                &self.policy,
            );
            let changed = tr.state != record.state;
            record.state = tr.state;
            for effect in &tr.effects {
                match effect {
                    Effect::FailCache => failed = record.cache.drain(..).collect(),
                    Effect::LogoutBestEffort => {
                        if let (Some(session_id), Some(credentials)) =
                            (record.session_id.clone(), record.credentials.clone())
                        {
                            logout = Some((session_id, credentials));
                        }
                    }
                    // The heartbeat task observes the returned state and
                    // stops itself.
                    Effect::CancelHeartbeat => drop(record.heartbeat.take()),
                    Effect::ReplayCache => {}
                }
            }
            if changed {
                info!(view = %view_id, state = ?tr.state, "view state changed");
                let _ = self.events.send(ViewStateChange {
                    view: record.view.clone(),
                    state: tr.state,
                    session_id: record.session_id.clone(),
                });
            }
            tr.state
        };
        for cached in failed {
            let _ = cached.completion.send(Err(GatewayError::Disconnected));
        }
        if let Some((session_id, credentials)) = logout {
            let sessions = Arc::clone(&self.sessions);
            let view_id = view_id.to_string();
            tokio::spawn(async move {
                if let Err(error) = sessions
                    .logout_view(&session_id, &credentials, &view_id)
                    .await
                {
                    warn!(view = %view_id, session = %session_id, %error,
                        "logout after disconnect failed");
                }
            });
        }
        state
    }

    fn spawn_heartbeat(self: &Arc<Self>, view_id: String) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let period = Duration::from_millis(registry.policy.heartbeat_interval_ms.max(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let due = {
                    let records = registry.records.lock().await;
                    match records.iter().find(|r| r.view.id == view_id) {
                        Some(record) => probe_due(record.last_action, Utc::now(), &registry.policy),
                        None => break,
                    }
                };
                if !due {
                    continue;
                }
                let timeout = Duration::from_millis(registry.policy.probe_timeout_ms);
                match registry
                    .transport
                    .request(&view_id, client_message::get_status(), timeout)
                    .await
                {
                    Ok(reply) => match check_reply(&reply) {
                        Ok(()) => registry.mark_action(&view_id).await,
                        Err(error) => {
                            warn!(view = %view_id, %error, "status probe reported failure");
                        }
                    },
                    Err(_) => {
                        if registry.probe_failed(&view_id).await == ViewState::Disconnected {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn remove_record(&self, view_id: &str) {
        let mut records = self.records.lock().await;
        if let Some(pos) = records
            .iter()
            .position(|r| r.view.id == view_id && r.state == ViewState::Disconnected)
        {
            let record = records.remove(pos);
            if let Some(handle) = record.heartbeat {
                handle.abort();
            }
            info!(view = %view_id, "connection record removed");
        }
    }

    // ─── Session bindings & per-view data ─────────────────────────

    pub async fn bind_session(&self, view_id: &str, session_id: &str, credentials: Credentials) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.view.id == view_id) {
            record.session_id = Some(session_id.to_string());
            record.credentials = Some(credentials);
        }
    }

    pub async fn unbind_session(&self, view_id: &str) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.view.id == view_id) {
            record.session_id = None;
            record.credentials = None;
            record.last_fix = None;
            record.activity = Activity::Unknown;
        }
    }

    /// Bound session id and stored credentials of a view.
    pub async fn binding(&self, view_id: &str) -> Option<(String, Credentials)> {
        let records = self.records.lock().await;
        let record = records.iter().find(|r| r.view.id == view_id)?;
        Some((record.session_id.clone()?, record.credentials.clone()?))
    }

    pub async fn set_location(&self, view_id: &str, location: Location) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.view.id == view_id) {
            record.last_fix = Some(location);
        }
    }

    pub async fn set_activity(&self, view_id: &str, activity: Activity) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.view.id == view_id) {
            record.activity = activity;
        }
    }

    // ─── Lookups ──────────────────────────────────────────────────

    pub async fn view_by_id(&self, view_id: &str) -> Option<View> {
        let records = self.records.lock().await;
        records
            .iter()
            .find(|r| r.view.id == view_id)
            .map(|r| r.view.clone())
    }

    pub async fn state_of(&self, view_id: &str) -> Option<ViewState> {
        let records = self.records.lock().await;
        records
            .iter()
            .find(|r| r.view.id == view_id)
            .map(|r| r.state)
    }

    /// Views bound to a session, in registration order.
    pub async fn views_for_session(&self, session_id: &str) -> Vec<View> {
        let records = self.records.lock().await;
        records
            .iter()
            .filter(|r| r.session_id.as_deref() == Some(session_id))
            .map(|r| r.view.clone())
            .collect()
    }

    pub async fn view_in_session(&self, session_id: &str, view_id: &str) -> Option<View> {
        let records = self.records.lock().await;
        records
            .iter()
            .find(|r| r.session_id.as_deref() == Some(session_id) && r.view.id == view_id)
            .map(|r| r.view.clone())
    }

    /// Last reported fix locations of a session's views, in registration
    /// order.
    pub async fn fix_locations_for_session(&self, session_id: &str) -> Vec<Location> {
        let records = self.records.lock().await;
        records
            .iter()
            .filter(|r| r.session_id.as_deref() == Some(session_id))
            .filter_map(|r| r.last_fix.clone())
            .collect()
    }

    /// Reported activities of a session's views, in registration order.
    pub async fn activities_for_session(&self, session_id: &str) -> Vec<Activity> {
        let records = self.records.lock().await;
        records
            .iter()
            .filter(|r| r.session_id.as_deref() == Some(session_id))
            .map(|r| r.activity)
            .collect()
    }
}

async fn deliver(
    transport: &dyn ClientTransport,
    view_id: &str,
    message: Value,
    timeout: Duration,
) -> Result<(), GatewayError> {
    let reply = transport
        .request(view_id, message, timeout)
        .await
        .map_err(|_| GatewayError::operation("Message timed out."))?;
    check_reply(&reply)
}

/// Consume state changes and drop records that reached `Disconnected`. The
/// runtime spawns this next to the registry and forwards each change to its
/// own bookkeeping.
pub async fn run_event_loop(
    registry: Arc<Registry>,
    mut events: mpsc::UnboundedReceiver<ViewStateChange>,
) {
    while let Some(change) = events.recv().await {
        if change.state == ViewState::Disconnected {
            registry.remove_record(&change.view.id).await;
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
