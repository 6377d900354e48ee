//! Per-view connection liveness state machine.
//!
//! Pure and side-effect free: [`transition`] is the single entry point for
//! state changes and returns the effects the driver must perform. All time
//! values are passed in, never read from a clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ─── Constants ────────────────────────────────────────────────────

/// Default heartbeat probe interval (milliseconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// Default heartbeat probe timeout (milliseconds).
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_000;

/// Default idle threshold after which a silent view counts as disconnected
/// (milliseconds).
pub const DEFAULT_DISCONNECT_AFTER_MS: u64 = 120_000;

// ─── Types ────────────────────────────────────────────────────────

/// Connection state of a view. `Disconnected` is both initial and terminal;
/// a reconnect re-enters from it with a fresh or recognized record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Liveness input observed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// Any inbound client command, or a probe reply with status "ok".
    ActionPerformed,
    /// A heartbeat probe failed or timed out.
    ProbeFailed,
}

/// Effect the driver must perform after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Entering `Connected` from `Connecting`: replay cached messages to the
    /// client, strictly in enqueue order, one in flight at a time.
    ReplayCache,
    /// Entering `Disconnected`: fail every cached message with a disconnect
    /// cause and clear the cache.
    FailCache,
    /// Entering `Disconnected` with a bound session: attempt an asynchronous
    /// logout; failures are logged, never surfaced.
    LogoutBestEffort,
    /// Entering `Disconnected`: stop the heartbeat timer.
    CancelHeartbeat,
}

/// Result of feeding one event into the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: ViewState,
    pub effects: Vec<Effect>,
}

/// Timing thresholds for heartbeat probing and disconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatPolicy {
    /// Probe interval and idle threshold in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Bounded timeout for one probe request in milliseconds.
    pub probe_timeout_ms: u64,
    /// Cumulative idle time after which the view is considered gone
    /// (measured from the last real action, not from entering `Connecting`).
    pub disconnect_after_ms: u64,
    /// Timeout for general outbound sends; defaults to the heartbeat
    /// interval, distinct from the probe timeout.
    pub send_timeout_ms: u64,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            disconnect_after_ms: DEFAULT_DISCONNECT_AFTER_MS,
            send_timeout_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

/// Disposition of an outbound message given the current view state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// `Connected`: send now with the bounded send timeout.
    Direct,
    /// `Connecting`: append to the cache for ordered replay on recovery.
    Cache,
    /// `Disconnected`: fail immediately — there is no pending reconnection
    /// expectation yet.
    Reject,
}

// ─── Decisions ────────────────────────────────────────────────────

/// Whether the periodic tick should emit a probe: idle time since the last
/// action has reached the heartbeat interval.
#[must_use]
pub fn probe_due(last_action: DateTime<Utc>, now: DateTime<Utc>, policy: &HeartbeatPolicy) -> bool {
    now - last_action >= Duration::milliseconds(policy.heartbeat_interval_ms as i64)
}

/// Route an outbound message by view state.
#[must_use]
pub fn send_disposition(state: ViewState) -> SendDisposition {
    match state {
        ViewState::Connected => SendDisposition::Direct,
        ViewState::Connecting => SendDisposition::Cache,
        ViewState::Disconnected => SendDisposition::Reject,
    }
}

/// Transition the connection state for one liveness event.
///
/// `last_action` is the timestamp of the last real client action; for
/// `ProbeFailed` it decides between retry (`Connecting`) and giving up
/// (`Disconnected`). Effects are only emitted when the state actually
/// changes.
#[must_use]
pub fn transition(
    current: ViewState,
    last_action: DateTime<Utc>,
    event: ConnEvent,
    now: DateTime<Utc>,
    policy: &HeartbeatPolicy,
) -> Transition {
    let next = match event {
        ConnEvent::ActionPerformed => ViewState::Connected,
        ConnEvent::ProbeFailed => {
            if now - last_action >= Duration::milliseconds(policy.disconnect_after_ms as i64) {
                ViewState::Disconnected
            } else {
                ViewState::Connecting
            }
        }
    };

    if next == current {
        return Transition {
            state: current,
            effects: Vec::new(),
        };
    }

    let effects = match next {
        ViewState::Connected => {
            if current == ViewState::Connecting {
                vec![Effect::ReplayCache]
            } else {
                Vec::new()
            }
        }
        ViewState::Connecting => Vec::new(),
        ViewState::Disconnected => vec![
            Effect::FailCache,
            Effect::LogoutBestEffort,
            Effect::CancelHeartbeat,
        ],
    };

    Transition {
        state: next,
        effects,
    }
}

// ─── Tests ────────────────────────────────────────────────────────
