//! Wire protocol types shared by the registry and the command router.
//!
//! Displayable bodies and client actions are tagged variants: a `type`
//! discriminant plus case-specific payload, dispatched by matching on the
//! tag. Display payloads travel as JSON values; the typed layer validates
//! the parts the gateway itself interprets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::session::ServiceCatalog;

// ─── Content body ─────────────────────────────────────────────────

/// Body of a displayable: a content package reference that must be resolved
/// against the content-delivery collaborator, or inline HTML forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBody {
    #[serde(rename_all = "camelCase")]
    Package { package_id: String },
    #[serde(rename_all = "camelCase")]
    Html { content: String },
}

impl ContentBody {
    /// Parse the `content` field of a displayable payload.
    pub fn from_payload(payload: &Value, field: &str) -> Result<Self, GatewayError> {
        let body = payload
            .get(field)
            .ok_or_else(|| GatewayError::Validation(format!("Missing content body [{field}].")))?;
        serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::Validation(format!("Invalid content body [{field}]: {e}")))
    }
}

// ─── Client action ────────────────────────────────────────────────

/// Action a device asks the gateway to perform on its behalf
/// (`performAction`). The session id and a fresh auth token are stamped on
/// before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientAction {
    /// HTTP POST to an external endpoint.
    Post { address: String, body: Value },
    /// Publish a domain event on the bus.
    PublishEvent {
        model: String,
        #[serde(default)]
        payload: Value,
    },
    /// Targeted send to a single bus address.
    SendMessage { address: String, body: Value },
}

// ─── Location & activity ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Fix,
    #[serde(other)]
    Other,
}

/// Client-reported location. Only `fix` locations participate in
/// `getLastKnownLocation` merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(rename = "type")]
    pub kind: LocationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: BTreeMap<String, Value>,
}

/// Coarse user activity reported by a view.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Main,
    Side,
    #[default]
    Unknown,
}

impl Activity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Side => "side",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activity {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Self::Main),
            "side" => Ok(Self::Side),
            "unknown" => Ok(Self::Unknown),
            _ => Err(GatewayError::Validation(
                "Invalid activity string [activity], expecting \"main\", \"side\", or \"unknown\"."
                    .into(),
            )),
        }
    }
}

// ─── Notification ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// Notification pushed to views (and optionally the SMS side channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub message: String,
    pub level: Level,
    #[serde(flatten)]
    pub payload: BTreeMap<String, Value>,
}

// ─── Authentication ───────────────────────────────────────────────

/// Credential presented with a `login` command. The method and code are kept
/// on the connection record for later token regeneration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password(String),
    Pin(String),
    Hash(String),
}

// ─── Device-facing commands ───────────────────────────────────────

/// Command received on a view's inbound channel. Every variant counts as a
/// performed action for liveness purposes.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Login { user_id: String, method: AuthMethod },
    Logout,
    PerformAction { action: ClientAction },
    SetLocation { location: Value },
    GetFixLocations,
    SetUserActivity { activity: String },
}

impl ClientCommand {
    /// Parse a command body, dispatching on the `action` tag.
    pub fn from_value(body: &Value) -> Result<Self, GatewayError> {
        let action = body
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Validation("Missing action command.".into()))?;
        match action {
            "login" => {
                let user_id = body
                    .get("userId")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        GatewayError::Validation("Missing user identifier (userId).".into())
                    })?
                    .to_string();
                let method = if let Some(password) = body.get("password").and_then(Value::as_str) {
                    AuthMethod::Password(password.to_string())
                } else if let Some(pin) = body.get("pin").and_then(Value::as_str) {
                    AuthMethod::Pin(pin.to_string())
                } else if let Some(hash) = body.get("hash").and_then(Value::as_str) {
                    AuthMethod::Hash(hash.to_string())
                } else {
                    return Err(GatewayError::Validation(
                        "Invalid authentication method.".into(),
                    ));
                };
                Ok(Self::Login { user_id, method })
            }
            "logout" => Ok(Self::Logout),
            "performAction" => {
                let raw = body.get("actionToPerform").ok_or_else(|| {
                    GatewayError::Validation(
                        "Missing action information (actionToPerform).".into(),
                    )
                })?;
                let action = serde_json::from_value(raw.clone()).map_err(|e| {
                    GatewayError::Validation(format!("Invalid action information: {e}"))
                })?;
                Ok(Self::PerformAction { action })
            }
            "setLocation" => {
                let location = body
                    .get("location")
                    .cloned()
                    .ok_or_else(|| {
                        GatewayError::Validation("Missing location object [location].".into())
                    })?;
                Ok(Self::SetLocation { location })
            }
            "getFixLocations" => Ok(Self::GetFixLocations),
            "setUserActivity" => {
                let activity = body
                    .get("activity")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::Validation("Missing activity string [activity].".into())
                    })?
                    .to_string();
                Ok(Self::SetUserActivity { activity })
            }
            _ => Err(GatewayError::Validation("Unknown action command.".into())),
        }
    }
}

// ─── Server → device messages ─────────────────────────────────────

/// Constructors for the uniform server→device send primitive. Every message
/// expects an `{status: "ok"|"error"}` reply from the device.
pub mod client_message {
    use super::*;

    /// Heartbeat probe.
    pub fn get_status() -> Value {
        json!({"action": "getStatus"})
    }

    pub fn show_notification(notification: &Notification) -> Value {
        json!({"action": "showNotification", "notification": notification})
    }

    pub fn purge_notifications() -> Value {
        json!({"action": "purgeNotifications"})
    }

    pub fn dismiss_notification(notification_id: &str) -> Value {
        json!({"action": "dismissNotification", "notificationId": notification_id})
    }

    pub fn update_catalog(catalog: &ServiceCatalog) -> Value {
        json!({"action": "updateCatalog", "catalog": catalog})
    }

    pub fn display_assistance(assistance: Value) -> Value {
        json!({"action": "displayAssistance", "assistance": assistance})
    }

    pub fn display_learning_object(learning_object: Value) -> Value {
        json!({"action": "displayLearningObject", "learningObject": learning_object})
    }

    pub fn display_site_overview(site_overview: Value) -> Value {
        json!({"action": "displaySiteOverview", "siteOverview": site_overview})
    }

    pub fn display_station_info(station_info: Value) -> Value {
        json!({"action": "displayStationInfo", "stationInfo": station_info})
    }

    pub fn release_view() -> Value {
        json!({"action": "releaseView"})
    }

    pub fn display_popup(popup: Value) -> Value {
        json!({"action": "displayPopup", "popup": popup})
    }
}

// ─── Tests ────────────────────────────────────────────────────────
