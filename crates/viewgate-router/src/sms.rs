//! SMS side channel for session-wide notifications.

use std::sync::Arc;

use tracing::{debug, warn};

use viewgate_core::protocol::{Level, Notification};
use viewgate_core::session::User;

use crate::traits::SmsGateway;

/// Text rendered for the SMS channel: the notification message behind a
/// level tag.
pub fn sms_text(notification: &Notification) -> String {
    let prefix = match notification.level {
        Level::Info => "[Info] ",
        Level::Warning => "[Warnung] ",
        Level::Error => "[Fehler] ",
    };
    format!("{prefix}{}", notification.message)
}

/// Forward a notification to the user's mobile number, if one is on record.
/// The outcome is logged, never surfaced to the requesting service.
pub async fn forward_notification(
    gateway: Arc<dyn SmsGateway>,
    user: User,
    notification: Notification,
) {
    let Some(mobile) = user.mobile.as_deref() else {
        return;
    };
    match gateway.send(mobile, &sms_text(&notification)).await {
        Ok(()) => debug!(user = %user.id, "notification forwarded as SMS"),
        Err(error) => warn!(user = %user.id, %error, "sending SMS notification failed"),
    }
}

// ─── Tests ────────────────────────────────────────────────────────
