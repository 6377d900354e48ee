//! Backend-facing command router.
//!
//! Services address the gateway with `{action, sessionId, ...}` requests.
//! Every handler validates the session, then either targets a single view
//! (`viewId` present) or fans out to all views of the session, collecting
//! completions with the fail-fast aggregator. The aggregate outcome becomes
//! the bus reply: ok after the last view succeeds, the first failure's cause
//! otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::task::JoinSet;
use tracing::warn;

use viewgate_core::error::{GatewayError, ok_response};
use viewgate_core::outcome::AllOrAbort;
use viewgate_core::protocol::{Activity, ContentBody, Location, Notification, client_message};
use viewgate_core::session::{ServiceCatalog, ServiceItem, Session};
use viewgate_registry::registry::Registry;
use viewgate_registry::sessions::SessionStore;

use crate::content;
use crate::sms;
use crate::traits::{ContentSource, SmsGateway};

pub struct Router {
    registry: Arc<Registry>,
    sessions: Arc<SessionStore>,
    content: Arc<dyn ContentSource>,
    /// SMS forwarding for session-wide notifications; `None` disables it.
    sms: Option<Arc<dyn SmsGateway>>,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        sessions: Arc<SessionStore>,
        content: Arc<dyn ContentSource>,
        sms: Option<Arc<dyn SmsGateway>>,
    ) -> Self {
        Self {
            registry,
            sessions,
            content,
            sms,
        }
    }

    /// Handle one service request and produce the reply envelope.
    pub async fn handle(&self, body: &Value) -> Value {
        let Some(action) = body.get("action").and_then(Value::as_str) else {
            return GatewayError::Validation("Missing action command.".into()).to_envelope();
        };
        let result = match action {
            "addServiceItems" => self.add_service_items(body).await,
            "purgeServiceItems" => self.purge_service_items(body).await,
            "notify" => self.notify(body).await,
            "dismissNotification" => self.dismiss_notification(body).await,
            "purgeNotifications" => self.purge_notifications(body).await,
            "displayAssistance" => self.display_assistance(body).await,
            "displayLearningContent" => self.display_learning_content(body).await,
            "displaySiteOverview" => self.display_site_overview(body).await,
            "displayStationInfo" => self.display_station_info(body).await,
            "endDisplay" => self.end_display(body).await,
            "displayPopup" => self.display_popup(body).await,
            "getLastKnownLocation" => self.get_last_known_location(body).await,
            "getUserActivity" => self.get_user_activity(body).await,
            other => {
                warn!(action = other, "received invalid action command");
                Err(GatewayError::Validation("Invalid action command.".into()))
            }
        };
        result.unwrap_or_else(|error| error.to_envelope())
    }

    // ─── Validation helpers ───────────────────────────────────────

    async fn session(&self, body: &Value) -> Result<Session, GatewayError> {
        let session = match body.get("sessionId").and_then(Value::as_str) {
            Some(id) => self.sessions.get(id).await,
            None => None,
        };
        session.ok_or_else(|| {
            GatewayError::Validation("Missing or wrong session information (sessionId).".into())
        })
    }

    fn service_id(body: &Value) -> Result<String, GatewayError> {
        body.get("serviceId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| GatewayError::Validation("Missing service id (serviceId).".into()))
    }

    /// Route a display message: to one view when `viewId` is given, to every
    /// view of the session otherwise.
    async fn deliver(
        &self,
        body: &Value,
        session_id: &str,
        message: Value,
    ) -> Result<(), GatewayError> {
        match body.get("viewId").and_then(Value::as_str) {
            Some(view_id) => {
                if self
                    .registry
                    .view_in_session(session_id, view_id)
                    .await
                    .is_none()
                {
                    return Err(GatewayError::NotFound("View not found.".into()));
                }
                self.registry.send_to_view(view_id, message).await
            }
            None => broadcast(Arc::clone(&self.registry), session_id, message).await,
        }
    }

    // ─── Service catalogs ─────────────────────────────────────────

    async fn add_service_items(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        let raw_items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::Validation("Missing items to add (items).".into()))?;
        let mut items = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            let item: ServiceItem = serde_json::from_value(raw.clone())
                .map_err(|e| GatewayError::Validation(format!("Invalid item: {e}")))?;
            items.push(item);
        }

        let mut by_catalog: BTreeMap<String, Vec<ServiceItem>> = BTreeMap::new();
        for item in items {
            by_catalog
                .entry(item.catalog_id.clone())
                .or_default()
                .push(item);
        }

        // Every catalog mutation is applied before any fan-out starts: a
        // failed broadcast must not leave sibling catalogs unmerged, and
        // mutations are never rolled back.
        let mut catalogs = Vec::with_capacity(by_catalog.len());
        for (catalog_id, items) in by_catalog {
            let (_, catalog) = self
                .sessions
                .update(&session.id, |session| {
                    let catalog = session.catalog_mut(&catalog_id);
                    catalog.add_items(items);
                    catalog.clone()
                })
                .await
                .ok_or_else(|| {
                    GatewayError::Validation(
                        "Missing or wrong session information (sessionId).".into(),
                    )
                })?;
            catalogs.push((catalog_id, catalog));
        }

        self.fan_out_catalogs(&session.id, catalogs).await?;
        Ok(ok_response())
    }

    async fn purge_service_items(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        let service_id = Self::service_id(body)?;

        let mut catalogs = Vec::new();
        for catalog_id in session.catalogs.keys() {
            let updated = self
                .sessions
                .update(&session.id, |session| {
                    session.catalogs.get_mut(catalog_id).map(|catalog| {
                        catalog.remove_items_of_service(&service_id);
                        catalog.clone()
                    })
                })
                .await;
            if let Some((_, Some(catalog))) = updated {
                catalogs.push((catalog_id.clone(), catalog));
            }
        }

        self.fan_out_catalogs(&session.id, catalogs).await?;
        Ok(ok_response())
    }

    /// Two-level fan-out: outer aggregation keyed by catalog id, inner
    /// per-catalog broadcast of `updateCatalog` over the session's views.
    async fn fan_out_catalogs(
        &self,
        session_id: &str,
        catalogs: Vec<(String, ServiceCatalog)>,
    ) -> Result<(), GatewayError> {
        let mut outer = AllOrAbort::new(catalogs.iter().map(|(id, _)| id.clone()));
        if let Some(outcome) = outer.complete_empty() {
            return outcome;
        }
        let mut updates = JoinSet::new();
        for (catalog_id, catalog) in catalogs {
            let registry = Arc::clone(&self.registry);
            let session_id = session_id.to_string();
            updates.spawn(async move {
                let result = broadcast(
                    registry,
                    &session_id,
                    client_message::update_catalog(&catalog),
                )
                .await;
                (catalog_id, result)
            });
        }
        while let Some(joined) = updates.join_next().await {
            if let Ok((catalog_id, result)) = joined {
                if let Some(outcome) = outer.complete(&catalog_id, result) {
                    updates.detach_all();
                    return outcome;
                }
            }
        }
        Err(GatewayError::operation("Operation failed by unknown reason."))
    }

    // ─── Notifications ────────────────────────────────────────────

    async fn notify(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        let raw = body.get("notification").ok_or_else(|| {
            GatewayError::Validation("Missing notification field (notification).".into())
        })?;
        let notification: Notification = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::Validation(format!("Invalid notification: {e}")))?;

        match body.get("viewId").and_then(Value::as_str) {
            Some(view_id) => {
                if self
                    .registry
                    .view_in_session(&session.id, view_id)
                    .await
                    .is_none()
                {
                    return Err(GatewayError::NotFound("View not found.".into()));
                }
                self.registry
                    .send_to_view(view_id, client_message::show_notification(&notification))
                    .await?;
            }
            None => {
                // The SMS side channel is independent of the view fan-out
                // outcome.
                if let Some(sms) = &self.sms {
                    tokio::spawn(sms::forward_notification(
                        Arc::clone(sms),
                        session.user.clone(),
                        notification.clone(),
                    ));
                }
                broadcast(
                    Arc::clone(&self.registry),
                    &session.id,
                    client_message::show_notification(&notification),
                )
                .await?;
            }
        }
        Ok(ok_response())
    }

    async fn dismiss_notification(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        let notification_id = body
            .get("notificationId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::Validation("Missing notification identifier (notificationId).".into())
            })?;
        broadcast(
            Arc::clone(&self.registry),
            &session.id,
            client_message::dismiss_notification(notification_id),
        )
        .await?;
        Ok(ok_response())
    }

    async fn purge_notifications(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        broadcast(
            Arc::clone(&self.registry),
            &session.id,
            client_message::purge_notifications(),
        )
        .await?;
        Ok(ok_response())
    }

    // ─── Displayables ─────────────────────────────────────────────

    async fn display_assistance(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        Self::service_id(body)?;
        let step = body.get("assistance").cloned().ok_or_else(|| {
            GatewayError::Validation("Missing assistance step information (assistance).".into())
        })?;
        let content = ContentBody::from_payload(&step, "content")
            .map_err(|e| GatewayError::Validation(format!("Invalid assistance information: {e}")))?;
        let resolved = match content {
            ContentBody::Package { package_id } => {
                content::resolve_assistance(self.content.as_ref(), step, &package_id).await?
            }
            ContentBody::Html { .. } => step,
        };
        self.deliver(body, &session.id, client_message::display_assistance(resolved))
            .await?;
        Ok(ok_response())
    }

    async fn display_learning_content(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        Self::service_id(body)?;
        let learning_object = body.get("learningObject").cloned().ok_or_else(|| {
            GatewayError::Validation("Missing learning object to display (learningObject).".into())
        })?;
        let resolved =
            content::resolve_learning_object(Arc::clone(&self.content), learning_object).await?;
        self.deliver(
            body,
            &session.id,
            client_message::display_learning_object(resolved),
        )
        .await?;
        Ok(ok_response())
    }

    async fn display_site_overview(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        Self::service_id(body)?;
        let site_overview = body.get("siteOverview").cloned().ok_or_else(|| {
            GatewayError::Validation("Missing site overview to display (siteOverview).".into())
        })?;
        self.deliver(
            body,
            &session.id,
            client_message::display_site_overview(site_overview),
        )
        .await?;
        Ok(ok_response())
    }

    async fn display_station_info(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        Self::service_id(body)?;
        let station_info = body.get("stationInfo").cloned().ok_or_else(|| {
            GatewayError::Validation("Missing station info to display (stationInfo).".into())
        })?;
        self.deliver(
            body,
            &session.id,
            client_message::display_station_info(station_info),
        )
        .await?;
        Ok(ok_response())
    }

    async fn end_display(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        self.deliver(body, &session.id, client_message::release_view())
            .await?;
        Ok(ok_response())
    }

    async fn display_popup(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        Self::service_id(body)?;
        let popup = body
            .get("popup")
            .cloned()
            .ok_or_else(|| GatewayError::Validation("Missing popup to display (popup).".into()))?;
        let content = ContentBody::from_payload(&popup, "content")
            .map_err(|e| GatewayError::Validation(format!("Invalid popup object: {e}")))?;
        let resolved = match content {
            ContentBody::Package { package_id } => {
                content::resolve_popup(self.content.as_ref(), popup, &package_id).await?
            }
            ContentBody::Html { .. } => popup,
        };
        self.deliver(body, &session.id, client_message::display_popup(resolved))
            .await?;
        Ok(ok_response())
    }

    // ─── Presence queries ─────────────────────────────────────────

    async fn get_last_known_location(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        let mut best: Option<Location> = None;
        for location in self.registry.fix_locations_for_session(&session.id).await {
            let Some(update) = location.last_update else {
                continue;
            };
            // Strictly newer wins; on a tie the earlier-registered view's
            // fix is kept.
            let newer = match &best {
                Some(current) => current.last_update.is_some_and(|b| update > b),
                None => true,
            };
            if newer {
                best = Some(location);
            }
        }
        Ok(match best {
            Some(location) => json!({"status": "ok", "location": location}),
            None => ok_response(),
        })
    }

    async fn get_user_activity(&self, body: &Value) -> Result<Value, GatewayError> {
        let session = self.session(body).await?;
        let mut activity = Activity::Unknown;
        for candidate in self.registry.activities_for_session(&session.id).await {
            if candidate != Activity::Unknown {
                activity = candidate;
            }
        }
        Ok(json!({"status": "ok", "activity": activity.as_str()}))
    }
}

/// Fan a message out to every view of a session, fail-fast. The reply fires
/// on the last success or the first failure; once it fired, remaining sends
/// keep running detached and their completions are discarded.
async fn broadcast(
    registry: Arc<Registry>,
    session_id: &str,
    message: Value,
) -> Result<(), GatewayError> {
    let views = registry.views_for_session(session_id).await;
    let mut aggregation = AllOrAbort::new(views.iter().map(|view| view.id.clone()));
    if let Some(outcome) = aggregation.complete_empty() {
        return outcome;
    }
    let mut sends = JoinSet::new();
    for view in views {
        let registry = Arc::clone(&registry);
        let message = message.clone();
        sends.spawn(async move {
            let result = registry.send_to_view(&view.id, message).await;
            (view.id, result)
        });
    }
    while let Some(joined) = sends.join_next().await {
        if let Ok((view_id, result)) = joined {
            if let Some(outcome) = aggregation.complete(&view_id, result) {
                sends.detach_all();
                return outcome;
            }
        }
    }
    Err(GatewayError::operation("Operation failed by unknown reason."))
}

// ─── Tests ────────────────────────────────────────────────────────
