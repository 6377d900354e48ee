//! Session data model: views, users, sessions, and service catalogs.
//!
//! A `Session` is an immutable snapshot — the view list always reflects the
//! authentication collaborator's latest record, and a changed view set
//! produces a new snapshot rather than in-place mutation. Service catalogs
//! carry over between snapshots of the same session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ─── View ─────────────────────────────────────────────────────────

/// Identity of one physical device connection. Compared by identity (`id`);
/// `device_id` recognizes a reconnecting physical device after its prior
/// connection was discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub id: String,
    pub device_class: String,
    pub device_id: String,
}

impl View {
    /// Allocate a fresh view identity for a device.
    pub fn new(device_class: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device_class: device_class.into(),
            device_id: device_id.into(),
        }
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for View {}

impl std::hash::Hash for View {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ─── User ─────────────────────────────────────────────────────────

/// User record as delivered by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Mobile number for the SMS side channel, if the user has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            mobile: None,
        }
    }
}

// ─── Service catalog ──────────────────────────────────────────────

/// One actionable item inside a service catalog, attributed to the backend
/// service that contributed it. Unknown payload fields ride along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceItem {
    pub id: String,
    pub catalog_id: String,
    pub service_id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub payload: BTreeMap<String, Value>,
}

/// Per-session, per-catalog ordered collection of service items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCatalog {
    pub id: String,
    pub items: Vec<ServiceItem>,
}

impl ServiceCatalog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            items: Vec::new(),
        }
    }

    /// Merge items into the catalog: an item with a known id replaces the
    /// existing entry in place, new ids append in order.
    pub fn add_items(&mut self, items: impl IntoIterator<Item = ServiceItem>) {
        for item in items {
            match self.items.iter_mut().find(|existing| existing.id == item.id) {
                Some(existing) => *existing = item,
                None => self.items.push(item),
            }
        }
    }

    /// Drop every item attributed to the given originating service.
    pub fn remove_items_of_service(&mut self, service_id: &str) {
        self.items.retain(|item| item.service_id != service_id);
    }
}

// ─── Session ──────────────────────────────────────────────────────

/// A logical user session: bound user, currently registered views, and the
/// service catalogs accumulated for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user: User,
    pub views: Vec<View>,
    #[serde(default)]
    pub catalogs: BTreeMap<String, ServiceCatalog>,
}

impl Session {
    /// Create a fresh session for a user with one initial view.
    pub fn new(user: User, view: View) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user,
            views: vec![view],
            catalogs: BTreeMap::new(),
        }
    }

    /// New snapshot with a replaced view list; user and catalogs carry over.
    #[must_use]
    pub fn with_views(&self, views: Vec<View>) -> Self {
        Self {
            id: self.id.clone(),
            user: self.user.clone(),
            views,
            catalogs: self.catalogs.clone(),
        }
    }

    /// Catalog by id, created empty on first access.
    pub fn catalog_mut(&mut self, catalog_id: &str) -> &mut ServiceCatalog {
        self.catalogs
            .entry(catalog_id.to_string())
            .or_insert_with(|| ServiceCatalog::new(catalog_id))
    }
}

// ─── Tests ────────────────────────────────────────────────────────
