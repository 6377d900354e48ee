//! Local session snapshots over the identity collaborator.
//!
//! The identity service owns the session-to-view mapping; the store keeps a
//! local snapshot per session id so lookups never block on a remote call.
//! Every mutation goes through the collaborator first and the snapshot is
//! rebuilt from its reply. Service catalogs live only in the snapshot and
//! carry over across view changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use viewgate_core::error::GatewayError;
use viewgate_core::session::{Session, User, View};

use crate::registry::Credentials;
use crate::traits::{AuthService, AuthSession};

pub struct SessionStore {
    auth: Arc<dyn AuthService>,
    sessions: Mutex<BTreeMap<String, Session>>,
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthService>) -> Self {
        Self {
            auth,
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Snapshot of a session by id.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }

    /// Attach a view to the user's session, creating the session first if the
    /// identity service knows none.
    pub async fn register_view(
        &self,
        user: User,
        token: &str,
        view: View,
    ) -> Result<Session, GatewayError> {
        let record = match self.auth.session_for_user(&user.id, token).await? {
            Some(existing) => {
                self.auth
                    .register_view(&existing.id, token, &view)
                    .await?
            }
            None => {
                let created = AuthSession {
                    id: Uuid::new_v4().to_string(),
                    user_id: user.id.clone(),
                    views: vec![view],
                };
                self.auth.store_session(&created, token).await?;
                created
            }
        };
        Ok(self.apply(record, user).await)
    }

    /// Detach a view from a session and refresh the snapshot.
    pub async fn remove_view(
        &self,
        session_id: &str,
        token: &str,
        view_id: &str,
    ) -> Result<Session, GatewayError> {
        let record = self.auth.remove_view(session_id, token, view_id).await?;
        let mut sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(existing) => {
                let next = existing.with_views(record.views);
                sessions.insert(session_id.to_string(), next.clone());
                Ok(next)
            }
            None => Err(GatewayError::NotFound(format!(
                "No session with id {session_id}."
            ))),
        }
    }

    /// Best-effort logout used when a view disconnects with a bound session:
    /// mint a token from the stored credentials and detach the view.
    pub async fn logout_view(
        &self,
        session_id: &str,
        credentials: &Credentials,
        view_id: &str,
    ) -> Result<(), GatewayError> {
        let token = self
            .auth
            .generate_token(&credentials.user_id, &credentials.method)
            .await?;
        self.remove_view(session_id, &token, view_id).await?;
        Ok(())
    }

    /// Mutate a session snapshot in place (catalog updates). Returns the
    /// updated snapshot, or `None` for an unknown session id.
    pub async fn update<R>(
        &self,
        session_id: &str,
        mutate: impl FnOnce(&mut Session) -> R,
    ) -> Option<(Session, R)> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(session_id)?;
        let out = mutate(session);
        Some((session.clone(), out))
    }

    /// Rebuild the snapshot from an identity-service record, preserving
    /// accumulated catalogs when the session already exists locally.
    async fn apply(&self, record: AuthSession, user: User) -> Session {
        let mut sessions = self.sessions.lock().await;
        let next = match sessions.get(&record.id) {
            Some(existing) => existing.with_views(record.views),
            None => Session {
                id: record.id.clone(),
                user,
                views: record.views,
                catalogs: BTreeMap::new(),
            },
        };
        sessions.insert(next.id.clone(), next.clone());
        next
    }
}

// ─── Tests ────────────────────────────────────────────────────────
