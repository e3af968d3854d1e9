//! Identity collaborator
//!
//! Sign-in and session tracking for dashboard users. Only the contract is
//! fixed here; the hosted auth backend lives outside this workspace.
//! `InMemoryIdentity` backs tests and local runs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use mura_core::{MuraError, MuraResult};

/// Auth-state change notifications kept per subscriber
const AUTH_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

/// A signed-in user
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AuthSession {
    #[serde(skip)]
    access_token: String,
    pub user: User,
    pub signed_in_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("user", &self.user)
            .field("signed_in_at", &self.signed_in_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    SignedOut,
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Current session, if someone is signed in
    async fn get_session(&self) -> MuraResult<Option<AuthSession>>;

    /// Notifications for every sign-in and sign-out after this call
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> MuraResult<AuthSession>;

    async fn sign_out(&self) -> MuraResult<()>;

    async fn get_user(&self) -> MuraResult<Option<User>>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

struct Account {
    password: String,
    user: User,
}

pub struct InMemoryIdentity {
    /// email -> account
    accounts: DashMap<String, Account>,
    current: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
    next_token: AtomicU64,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            accounts: DashMap::new(),
            current: RwLock::new(None),
            events,
            next_token: AtomicU64::new(1),
        }
    }

    /// Register an account that can sign in
    pub fn with_account(self, email: &str, password: &str) -> Self {
        let email = email.trim().to_lowercase();
        let user = User {
            id: format!("user-{}", self.accounts.len() + 1),
            email: email.clone(),
        };
        self.accounts.insert(
            email,
            Account {
                password: password.to_string(),
                user,
            },
        );
        self
    }
}

impl Default for InMemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentity {
    async fn get_session(&self) -> MuraResult<Option<AuthSession>> {
        Ok(self.current.read().clone())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> MuraResult<AuthSession> {
        let user = self
            .accounts
            .get(&email.trim().to_lowercase())
            .filter(|account| account.password == password)
            .map(|account| account.user.clone())
            .ok_or_else(|| MuraError::auth("Invalid login credentials"))?;

        let serial = self.next_token.fetch_add(1, Ordering::Relaxed);
        let session = AuthSession {
            access_token: format!("{}-{}", user.id, serial),
            user,
            signed_in_at: Utc::now(),
        };

        info!("[Identity] {} signed in", session.user.email);
        *self.current.write() = Some(session.clone());
        // No subscribers is fine
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> MuraResult<()> {
        if let Some(session) = self.current.write().take() {
            info!("[Identity] {} signed out", session.user.email);
            let _ = self.events.send(AuthEvent::SignedOut);
        }
        Ok(())
    }

    async fn get_user(&self) -> MuraResult<Option<User>> {
        Ok(self.current.read().as_ref().map(|session| session.user.clone()))
    }
}
