//! Per-user bot settings
//!
//! Stored remotely in a `settings` table keyed by user id. The dashboard reads
//! its API token from here, so a first load creates a default row.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use mura_core::{ApiToken, MuraError, MuraResult};

use crate::identity::IdentityService;

pub const DEFAULT_APP_NAME: &str = "MuraBot";
pub const DEFAULT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotStatus::Active => write!(f, "active"),
            BotStatus::Inactive => write!(f, "inactive"),
            BotStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

impl FromStr for BotStatus {
    type Err = MuraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(BotStatus::Active),
            "inactive" => Ok(BotStatus::Inactive),
            "maintenance" => Ok(BotStatus::Maintenance),
            other => Err(MuraError::invalid_request(format!(
                "Unknown status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub api_token: ApiToken,
    pub app_name: String,
    pub version: String,
    pub status: BotStatus,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_token: ApiToken::new(""),
            app_name: DEFAULT_APP_NAME.to_string(),
            version: DEFAULT_VERSION.to_string(),
            status: BotStatus::Active,
        }
    }
}

impl Settings {
    /// Token to authorize with, if one is configured
    pub fn token(&self) -> Option<&ApiToken> {
        (!self.api_token.is_empty()).then_some(&self.api_token)
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn select(&self, user_id: &str) -> MuraResult<Option<Settings>>;

    /// Fails when the user already has settings
    async fn insert(&self, user_id: &str, settings: Settings) -> MuraResult<()>;

    async fn upsert(&self, user_id: &str, settings: Settings) -> MuraResult<()>;

    /// Stored settings, or the defaults after storing them
    async fn load_or_init(&self, user_id: &str) -> MuraResult<Settings> {
        if let Some(settings) = self.select(user_id).await? {
            return Ok(settings);
        }

        info!("[Settings] No settings for {}, creating defaults", user_id);
        let settings = Settings::default();
        self.insert(user_id, settings.clone()).await?;
        Ok(settings)
    }
}

/// API token for the dashboard stream
///
/// The signed-in user's stored token wins. Otherwise `fallback` is used and,
/// when someone is signed in, saved to their settings. Nobody signed in means
/// `fallback` as is.
pub async fn resolve_api_token(
    identity: &dyn IdentityService,
    store: &dyn SettingsStore,
    fallback: Option<ApiToken>,
) -> MuraResult<Option<ApiToken>> {
    let Some(user) = identity.get_user().await? else {
        return Ok(fallback);
    };

    let settings = store.load_or_init(&user.id).await?;
    if let Some(token) = settings.token() {
        info!("[Settings] Using the API token stored for {}", user.email);
        return Ok(Some(token.clone()));
    }

    match fallback {
        Some(token) => {
            info!("[Settings] Saving the configured API token for {}", user.email);
            store
                .upsert(
                    &user.id,
                    Settings {
                        api_token: token.clone(),
                        ..settings
                    },
                )
                .await?;
            Ok(Some(token))
        }
        None => Ok(None),
    }
}

/// `DashMap`-backed store
#[derive(Debug, Default)]
pub struct InMemorySettings {
    rows: DashMap<String, Settings>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettings {
    async fn select(&self, user_id: &str) -> MuraResult<Option<Settings>> {
        Ok(self.rows.get(user_id).map(|row| row.clone()))
    }

    async fn insert(&self, user_id: &str, settings: Settings) -> MuraResult<()> {
        match self.rows.entry(user_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(MuraError::invalid_request(format!(
                "Settings for {} already exist",
                user_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(settings);
                Ok(())
            }
        }
    }

    async fn upsert(&self, user_id: &str, settings: Settings) -> MuraResult<()> {
        self.rows.insert(user_id.to_string(), settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentity;
    use tokio_test::{assert_err, assert_ok};

    async fn signed_in() -> (InMemoryIdentity, String) {
        let identity = InMemoryIdentity::new().with_account("trader@example.com", "hunter22");
        let session = identity
            .sign_in_with_password("trader@example.com", "hunter22")
            .await
            .unwrap();
        (identity, session.user.id)
    }

    #[tokio::test]
    async fn test_token_without_sign_in_is_the_fallback() {
        let identity = InMemoryIdentity::new();
        let store = InMemorySettings::new();
        let token = resolve_api_token(&identity, &store, Some(ApiToken::new("env-token")))
            .await
            .unwrap();
        assert_eq!(token.unwrap().expose(), "env-token");
        assert!(resolve_api_token(&identity, &store, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stored_token_wins() {
        let (identity, user_id) = signed_in().await;
        let store = InMemorySettings::new();
        let stored = Settings {
            api_token: ApiToken::new("stored-token"),
            ..Settings::default()
        };
        assert_ok!(store.insert(&user_id, stored).await);

        let token = resolve_api_token(&identity, &store, Some(ApiToken::new("env-token")))
            .await
            .unwrap();
        assert_eq!(token.unwrap().expose(), "stored-token");
    }

    #[tokio::test]
    async fn test_fallback_token_is_saved_for_the_user() {
        let (identity, user_id) = signed_in().await;
        let store = InMemorySettings::new();

        assert!(resolve_api_token(&identity, &store, None).await.unwrap().is_none());
        // First load created the defaults
        assert_eq!(store.select(&user_id).await.unwrap(), Some(Settings::default()));

        let token = resolve_api_token(&identity, &store, Some(ApiToken::new("env-token")))
            .await
            .unwrap();
        assert_eq!(token.unwrap().expose(), "env-token");
        let saved = store.select(&user_id).await.unwrap().unwrap();
        assert_eq!(saved.token().unwrap().expose(), "env-token");
        assert_eq!(saved.app_name, DEFAULT_APP_NAME);
    }

    #[tokio::test]
    async fn test_first_load_creates_defaults() {
        let store = InMemorySettings::new();
        let settings = store.load_or_init("user-1").await.unwrap();
        assert_eq!(settings.app_name, "MuraBot");
        assert_eq!(settings.version, "1.0.0");
        assert_eq!(settings.status, BotStatus::Active);
        assert!(settings.token().is_none());
        assert_eq!(store.select("user-1").await.unwrap(), Some(settings));
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = InMemorySettings::new();
        store.load_or_init("user-1").await.unwrap();

        let updated = Settings {
            api_token: ApiToken::new("abc123"),
            status: "maintenance".parse().unwrap(),
            ..Settings::default()
        };
        assert_ok!(store.upsert("user-1", updated.clone()).await);

        let loaded = store.load_or_init("user-1").await.unwrap();
        assert_eq!(loaded, updated);
        assert_eq!(loaded.token().unwrap().expose(), "abc123");
    }

    #[tokio::test]
    async fn test_insert_twice_fails() {
        let store = InMemorySettings::new();
        assert_ok!(store.insert("user-1", Settings::default()).await);
        assert_err!(store.insert("user-1", Settings::default()).await);
        assert!(store.select("user-2").await.unwrap().is_none());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&BotStatus::Maintenance).unwrap(),
            "\"maintenance\""
        );
        assert!("paused".parse::<BotStatus>().is_err());
    }
}
