//! Dashboard services for the Mura trading terminal
//!
//! Multiplexes the independent dashboard features over the one shared Deriv
//! connection: subscription bookkeeping, response routing, per-feature state
//! machines and the session loop that applies envelopes in arrival order.

pub mod error_policy;
pub mod features;
pub mod identity;
pub mod router;
pub mod session;
pub mod settings;
pub mod sink;
pub mod subscription;

pub use error_policy::{ErrorPolicy, FeatureError, Verdict};
pub use features::{
    Effect, Feature, FeatureKind, Phase, Reducer, Routed, Status, Step, ViewState,
};
pub use identity::{AuthEvent, AuthSession, IdentityService, InMemoryIdentity, User};
pub use router::{Dispatch, Router};
pub use session::{AuthState, DashboardSnapshot, Session, SessionCommand};
pub use settings::{resolve_api_token, BotStatus, InMemorySettings, Settings, SettingsStore};
pub use sink::RequestSink;
pub use subscription::SubscriptionRegistry;
