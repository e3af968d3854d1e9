//! Feature state machines
//!
//! Every dashboard feature owns a private slice of state that only its
//! reducer mutates. Reducers are pure: they take the current state and one
//! routed envelope and return the next state together with the effects the
//! session must carry out, in order.

pub mod balance;
pub mod history;
pub mod limits;
pub mod markets;
pub mod portfolio;
pub mod trading;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use mura_core::{
    ApiError, Envelope, EnvelopeKind, MuraError, Request, SubscriptionKey, SubscriptionKind,
};

use crate::error_policy::FeatureError;

pub use balance::BalanceState;
pub use history::HistoryState;
pub use limits::LimitsState;
pub use markets::MarketsState;
pub use portfolio::PortfolioState;
pub use trading::{TradeStatus, TradeTicket, TradingState, MAX_TRADING_SYMBOLS};

// ============================================================================
// Feature identity
// ============================================================================

/// The independent features sharing the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Markets,
    Trading,
    Balance,
    /// Open positions (the orders page)
    Portfolio,
    History,
    Limits,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 6] = [
        FeatureKind::Markets,
        FeatureKind::Trading,
        FeatureKind::Balance,
        FeatureKind::Portfolio,
        FeatureKind::History,
        FeatureKind::Limits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Markets => "markets",
            FeatureKind::Trading => "trading",
            FeatureKind::Balance => "balance",
            FeatureKind::Portfolio => "portfolio",
            FeatureKind::History => "history",
            FeatureKind::Limits => "limits",
        }
    }

    /// Envelope kinds this feature's reducer consumes
    pub fn interests(&self) -> &'static [EnvelopeKind] {
        match self {
            FeatureKind::Markets => &[EnvelopeKind::ActiveSymbols, EnvelopeKind::Tick],
            FeatureKind::Trading => &[
                EnvelopeKind::Authorize,
                EnvelopeKind::ActiveSymbols,
                EnvelopeKind::Tick,
                EnvelopeKind::Buy,
            ],
            FeatureKind::Balance => &[EnvelopeKind::Authorize, EnvelopeKind::Balance],
            FeatureKind::Portfolio => &[EnvelopeKind::Authorize, EnvelopeKind::Portfolio],
            FeatureKind::History => &[EnvelopeKind::Authorize, EnvelopeKind::ProfitTable],
            FeatureKind::Limits => &[EnvelopeKind::Authorize, EnvelopeKind::GetLimits],
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKind {
    type Err = MuraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markets" | "market" => Ok(FeatureKind::Markets),
            "trading" | "trade" => Ok(FeatureKind::Trading),
            "balance" | "home" => Ok(FeatureKind::Balance),
            "portfolio" | "orders" => Ok(FeatureKind::Portfolio),
            "history" => Ok(FeatureKind::History),
            "limits" => Ok(FeatureKind::Limits),
            other => Err(MuraError::invalid_request(format!(
                "Unknown feature: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Request-flow phase of a mounted feature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Authorizing,
    Subscribing,
    Ready,
    Error,
}

/// What the user sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ViewState {
    Loading,
    Ready,
    Error { error: FeatureError },
}

/// Phase plus the error that caused the `Error` phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<FeatureError>,
}

impl Status {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn error(&self) -> Option<&FeatureError> {
        self.error.as_ref()
    }

    /// Move to `next`; the error phase is left only through `clear`
    pub(crate) fn enter(&mut self, next: Phase) {
        if self.phase != Phase::Error {
            self.phase = next;
        }
    }

    pub(crate) fn fail(&mut self, error: FeatureError) {
        self.phase = Phase::Error;
        self.error = Some(error);
    }

    pub(crate) fn clear(&mut self) {
        self.phase = Phase::Idle;
        self.error = None;
    }

    pub fn view(&self) -> ViewState {
        match (self.phase, &self.error) {
            (Phase::Ready, _) => ViewState::Ready,
            (Phase::Error, Some(error)) => ViewState::Error {
                error: error.clone(),
            },
            (Phase::Error, None) => ViewState::Error {
                error: FeatureError::new("Unknown", "Unknown error"),
            },
            _ => ViewState::Loading,
        }
    }
}

// ============================================================================
// Reducer contract
// ============================================================================

/// A request-side action produced by a reducer
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Make sure the stream is authorized; the feature then receives an
    /// `authorize` envelope
    Authorize,
    /// Send a one-shot request
    Send(Request),
    /// Hold a subscription through the registry
    Subscribe(SubscriptionKey),
    /// Bulk-cancel a subscription kind through the registry
    ForgetAll(SubscriptionKind),
}

/// Next state plus effects
#[derive(Debug, Clone, PartialEq)]
pub struct Step<S> {
    pub state: S,
    pub effects: Vec<Effect>,
}

impl<S> Step<S> {
    /// A step without effects
    pub fn new(state: S) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }

    pub fn with(state: S, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }

    pub fn map<T>(self, f: impl FnOnce(S) -> T) -> Step<T> {
        Step {
            state: f(self.state),
            effects: self.effects,
        }
    }
}

/// Input to a reducer after routing
#[derive(Debug, Clone, Copy)]
pub enum Routed<'a> {
    /// A data envelope of a kind the feature declared
    Data(&'a Envelope),
    /// A benign error, passed through as confirmation
    Confirmation(&'a ApiError),
    /// A fatal error
    Failure(&'a FeatureError),
}

/// Pure per-feature state machine
pub trait Reducer: Sized {
    const KIND: FeatureKind;

    fn status(&self) -> &Status;

    fn status_mut(&mut self) -> &mut Status;

    /// Begin the request flow; existing data is kept
    fn start(self) -> Step<Self>;

    /// Apply a data envelope; identity for kinds the feature ignores
    fn apply(self, envelope: &Envelope) -> Step<Self>;

    /// Whether a request of this feature is still unanswered
    fn awaiting(&self) -> bool {
        matches!(
            self.status().phase(),
            Phase::Authorizing | Phase::Subscribing
        )
    }

    fn confirm(self, _confirmation: &ApiError) -> Step<Self> {
        Step::new(self)
    }

    fn fail(mut self, error: &FeatureError) -> Step<Self> {
        self.status_mut().fail(error.clone());
        Step::new(self)
    }

    fn reduce(self, routed: Routed<'_>) -> Step<Self> {
        match routed {
            Routed::Data(envelope) => self.apply(envelope),
            Routed::Confirmation(confirmation) => self.confirm(confirmation),
            Routed::Failure(error) => self.fail(error),
        }
    }

    /// Clear the error and start over
    fn retry(mut self) -> Step<Self> {
        self.status_mut().clear();
        self.start()
    }
}

// ============================================================================
// Mounted feature
// ============================================================================

/// Any feature's state
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "feature", rename_all = "lowercase")]
pub enum Feature {
    Markets(MarketsState),
    Trading(TradingState),
    Balance(BalanceState),
    Portfolio(PortfolioState),
    History(HistoryState),
    Limits(LimitsState),
}

macro_rules! each_feature {
    ($feature:expr, $state:ident => $body:expr) => {
        match $feature {
            Feature::Markets($state) => $body,
            Feature::Trading($state) => $body,
            Feature::Balance($state) => $body,
            Feature::Portfolio($state) => $body,
            Feature::History($state) => $body,
            Feature::Limits($state) => $body,
        }
    };
}

macro_rules! step_feature {
    ($feature:expr, $state:ident => $body:expr) => {
        match $feature {
            Feature::Markets($state) => ($body).map(Feature::Markets),
            Feature::Trading($state) => ($body).map(Feature::Trading),
            Feature::Balance($state) => ($body).map(Feature::Balance),
            Feature::Portfolio($state) => ($body).map(Feature::Portfolio),
            Feature::History($state) => ($body).map(Feature::History),
            Feature::Limits($state) => ($body).map(Feature::Limits),
        }
    };
}

impl Feature {
    /// Fresh, idle state for `kind`
    pub fn new(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::Markets => Feature::Markets(MarketsState::default()),
            FeatureKind::Trading => Feature::Trading(TradingState::default()),
            FeatureKind::Balance => Feature::Balance(BalanceState::default()),
            FeatureKind::Portfolio => Feature::Portfolio(PortfolioState::default()),
            FeatureKind::History => Feature::History(HistoryState::default()),
            FeatureKind::Limits => Feature::Limits(LimitsState::default()),
        }
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::Markets(_) => MarketsState::KIND,
            Feature::Trading(_) => TradingState::KIND,
            Feature::Balance(_) => BalanceState::KIND,
            Feature::Portfolio(_) => PortfolioState::KIND,
            Feature::History(_) => HistoryState::KIND,
            Feature::Limits(_) => LimitsState::KIND,
        }
    }

    pub fn status(&self) -> &Status {
        each_feature!(self, state => state.status())
    }

    pub fn phase(&self) -> Phase {
        self.status().phase()
    }

    pub fn view(&self) -> ViewState {
        self.status().view()
    }

    pub fn is_awaiting(&self) -> bool {
        each_feature!(self, state => state.awaiting())
    }

    pub fn start(self) -> Step<Feature> {
        step_feature!(self, state => state.start())
    }

    pub fn retry(self) -> Step<Feature> {
        step_feature!(self, state => state.retry())
    }

    pub fn reduce(self, routed: Routed<'_>) -> Step<Feature> {
        step_feature!(self, state => state.reduce(routed))
    }

    pub fn as_markets(&self) -> Option<&MarketsState> {
        match self {
            Feature::Markets(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_trading(&self) -> Option<&TradingState> {
        match self {
            Feature::Trading(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_balance(&self) -> Option<&BalanceState> {
        match self {
            Feature::Balance(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_portfolio(&self) -> Option<&PortfolioState> {
        match self {
            Feature::Portfolio(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_history(&self) -> Option<&HistoryState> {
        match self {
            Feature::History(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_limits(&self) -> Option<&LimitsState> {
        match self {
            Feature::Limits(state) => Some(state),
            _ => None,
        }
    }
}
