//! Dashboard session
//!
//! The single apply loop over the shared connection. It owns the router,
//! the subscription registry, the mounted features and the stream's
//! authorization state. Envelopes and UI commands are applied one at a time,
//! in arrival order, on one task; after each one a snapshot of the whole
//! dashboard is published on a watch channel.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use mura_core::{
    decode, AccountInfo, ApiToken, ContractType, Envelope, EnvelopeKind, MuraError, MuraResult,
    Request, SubscriptionKey,
};
use mura_deriv::{ConnectionEvent, ConnectionState};

use crate::error_policy::{ErrorPolicy, FeatureError};
use crate::features::{Effect, Feature, FeatureKind, Routed, Step};
use crate::router::{Dispatch, Router};
use crate::sink::RequestSink;
use crate::subscription::SubscriptionRegistry;

// ============================================================================
// Session state
// ============================================================================

/// Authorization of the shared stream
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "account", rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Unauthorized,
    /// `authorize` sent, no answer yet
    Pending,
    Authorized(AccountInfo),
}

impl AuthState {
    pub fn account(&self) -> Option<&AccountInfo> {
        match self {
            AuthState::Authorized(account) => Some(account),
            _ => None,
        }
    }
}

/// UI commands applied by the session loop
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Mount(FeatureKind),
    Unmount(FeatureKind),
    Retry(FeatureKind),
    /// Live quote on the markets page
    SelectMarket(String),
    /// Symbol to trade on the trading page
    SelectTradingSymbol(String),
    PlaceTrade {
        contract_type: ContractType,
        amount: Decimal,
        duration: u32,
    },
    Shutdown,
}

/// Everything the UI renders, published after each applied event
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub connection: ConnectionState,
    pub auth: AuthState,
    pub subscriptions: Vec<SubscriptionKey>,
    pub features: Vec<Feature>,
}

impl DashboardSnapshot {
    pub fn feature(&self, kind: FeatureKind) -> Option<&Feature> {
        self.features.iter().find(|feature| feature.kind() == kind)
    }
}

impl Default for DashboardSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Closed,
            auth: AuthState::Unauthorized,
            subscriptions: Vec::new(),
            features: Vec::new(),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    sink: Arc<dyn RequestSink>,
    token: Option<ApiToken>,
    auth: AuthState,
    registry: SubscriptionRegistry,
    router: Router,
    /// Mounted features in mount order
    features: IndexMap<FeatureKind, Feature>,
    connection: ConnectionState,
    /// Between an `Open` and the next `Closed`
    connected: bool,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
}

impl Session {
    pub fn new(sink: Arc<dyn RequestSink>, token: Option<ApiToken>) -> Self {
        Self::with_policy(sink, token, ErrorPolicy::default())
    }

    pub fn with_policy(
        sink: Arc<dyn RequestSink>,
        token: Option<ApiToken>,
        policy: ErrorPolicy,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(DashboardSnapshot::default());
        Self {
            sink,
            token: token.filter(|token| !token.is_empty()),
            auth: AuthState::Unauthorized,
            registry: SubscriptionRegistry::new(),
            router: Router::new(policy),
            features: IndexMap::new(),
            connection: ConnectionState::Closed,
            connected: false,
            snapshot_tx,
        }
    }

    /// Watch dashboard snapshots
    pub fn snapshots(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            connection: self.connection,
            auth: self.auth.clone(),
            subscriptions: self.registry.active().cloned().collect(),
            features: self.features.values().cloned().collect(),
        }
    }

    pub fn feature(&self, kind: FeatureKind) -> Option<&Feature> {
        self.features.get(&kind)
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Mount a feature and start its request flow; mounting twice is a no-op
    pub async fn mount(&mut self, kind: FeatureKind) -> MuraResult<()> {
        if self.features.contains_key(&kind) {
            debug!("[Session] {} already mounted", kind);
            return Ok(());
        }

        info!("[Session] Mounting {}", kind);
        self.router.declare(kind);
        self.features.insert(kind, Feature::new(kind));
        let effects = self.transition(kind, Feature::start)?;
        self.run_effects(kind, effects).await
    }

    /// Unmount a feature, cancelling subscriptions nobody else holds
    pub async fn unmount(&mut self, kind: FeatureKind) -> MuraResult<()> {
        if self.features.shift_remove(&kind).is_none() {
            return Err(MuraError::not_found(format!("{} is not mounted", kind)));
        }

        info!("[Session] Unmounting {}", kind);
        self.router.withdraw(kind);
        for request in self.registry.release(kind) {
            self.send(request).await?;
        }
        Ok(())
    }

    /// Clear a feature's error and restart its request flow
    pub async fn retry(&mut self, kind: FeatureKind) -> MuraResult<()> {
        info!("[Session] Retrying {}", kind);
        let effects = self.transition(kind, Feature::retry)?;
        self.run_effects(kind, effects).await
    }

    pub async fn select_market(&mut self, symbol: &str) -> MuraResult<()> {
        let effects = self.transition(FeatureKind::Markets, |feature| match feature {
            Feature::Markets(state) => state.select(symbol).map(Feature::Markets),
            other => Step::new(other),
        })?;
        self.run_effects(FeatureKind::Markets, effects).await
    }

    pub async fn select_trading_symbol(&mut self, symbol: &str) -> MuraResult<()> {
        let effects = self.transition(FeatureKind::Trading, |feature| match feature {
            Feature::Trading(state) => state.select(symbol).map(Feature::Trading),
            other => Step::new(other),
        })?;
        self.run_effects(FeatureKind::Trading, effects).await
    }

    /// Place a trade on the selected symbol
    ///
    /// Rejected while another trade is in flight.
    pub async fn place_trade(
        &mut self,
        contract_type: ContractType,
        amount: Decimal,
        duration: u32,
    ) -> MuraResult<()> {
        let ticket = self
            .features
            .get(&FeatureKind::Trading)
            .and_then(Feature::as_trading)
            .ok_or_else(|| MuraError::not_found("trading is not mounted"))?
            .ticket(contract_type, amount, duration)?;

        let effects = self.transition(FeatureKind::Trading, |feature| match feature {
            Feature::Trading(state) => state.place(ticket).map(Feature::Trading),
            other => Step::new(other),
        })?;
        self.run_effects(FeatureKind::Trading, effects).await
    }

    /// Apply one command; `Shutdown` is handled by the loop
    pub async fn execute(&mut self, command: SessionCommand) -> MuraResult<()> {
        match command {
            SessionCommand::Mount(kind) => self.mount(kind).await,
            SessionCommand::Unmount(kind) => self.unmount(kind).await,
            SessionCommand::Retry(kind) => self.retry(kind).await,
            SessionCommand::SelectMarket(symbol) => self.select_market(&symbol).await,
            SessionCommand::SelectTradingSymbol(symbol) => {
                self.select_trading_symbol(&symbol).await
            }
            SessionCommand::PlaceTrade {
                contract_type,
                amount,
                duration,
            } => self.place_trade(contract_type, amount, duration).await,
            SessionCommand::Shutdown => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    pub async fn handle_event(&mut self, event: ConnectionEvent) -> MuraResult<()> {
        match event {
            ConnectionEvent::Frame(frame) => self.handle_frame(&frame).await,
            ConnectionEvent::State(state) => self.handle_state(state).await,
        }
    }

    /// Decode and apply one text frame; undecodable frames are logged and dropped
    pub async fn handle_frame(&mut self, frame: &str) -> MuraResult<()> {
        match decode(frame) {
            Ok(envelope) => self.apply(&envelope).await,
            Err(e) => {
                warn!("[Session] Dropping undecodable frame: {}", e);
                Ok(())
            }
        }
    }

    /// Route one envelope and run every resulting effect
    pub async fn apply(&mut self, envelope: &Envelope) -> MuraResult<()> {
        self.registry.observe(envelope);
        if let Envelope::Authorize(account) = envelope {
            info!("[Session] Authorized as {}", account.loginid);
            self.auth = AuthState::Authorized(account.clone());
        }

        match self.router.route(envelope) {
            Dispatch::Deliver { kind, targets } => {
                if targets.is_empty() {
                    debug!("[Session] No mounted feature wants {}", kind);
                }
                for target in targets {
                    let effects = self.reduce(target, Routed::Data(envelope));
                    self.run_effects(target, effects).await?;
                }
            }
            Dispatch::Confirm { error, targets } => {
                debug!("[Session] Benign error {}", error);
                for target in targets {
                    let effects = self.reduce(target, Routed::Confirmation(&error));
                    self.run_effects(target, effects).await?;
                }
            }
            Dispatch::Fail {
                error,
                reset_auth,
                targets,
            } => {
                warn!("[Session] Server error {}", error);
                // The error may be the answer to our pending `authorize`
                if reset_auth || self.auth == AuthState::Pending {
                    self.auth = AuthState::Unauthorized;
                }
                let waiting: Vec<FeatureKind> = targets
                    .into_iter()
                    .filter(|target| self.features.get(target).is_some_and(Feature::is_awaiting))
                    .collect();
                if waiting.is_empty() {
                    debug!("[Session] No feature is waiting on the failed request");
                }
                self.fail_all(&waiting, &error);
            }
            Dispatch::Acknowledge => debug!("[Session] forget_all acknowledged"),
            Dispatch::Heartbeat => debug!("[Session] Heartbeat"),
            Dispatch::Drop => {}
        }
        Ok(())
    }

    async fn handle_state(&mut self, state: ConnectionState) -> MuraResult<()> {
        self.connection = state;
        match state {
            ConnectionState::Open => {
                self.connected = true;
                Ok(())
            }
            ConnectionState::Closed if self.connected => {
                self.connected = false;
                self.restart().await
            }
            ConnectionState::Error => {
                self.connected = false;
                warn!("[Session] Connection gave up reconnecting");
                let targets: Vec<FeatureKind> = self.features.keys().copied().collect();
                self.fail_all(&targets, &FeatureError::connection_lost());
                Ok(())
            }
            ConnectionState::Connecting | ConnectionState::Closed => Ok(()),
        }
    }

    // The next socket carries no subscriptions and no authorization. Requests
    // made from here on are queued until it opens, `authorize` first.
    async fn restart(&mut self) -> MuraResult<()> {
        info!("[Session] Connection lost, restarting mounted features");
        self.registry.reset();
        self.auth = AuthState::Unauthorized;

        let restart: Vec<FeatureKind> = self
            .features
            .iter()
            .filter(|(_, feature)| feature.status().error().is_none())
            .map(|(kind, _)| *kind)
            .collect();
        for kind in restart {
            let effects = self.transition(kind, Feature::start)?;
            self.run_effects(kind, effects).await?;
        }
        Ok(())
    }

    fn fail_all(&mut self, targets: &[FeatureKind], error: &FeatureError) {
        for target in targets {
            // Failures produce no effects
            self.reduce(*target, Routed::Failure(error));
        }
    }

    // ------------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------------

    fn transition(
        &mut self,
        kind: FeatureKind,
        f: impl FnOnce(Feature) -> Step<Feature>,
    ) -> MuraResult<Vec<Effect>> {
        let slot = self
            .features
            .get_mut(&kind)
            .ok_or_else(|| MuraError::not_found(format!("{} is not mounted", kind)))?;
        let feature = std::mem::replace(slot, Feature::new(kind));
        let step = f(feature);
        *slot = step.state;
        Ok(step.effects)
    }

    fn reduce(&mut self, kind: FeatureKind, routed: Routed<'_>) -> Vec<Effect> {
        self.transition(kind, |feature| feature.reduce(routed))
            .unwrap_or_default()
    }

    /// Carry out effects in order; effects produced along the way run before
    /// the remaining ones
    async fn run_effects(&mut self, owner: FeatureKind, effects: Vec<Effect>) -> MuraResult<()> {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Authorize => {
                    let nested = self.authorize(owner).await?;
                    for effect in nested.into_iter().rev() {
                        queue.push_front(effect);
                    }
                }
                Effect::Send(request) => self.send(request).await?,
                Effect::Subscribe(key) => {
                    if let Some(request) = self.registry.subscribe(owner, key) {
                        self.send(request).await?;
                    }
                }
                Effect::ForgetAll(kind) => {
                    for request in self.registry.unsubscribe_all(kind, owner) {
                        self.send(request).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Authorization is shared: one `authorize` per stream, reused by every
    /// feature mounted after it succeeded
    async fn authorize(&mut self, owner: FeatureKind) -> MuraResult<Vec<Effect>> {
        let needs_account = owner.interests().contains(&EnvelopeKind::Authorize);

        if let Some(account) = self.auth.account().cloned() {
            if !needs_account {
                return Ok(Vec::new());
            }
            debug!("[Session] Reusing authorization for {}", owner);
            let envelope = Envelope::Authorize(account);
            return Ok(self.reduce(owner, Routed::Data(&envelope)));
        }
        if self.auth == AuthState::Pending {
            return Ok(Vec::new());
        }

        match self.token.clone() {
            Some(token) => {
                self.auth = AuthState::Pending;
                self.send(Request::authorize(token)).await?;
                Ok(Vec::new())
            }
            // Public data only
            None if !needs_account => Ok(Vec::new()),
            None => {
                warn!("[Session] {} needs authorization but no API token is set", owner);
                let error = FeatureError::authorization_required();
                Ok(self.reduce(owner, Routed::Failure(&error)))
            }
        }
    }

    async fn send(&self, request: Request) -> MuraResult<()> {
        debug!("[Session] -> {}", request.op());
        self.sink.send(request).await
    }

    // ------------------------------------------------------------------------
    // Loop
    // ------------------------------------------------------------------------

    /// Apply connection events and UI commands until shutdown
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<ConnectionEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        info!("[Session] Running");
        self.publish();

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Err(e) = self.handle_event(event).await {
                                warn!("[Session] Failed to apply event: {}", e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("[Session] Lagged behind the connection, {} events lost", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("[Session] Connection event stream closed");
                            break;
                        }
                    }
                }

                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => {
                            info!("[Session] Shutting down");
                            break;
                        }
                        Some(command) => {
                            if let Err(e) = self.execute(command).await {
                                warn!("[Session] Command failed: {}", e);
                            }
                        }
                    }
                }
            }

            self.publish();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .field("auth", &self.auth)
            .field("registry", &self.registry)
            .field("features", &self.features.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{
        MarketsState, Phase, Reducer, TradeStatus, ViewState, MAX_TRADING_SYMBOLS,
    };
    use crate::sink::RecordingSink;
    use mura_core::{SubscriptionKind, SymbolDetail, ALREADY_SUBSCRIBED};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const AUTHORIZE: &str =
        r#"{"msg_type":"authorize","authorize":{"email":"trader@example.com","currency":"USD","balance":10000,"loginid":"VRTC1","is_virtual":1}}"#;

    fn session() -> (Session, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let session = Session::new(sink.clone(), Some(ApiToken::new("token")));
        (session, sink)
    }

    fn tick(symbol: &str, quote: &str) -> String {
        format!(
            r#"{{"msg_type":"tick","tick":{{"symbol":"{}","quote":{},"epoch":1700000000}}}}"#,
            symbol, quote
        )
    }

    fn symbols(names: &[&str]) -> String {
        let list: Vec<String> = names
            .iter()
            .map(|name| {
                format!(
                    r#"{{"symbol":"{}","display_name":"{}","market":"synthetic_index"}}"#,
                    name, name
                )
            })
            .collect();
        format!(r#"{{"active_symbols":[{}]}}"#, list.join(","))
    }

    fn phase(session: &Session, kind: FeatureKind) -> Phase {
        session.feature(kind).unwrap().phase()
    }

    #[tokio::test]
    async fn test_authorization_is_shared() {
        let (mut session, sink) = session();
        session.mount(FeatureKind::Markets).await.unwrap();
        session.mount(FeatureKind::Balance).await.unwrap();

        assert_eq!(
            sink.drain(),
            vec![
                Request::authorize(ApiToken::new("token")),
                Request::active_symbols(SymbolDetail::Brief, None),
            ]
        );
        assert_eq!(session.auth(), &AuthState::Pending);

        session.handle_frame(AUTHORIZE).await.unwrap();
        assert_eq!(sink.drain(), vec![SubscriptionKey::Balance.subscribe_request()]);
        assert_eq!(session.auth().account().unwrap().loginid, "VRTC1");

        // Mounted after authorization: no second round trip
        session.mount(FeatureKind::Portfolio).await.unwrap();
        assert_eq!(sink.drain(), vec![Request::portfolio()]);
        assert_eq!(phase(&session, FeatureKind::Portfolio), Phase::Subscribing);
    }

    #[tokio::test]
    async fn test_balance_flow() {
        let (mut session, sink) = session();
        session.mount(FeatureKind::Balance).await.unwrap();
        session.handle_frame(AUTHORIZE).await.unwrap();
        session
            .handle_frame(r#"{"balance":{"balance":9990.5,"currency":"USD","id":"b1"}}"#)
            .await
            .unwrap();

        let balance = session
            .feature(FeatureKind::Balance)
            .and_then(Feature::as_balance)
            .unwrap();
        assert_eq!(balance.balance().unwrap().total, dec!(9990.5));
        assert_eq!(balance.status().view(), ViewState::Ready);
        assert!(session.registry().is_confirmed(&SubscriptionKey::Balance));

        // Remount cancels the stream before subscribing again
        session.unmount(FeatureKind::Balance).await.unwrap();
        session.mount(FeatureKind::Balance).await.unwrap();
        let wire = sink.drain();
        assert_eq!(
            &wire[wire.len() - 2..],
            &[
                Request::forget_all(SubscriptionKind::Balance),
                SubscriptionKey::Balance.subscribe_request(),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_duplicate_tick_subscriptions() {
        let (mut session, sink) = session();
        session.mount(FeatureKind::Trading).await.unwrap();
        session.mount(FeatureKind::Markets).await.unwrap();
        session.handle_frame(AUTHORIZE).await.unwrap();
        session.handle_frame(&symbols(&["R_10", "R_100"])).await.unwrap();
        sink.drain();

        // Markets already got its list from the same response
        assert_eq!(phase(&session, FeatureKind::Markets), Phase::Ready);

        session.select_trading_symbol("R_100").await.unwrap();
        session.select_trading_symbol("R_100").await.unwrap();
        assert!(sink.drain().is_empty());
    }

    #[tokio::test]
    async fn test_forget_all_precedes_resubscribe_on_the_wire() {
        let (mut session, sink) = session();
        session.mount(FeatureKind::Trading).await.unwrap();
        session.mount(FeatureKind::Markets).await.unwrap();
        session.handle_frame(AUTHORIZE).await.unwrap();
        session.handle_frame(&symbols(&["R_10", "R_25"])).await.unwrap();
        sink.drain();

        session.select_market("R_50").await.unwrap();
        let wire = sink.drain();
        assert_eq!(wire[0], Request::forget_all(SubscriptionKind::Ticks));
        assert!(wire[1..].iter().all(|request| request.is_subscribe()));
        assert_eq!(wire.len(), 4);
        assert!(session.registry().is_active(&SubscriptionKey::ticks("R_50")));
        assert!(session.registry().is_active(&SubscriptionKey::ticks("R_10")));
    }

    #[tokio::test]
    async fn test_trading_limits_symbol_batch() {
        let (mut session, sink) = session();
        session.mount(FeatureKind::Trading).await.unwrap();
        sink.drain();

        let names: Vec<String> = (0..25).map(|i| format!("R_{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        session.handle_frame(&symbols(&refs)).await.unwrap();

        let wire = sink.drain();
        // Nothing was active yet, so the bulk cancel is a no-op
        assert_eq!(wire.len(), MAX_TRADING_SYMBOLS);
        assert!(wire.iter().all(|request| request.is_subscribe()));
    }

    #[tokio::test]
    async fn test_state_is_left_fold_of_envelopes() {
        let (mut session, _sink) = session();
        session.mount(FeatureKind::Markets).await.unwrap();

        let frames = [
            symbols(&["R_100"]),
            tick("R_100", "100.50"),
            tick("R_50", "7"),
            tick("R_100", "101.20"),
            tick("R_100", "100.90"),
        ];
        let mut expected = MarketsState::new().start().state;
        for frame in &frames {
            session.handle_frame(frame).await.unwrap();
            expected = expected.reduce(Routed::Data(&decode(frame).unwrap())).state;
        }

        let markets = session
            .feature(FeatureKind::Markets)
            .and_then(Feature::as_markets)
            .unwrap();
        assert_eq!(markets, &expected);
        let point = markets.price("R_100").unwrap();
        assert_eq!(point.current, dec!(100.90));
        assert_eq!(point.previous, Some(dec!(101.20)));
    }

    #[tokio::test]
    async fn test_already_subscribed_never_errors() {
        let (mut session, _sink) = session();
        for kind in FeatureKind::ALL {
            session.mount(kind).await.unwrap();
        }
        session.handle_frame(AUTHORIZE).await.unwrap();

        let ticks = format!(
            r#"{{"msg_type":"tick","error":{{"code":"{}","message":"You are already subscribed to R_100"}}}}"#,
            ALREADY_SUBSCRIBED
        );
        session.handle_frame(&ticks).await.unwrap();
        // Someone else's duplicate says nothing about the balance stream
        assert_eq!(phase(&session, FeatureKind::Balance), Phase::Subscribing);

        let balance = format!(
            r#"{{"msg_type":"balance","error":{{"code":"{}","message":"You are already subscribed to balance"}}}}"#,
            ALREADY_SUBSCRIBED
        );
        session.handle_frame(&balance).await.unwrap();

        for kind in FeatureKind::ALL {
            assert_ne!(phase(&session, kind), Phase::Error, "{}", kind);
        }
        // Balance was waiting for its stream: the duplicate confirms it
        assert_eq!(phase(&session, FeatureKind::Balance), Phase::Ready);
    }

    #[tokio::test]
    async fn test_fatal_error_and_retry() {
        let (mut session, sink) = session();
        session.mount(FeatureKind::History).await.unwrap();
        session.mount(FeatureKind::Limits).await.unwrap();
        session
            .handle_frame(r#"{"error":{"code":"InvalidToken","message":"The token you used is invalid."}}"#)
            .await
            .unwrap();

        for kind in [FeatureKind::History, FeatureKind::Limits] {
            match session.feature(kind).unwrap().view() {
                ViewState::Error { error } => assert_eq!(error.code, "InvalidToken"),
                other => panic!("{} should be failed, got {:?}", kind, other),
            }
        }
        assert_eq!(session.auth(), &AuthState::Unauthorized);
        sink.drain();

        // Pushes keep the error until retry
        session
            .handle_frame(r#"{"get_limits":{"turnover_limit":1}}"#)
            .await
            .unwrap();
        assert_eq!(phase(&session, FeatureKind::Limits), Phase::Error);

        session.retry(FeatureKind::History).await.unwrap();
        assert_eq!(sink.drain(), vec![Request::authorize(ApiToken::new("token"))]);
        assert_eq!(phase(&session, FeatureKind::History), Phase::Authorizing);
        assert_eq!(phase(&session, FeatureKind::Limits), Phase::Error);
    }

    #[tokio::test]
    async fn test_rejected_buy_fails_only_the_trade() {
        let (mut session, sink) = session();
        session.mount(FeatureKind::Markets).await.unwrap();
        session.mount(FeatureKind::Trading).await.unwrap();
        session.mount(FeatureKind::History).await.unwrap();
        session.handle_frame(AUTHORIZE).await.unwrap();
        session.handle_frame(&symbols(&["R_100"])).await.unwrap();
        session.select_trading_symbol("R_100").await.unwrap();
        session
            .handle_frame(r#"{"profit_table":{"count":0,"transactions":[]}}"#)
            .await
            .unwrap();
        session
            .place_trade(ContractType::Call, dec!(10), 1)
            .await
            .unwrap();
        sink.drain();

        session
            .handle_frame(r#"{"echo_req":{"buy":1},"msg_type":"buy","error":{"code":"InsufficientBalance","message":"Your account balance is insufficient for this transaction."}}"#)
            .await
            .unwrap();

        assert_eq!(phase(&session, FeatureKind::Markets), Phase::Ready);
        assert_eq!(phase(&session, FeatureKind::History), Phase::Ready);
        assert_eq!(phase(&session, FeatureKind::Trading), Phase::Ready);
        let trading = session
            .feature(FeatureKind::Trading)
            .and_then(Feature::as_trading)
            .unwrap();
        assert!(matches!(trading.trade(), TradeStatus::Rejected { .. }));
        assert!(session.auth().account().is_some());

        // An unattributed error after everything settled fails nobody
        session
            .handle_frame(r#"{"error":{"code":"RateLimit","message":"You have reached the rate limit"}}"#)
            .await
            .unwrap();
        for kind in [FeatureKind::Markets, FeatureKind::Trading, FeatureKind::History] {
            assert_eq!(phase(&session, kind), Phase::Ready, "{}", kind);
        }
        assert!(sink.drain().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_fails_feature() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(sink.clone(), Some(ApiToken::new("  ")));
        session.mount(FeatureKind::Markets).await.unwrap();
        session.mount(FeatureKind::Portfolio).await.unwrap();

        // Markets still loads public data
        assert_eq!(
            sink.drain(),
            vec![Request::active_symbols(SymbolDetail::Brief, None)]
        );
        assert_eq!(phase(&session, FeatureKind::Markets), Phase::Subscribing);
        match session.feature(FeatureKind::Portfolio).unwrap().view() {
            ViewState::Error { error } => assert_eq!(error.code, "AuthorizationRequired"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_buy_scenario_through_session() {
        let (mut session, sink) = session();
        session.mount(FeatureKind::Trading).await.unwrap();
        session.handle_frame(AUTHORIZE).await.unwrap();
        session.handle_frame(&symbols(&["R_100"])).await.unwrap();
        session.select_trading_symbol("R_100").await.unwrap();
        sink.drain();

        session
            .place_trade(ContractType::Call, dec!(10), 1)
            .await
            .unwrap();
        assert_eq!(
            sink.drain(),
            vec![Request::buy("R_100", ContractType::Call, dec!(10), 1)]
        );

        // Second trade while the first is in flight
        assert!(matches!(
            session.place_trade(ContractType::Put, dec!(10), 1).await,
            Err(MuraError::InvalidRequest(_))
        ));
        assert!(sink.drain().is_empty());

        session
            .handle_frame(r#"{"buy":{"contract_id":123,"buy_price":10,"payout":18.6,"longcode":"Win payout if ..."}}"#)
            .await
            .unwrap();
        let trading = session
            .feature(FeatureKind::Trading)
            .and_then(Feature::as_trading)
            .unwrap();
        match trading.trade() {
            TradeStatus::Filled { receipt } => {
                assert_eq!(receipt.contract_id, 123);
                assert_eq!(receipt.buy_price, dec!(10));
                assert_eq!(receipt.payout, dec!(18.6));
            }
            other => panic!("expected fill, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconnect_restarts_features() {
        let (mut session, sink) = session();
        session.handle_event(ConnectionEvent::State(ConnectionState::Open)).await.unwrap();
        session.mount(FeatureKind::Balance).await.unwrap();
        session.mount(FeatureKind::Markets).await.unwrap();
        session.handle_frame(AUTHORIZE).await.unwrap();
        session.select_market("R_100").await.unwrap();
        session.handle_frame(&tick("R_100", "100.50")).await.unwrap();
        sink.drain();

        session.handle_event(ConnectionEvent::State(ConnectionState::Closed)).await.unwrap();
        session.handle_event(ConnectionEvent::State(ConnectionState::Connecting)).await.unwrap();
        session.handle_event(ConnectionEvent::State(ConnectionState::Open)).await.unwrap();

        assert_eq!(
            sink.drain(),
            vec![
                Request::authorize(ApiToken::new("token")),
                Request::active_symbols(SymbolDetail::Brief, None),
                SubscriptionKey::ticks("R_100").subscribe_request(),
            ]
        );
        assert_eq!(session.auth(), &AuthState::Pending);

        // Quotes survive the reconnect
        let markets = session
            .feature(FeatureKind::Markets)
            .and_then(Feature::as_markets)
            .unwrap();
        assert_eq!(markets.price("R_100").unwrap().current, dec!(100.50));

        session.handle_frame(AUTHORIZE).await.unwrap();
        assert_eq!(sink.drain(), vec![SubscriptionKey::Balance.subscribe_request()]);
    }

    #[tokio::test]
    async fn test_mount_while_disconnected_waits_for_authorize() {
        let (mut session, sink) = session();
        session.handle_event(ConnectionEvent::State(ConnectionState::Open)).await.unwrap();
        session.mount(FeatureKind::Balance).await.unwrap();
        session.handle_frame(AUTHORIZE).await.unwrap();
        session
            .handle_frame(r#"{"balance":{"balance":10000,"currency":"USD","id":"b1"}}"#)
            .await
            .unwrap();
        sink.drain();

        // Queued for the next socket, ahead of anything else
        session.handle_event(ConnectionEvent::State(ConnectionState::Closed)).await.unwrap();
        assert_eq!(sink.drain(), vec![Request::authorize(ApiToken::new("token"))]);
        assert_eq!(session.auth(), &AuthState::Pending);
        assert!(session.registry().active().next().is_none());

        // The stale account is not reused
        session.mount(FeatureKind::Portfolio).await.unwrap();
        assert!(sink.drain().is_empty());
        assert_eq!(phase(&session, FeatureKind::Portfolio), Phase::Authorizing);

        // A failed attempt queues nothing more
        session.handle_event(ConnectionEvent::State(ConnectionState::Connecting)).await.unwrap();
        session.handle_event(ConnectionEvent::State(ConnectionState::Closed)).await.unwrap();
        session.handle_event(ConnectionEvent::State(ConnectionState::Connecting)).await.unwrap();
        session.handle_event(ConnectionEvent::State(ConnectionState::Open)).await.unwrap();
        assert!(sink.drain().is_empty());

        session.handle_frame(AUTHORIZE).await.unwrap();
        assert_eq!(
            sink.drain(),
            vec![SubscriptionKey::Balance.subscribe_request(), Request::portfolio()]
        );
        for kind in [FeatureKind::Balance, FeatureKind::Portfolio] {
            assert_ne!(phase(&session, kind), Phase::Error, "{}", kind);
        }
    }

    #[tokio::test]
    async fn test_connection_error_fails_everything() {
        let (mut session, _sink) = session();
        session.mount(FeatureKind::Markets).await.unwrap();
        session.mount(FeatureKind::History).await.unwrap();
        session.handle_event(ConnectionEvent::State(ConnectionState::Error)).await.unwrap();

        for kind in [FeatureKind::Markets, FeatureKind::History] {
            match session.feature(kind).unwrap().view() {
                ViewState::Error { error } => assert_eq!(error.code, "ConnectionLost"),
                other => panic!("expected error, got {:?}", other),
            }
        }
        assert_eq!(session.connection_state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_bad_frames_are_dropped() {
        let (mut session, sink) = session();
        session.mount(FeatureKind::Markets).await.unwrap();
        sink.drain();

        session.handle_frame("{not json").await.unwrap();
        session.handle_frame(r#"{"tick":{"quote":"x"}}"#).await.unwrap();
        session.handle_frame(r#"{"website_status":{"site_status":"up"}}"#).await.unwrap();
        session.handle_frame(r#"{"ping":"pong"}"#).await.unwrap();

        assert!(sink.drain().is_empty());
        assert_eq!(phase(&session, FeatureKind::Markets), Phase::Subscribing);
    }

    #[tokio::test]
    async fn test_commands_on_unmounted_features() {
        let (mut session, _sink) = session();
        assert!(matches!(
            session.retry(FeatureKind::History).await,
            Err(MuraError::NotFound(_))
        ));
        assert!(session.select_market("R_100").await.is_err());
        assert!(session
            .place_trade(ContractType::Call, dec!(1), 1)
            .await
            .is_err());
        assert!(session.unmount(FeatureKind::Balance).await.is_err());
    }

    #[tokio::test]
    async fn test_run_loop_publishes_snapshots() {
        let (session, sink) = session();
        let mut snapshots = session.snapshots();
        let (event_tx, event_rx) = broadcast::channel(16);
        let (command_tx, command_rx) = mpsc::channel(16);
        let handle = tokio::spawn(session.run(event_rx, command_rx));

        command_tx
            .send(SessionCommand::Mount(FeatureKind::Limits))
            .await
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            snapshots.wait_for(|snapshot| snapshot.feature(FeatureKind::Limits).is_some()),
        )
        .await
        .expect("limits never mounted")
        .unwrap();

        event_tx
            .send(ConnectionEvent::State(ConnectionState::Open))
            .unwrap();
        event_tx
            .send(ConnectionEvent::Frame(Arc::from(AUTHORIZE)))
            .unwrap();
        event_tx
            .send(ConnectionEvent::Frame(Arc::from(
                r#"{"get_limits":{"daily_withdrawal_limit":5000}}"#,
            )))
            .unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                snapshots.changed().await.unwrap();
                let snapshot = snapshots.borrow_and_update().clone();
                let limits_ready = snapshot
                    .feature(FeatureKind::Limits)
                    .map(|feature| feature.view() == ViewState::Ready)
                    .unwrap_or(false);
                if limits_ready {
                    return snapshot;
                }
            }
        })
        .await
        .expect("limits never became ready");

        assert_eq!(ready.connection, ConnectionState::Open);
        assert!(ready.auth.account().is_some());
        assert_eq!(
            sink.drain(),
            vec![Request::authorize(ApiToken::new("token")), Request::get_limits()]
        );

        command_tx.send(SessionCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }
}
