//! Trading page: synthetic indices with live quotes and rise/fall trades
//!
//! `buy` responses carry nothing tying them to the request that produced
//! them, so at most one trade may be in flight. The next `buy` envelope
//! resolves the pending trade.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use mura_core::{
    ActiveSymbol, BuyReceipt, ContractType, Envelope, MuraError, MuraResult, PriceBoard,
    PricePoint, Request, SubscriptionKey, SubscriptionKind, SymbolDetail,
};

use super::{Effect, FeatureKind, Phase, Reducer, Status, Step};
use crate::error_policy::{FeatureError, CONNECTION_LOST};

/// Symbols shown (and subscribed) on the trading page
pub const MAX_TRADING_SYMBOLS: usize = 20;

const PRODUCT_TYPE: &str = "basic";

/// A validated order waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeTicket {
    pub symbol: String,
    pub contract_type: ContractType,
    pub amount: Decimal,
    /// Minutes
    pub duration: u32,
}

impl TradeTicket {
    pub fn request(&self) -> Request {
        Request::buy(&self.symbol, self.contract_type, self.amount, self.duration)
    }
}

/// Lifecycle of the most recent trade
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TradeStatus {
    #[default]
    Idle,
    Pending { ticket: TradeTicket },
    Filled { receipt: BuyReceipt },
    Rejected { reason: String },
}

impl TradeStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TradeStatus::Pending { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradingState {
    status: Status,
    authorized: bool,
    symbols: Vec<ActiveSymbol>,
    selected: Option<String>,
    prices: PriceBoard,
    trade: TradeStatus,
}

impl TradingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn symbols(&self) -> &[ActiveSymbol] {
        &self.symbols
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn prices(&self) -> &PriceBoard {
        &self.prices
    }

    pub fn price(&self, symbol: &str) -> Option<&PricePoint> {
        self.prices.get(symbol)
    }

    pub fn trade(&self) -> &TradeStatus {
        &self.trade
    }

    /// Choose the symbol to trade; subscribes it if it is not streaming yet
    pub fn select(mut self, symbol: &str) -> Step<Self> {
        self.selected = Some(symbol.to_string());
        Step::with(
            self,
            vec![Effect::Subscribe(SubscriptionKey::ticks(symbol))],
        )
    }

    /// Validate an order against the current state
    pub fn ticket(
        &self,
        contract_type: ContractType,
        amount: Decimal,
        duration: u32,
    ) -> MuraResult<TradeTicket> {
        if self.trade.is_pending() {
            return Err(MuraError::invalid_request("A trade is already in flight"));
        }
        let Some(symbol) = &self.selected else {
            return Err(MuraError::invalid_request("No symbol selected"));
        };
        if !self.authorized {
            return Err(MuraError::auth("Session is not authorized"));
        }
        if amount <= Decimal::ZERO {
            return Err(MuraError::invalid_request("Stake must be positive"));
        }
        if duration == 0 {
            return Err(MuraError::invalid_request(
                "Duration must be at least one minute",
            ));
        }

        Ok(TradeTicket {
            symbol: symbol.clone(),
            contract_type,
            amount,
            duration,
        })
    }

    /// Send a validated order
    pub fn place(mut self, ticket: TradeTicket) -> Step<Self> {
        info!(
            "[Trading] Placing {:?} on {} for {}",
            ticket.contract_type, ticket.symbol, ticket.amount
        );
        let request = ticket.request();
        self.trade = TradeStatus::Pending { ticket };
        Step::with(self, vec![Effect::Send(request)])
    }

    fn list(&mut self, symbols: &[ActiveSymbol]) -> Vec<Effect> {
        self.symbols = symbols
            .iter()
            .filter(|symbol| symbol.is_synthetic())
            .take(MAX_TRADING_SYMBOLS)
            .cloned()
            .collect();
        debug!(
            "[Trading] {} of {} symbols are synthetic indices",
            self.symbols.len(),
            symbols.len()
        );

        // Stale feeds go before the new batch
        std::iter::once(Effect::ForgetAll(SubscriptionKind::Ticks))
            .chain(
                self.symbols
                    .iter()
                    .map(|symbol| Effect::Subscribe(SubscriptionKey::ticks(symbol.symbol.as_str()))),
            )
            .collect()
    }
}

impl Reducer for TradingState {
    const KIND: FeatureKind = FeatureKind::Trading;

    fn status(&self) -> &Status {
        &self.status
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    fn start(mut self) -> Step<Self> {
        self.authorized = false;
        self.status.enter(Phase::Subscribing);
        Step::with(
            self,
            vec![
                Effect::Authorize,
                Effect::Send(Request::active_symbols(
                    SymbolDetail::Brief,
                    Some(PRODUCT_TYPE),
                )),
            ],
        )
    }

    fn apply(mut self, envelope: &Envelope) -> Step<Self> {
        let mut effects = Vec::new();
        match envelope {
            Envelope::Authorize(_) => self.authorized = true,
            Envelope::ActiveSymbols(symbols) if self.status.phase() == Phase::Subscribing => {
                effects = self.list(symbols);
                self.status.enter(Phase::Ready);
            }
            Envelope::Tick(tick) => self.prices.apply(tick),
            Envelope::Buy(receipt) => {
                info!(
                    "[Trading] Contract {} bought for {} (payout {})",
                    receipt.contract_id, receipt.buy_price, receipt.payout
                );
                self.trade = TradeStatus::Filled {
                    receipt: receipt.clone(),
                };
            }
            _ => {}
        }
        Step::with(self, effects)
    }

    fn awaiting(&self) -> bool {
        self.trade.is_pending()
            || matches!(
                self.status.phase(),
                Phase::Authorizing | Phase::Subscribing
            )
    }

    fn fail(mut self, error: &FeatureError) -> Step<Self> {
        if self.trade.is_pending() {
            warn!("[Trading] Order rejected: {}", error);
            self.trade = TradeStatus::Rejected {
                reason: error.message.clone(),
            };
            // A rejected order leaves a loaded page usable
            if self.status.phase() == Phase::Ready && error.code != CONNECTION_LOST {
                return Step::new(self);
            }
        }
        self.status.fail(error.clone());
        Step::new(self)
    }
}
