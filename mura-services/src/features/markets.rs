//! Markets page: the symbol list and a live quote for the selected symbol

use serde::Serialize;
use tracing::debug;

use mura_core::{
    ActiveSymbol, Envelope, PriceBoard, PricePoint, Request, SubscriptionKey, SubscriptionKind,
    SymbolDetail,
};

use super::{Effect, FeatureKind, Phase, Reducer, Status, Step};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketsState {
    status: Status,
    symbols: Vec<ActiveSymbol>,
    selected: Option<String>,
    prices: PriceBoard,
}

impl MarketsState {
    pub fn new() -> Self {
        Self::default()
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

    /// Move the live quote to `symbol`: cancel tick feeds, then subscribe
    pub fn select(mut self, symbol: &str) -> Step<Self> {
        self.selected = Some(symbol.to_string());
        Step::with(
            self,
            vec![
                Effect::ForgetAll(SubscriptionKind::Ticks),
                Effect::Subscribe(SubscriptionKey::ticks(symbol)),
            ],
        )
    }
}

impl Reducer for MarketsState {
    const KIND: FeatureKind = FeatureKind::Markets;

    fn status(&self) -> &Status {
        &self.status
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    fn start(mut self) -> Step<Self> {
        self.status.enter(Phase::Subscribing);

        let mut effects = vec![
            Effect::Authorize,
            Effect::Send(Request::active_symbols(SymbolDetail::Brief, None)),
        ];
        if let Some(symbol) = &self.selected {
            effects.push(Effect::Subscribe(SubscriptionKey::ticks(symbol.as_str())));
        }
        Step::with(self, effects)
    }

    fn apply(mut self, envelope: &Envelope) -> Step<Self> {
        match envelope {
            Envelope::ActiveSymbols(symbols) if self.status.phase() == Phase::Subscribing => {
                debug!("[Markets] {} symbols listed", symbols.len());
                self.symbols = symbols.clone();
                self.status.enter(Phase::Ready);
            }
            Envelope::Tick(tick) => self.prices.apply(tick),
            _ => {}
        }
        Step::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_policy::FeatureError;
    use crate::features::{Routed, ViewState};
    use mura_core::Tick;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn symbol(name: &str, market: &str) -> ActiveSymbol {
        ActiveSymbol {
            symbol: name.to_string(),
            display_name: name.to_string(),
            market: market.to_string(),
            market_display_name: String::new(),
            submarket: None,
            exchange_is_open: Some(1),
        }
    }

    fn tick(symbol: &str, quote: Decimal) -> Envelope {
        Envelope::Tick(Tick {
            symbol: symbol.to_string(),
            quote,
            epoch: 0,
            id: None,
        })
    }

    #[test]
    fn test_mount_requests_brief_symbols() {
        let step = MarketsState::new().start();
        assert_eq!(
            step.effects,
            vec![
                Effect::Authorize,
                Effect::Send(Request::active_symbols(SymbolDetail::Brief, None)),
            ]
        );
        assert_eq!(step.state.status().view(), ViewState::Loading);
    }

    #[test]
    fn test_symbols_make_ready() {
        let state = MarketsState::new().start().state;
        let listed = Envelope::ActiveSymbols(vec![
            symbol("R_100", "synthetic_index"),
            symbol("frxEURUSD", "forex"),
        ]);
        let step = state.apply(&listed);
        assert!(step.effects.is_empty());
        assert_eq!(step.state.symbols().len(), 2);
        assert_eq!(step.state.status().phase(), Phase::Ready);
    }

    #[test]
    fn test_select_cancels_before_subscribing() {
        let step = MarketsState::new().start().state.select("R_50");
        assert_eq!(step.state.selected(), Some("R_50"));
        assert_eq!(
            step.effects,
            vec![
                Effect::ForgetAll(SubscriptionKind::Ticks),
                Effect::Subscribe(SubscriptionKey::ticks("R_50")),
            ]
        );
    }

    #[test]
    fn test_r100_price_scenario() {
        let mut state = MarketsState::new().select("R_100").state;
        for envelope in [tick("R_100", dec!(100.50)), tick("R_100", dec!(101.20))] {
            state = state.reduce(Routed::Data(&envelope)).state;
        }
        let point = state.price("R_100").unwrap();
        assert_eq!(point.current, dec!(101.20));
        assert_eq!(point.previous, Some(dec!(100.50)));
    }

    #[test]
    fn test_restart_resubscribes_selected_symbol() {
        let state = MarketsState::new().select("R_75").state;
        let step = state.start();
        assert!(step
            .effects
            .contains(&Effect::Subscribe(SubscriptionKey::ticks("R_75"))));
    }

    #[test]
    fn test_ticks_update_prices_in_error_state() {
        let state = MarketsState::new().start().state;
        let failure = FeatureError::new("MarketIsClosed", "closed");
        let state = state.reduce(Routed::Failure(&failure)).state;
        let state = state.reduce(Routed::Data(&tick("R_10", dec!(5)))).state;
        assert_eq!(state.status().phase(), Phase::Error);
        assert_eq!(state.price("R_10").unwrap().current, dec!(5));

        let step = state.retry();
        assert_eq!(step.state.status().phase(), Phase::Subscribing);
        assert!(step.state.status().error().is_none());
    }
}
