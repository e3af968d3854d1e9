//! Market data structures: tradable instruments and live quotes

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market identifier for Deriv's synthetic (volatility) indices
pub const SYNTHETIC_INDEX_MARKET: &str = "synthetic_index";

/// A tradable instrument as listed by `active_symbols`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSymbol {
    /// Instrument symbol (e.g. "R_100")
    pub symbol: String,

    /// Human-readable name (e.g. "Volatility 100 Index")
    pub display_name: String,

    /// Market identifier (e.g. "synthetic_index", "forex")
    #[serde(default)]
    pub market: String,

    /// Human-readable market name
    #[serde(default)]
    pub market_display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submarket: Option<String>,

    /// 1 when the exchange is currently open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_is_open: Option<u8>,
}

impl ActiveSymbol {
    pub fn is_synthetic(&self) -> bool {
        self.market == SYNTHETIC_INDEX_MARKET
    }
}

/// A single streamed quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub quote: Decimal,
    /// Unix seconds
    #[serde(default)]
    pub epoch: i64,
    /// Server-side subscription id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Tick {
    /// Quote time as a UTC timestamp
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.epoch, 0)
    }
}

/// Latest quote together with the one it replaced
///
/// `previous` always holds the `current` value that was replaced by the most
/// recent update for the same symbol; updates for other symbols never touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub current: Decimal,
    pub previous: Option<Decimal>,
}

/// Direction of the last price move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Up,
    Down,
    Unchanged,
}

impl PricePoint {
    pub fn first(quote: Decimal) -> Self {
        Self {
            current: quote,
            previous: None,
        }
    }

    /// Roll the point forward to a new quote
    pub fn advance(self, quote: Decimal) -> Self {
        Self {
            current: quote,
            previous: Some(self.current),
        }
    }

    /// Direction relative to the previous quote (unchanged when there is none)
    pub fn direction(&self) -> PriceDirection {
        match self.previous {
            Some(prev) if self.current > prev => PriceDirection::Up,
            Some(prev) if self.current < prev => PriceDirection::Down,
            _ => PriceDirection::Unchanged,
        }
    }

    /// Absolute change from the previous quote
    pub fn change(&self) -> Decimal {
        self.previous
            .map(|prev| self.current - prev)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Per-symbol price points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceBoard {
    prices: HashMap<String, PricePoint>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a tick into the board
    pub fn apply(&mut self, tick: &Tick) {
        let point = match self.prices.get(&tick.symbol) {
            Some(existing) => existing.advance(tick.quote),
            None => PricePoint::first(tick.quote),
        };
        self.prices.insert(tick.symbol.clone(), point);
    }

    pub fn get(&self, symbol: &str) -> Option<&PricePoint> {
        self.prices.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PricePoint)> {
        self.prices.iter()
    }
}
