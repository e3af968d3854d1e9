//! Account structures: authorization, balance and limits

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account details returned by a successful `authorize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub email: String,

    /// Account currency (e.g. "USD")
    #[serde(default)]
    pub currency: String,

    /// Balance at the time of authorization
    pub balance: Decimal,

    /// Deriv login id (e.g. "CR123456", "VRTC123456")
    #[serde(default)]
    pub loginid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,

    /// 1 for virtual (demo) accounts
    #[serde(default)]
    pub is_virtual: u8,
}

impl AccountInfo {
    pub fn is_virtual(&self) -> bool {
        self.is_virtual == 1
    }
}

/// A balance push from a `balance` subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub balance: Decimal,

    #[serde(default)]
    pub currency: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loginid: Option<String>,

    /// Server-side subscription id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Account limits from `get_limits`
///
/// Fields the server omits are reported as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountLimits {
    #[serde(default)]
    pub daily_withdrawal_limit: Decimal,

    #[serde(default)]
    pub withdrawal_available: Decimal,

    #[serde(default)]
    pub turnover_limit: Decimal,

    /// Maximum number of open positions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_positions: Option<u32>,

    /// Maximum account cash balance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_balance: Option<Decimal>,
}

/// Share of the balance shown as available to trade, in percent
pub const AVAILABLE_PERCENT: i64 = 95;

/// Margin usage shown on the balance card, in percent
pub const MARGIN_USAGE_PERCENT: i64 = 5;

/// Balance figures shown on the balance card
///
/// `available`, `equity` and `margin_usage` are display figures derived from
/// the total; the API reports only the balance itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total: Decimal,
    pub available: Decimal,
    pub equity: Decimal,
    /// Percent
    pub margin_usage: Decimal,
    pub currency: String,
}

impl From<&AccountInfo> for AccountBalance {
    fn from(info: &AccountInfo) -> Self {
        Self::new(info.balance, &info.currency)
    }
}

impl From<&BalanceUpdate> for AccountBalance {
    fn from(update: &BalanceUpdate) -> Self {
        Self::new(update.balance, &update.currency)
    }
}

impl AccountBalance {
    pub fn new(total: Decimal, currency: &str) -> Self {
        Self {
            total,
            available: total * Decimal::new(AVAILABLE_PERCENT, 2),
            equity: total,
            margin_usage: Decimal::new(MARGIN_USAGE_PERCENT, 0),
            currency: currency.to_string(),
        }
    }

    /// Balance formatted with two decimal places and currency code
    pub fn display(&self) -> String {
        format!("{} {:.2}", self.currency, self.total)
    }
}
