//! Contract structures: purchases, open positions and trade history

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Receipt for a purchased contract (`buy` response)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyReceipt {
    pub contract_id: u64,
    pub buy_price: Decimal,
    pub payout: Decimal,
    #[serde(default)]
    pub longcode: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub transaction_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_after: Option<Decimal>,
}

impl BuyReceipt {
    /// Payout minus stake
    pub fn potential_profit(&self) -> Decimal {
        self.payout - self.buy_price
    }
}

/// An open position as listed by `portfolio`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioContract {
    pub contract_id: u64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub date_start: i64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub longcode: String,
    #[serde(default)]
    pub payout: Decimal,
    #[serde(default)]
    pub purchase_time: i64,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub buy_price: Decimal,
}

/// `portfolio` response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    #[serde(default)]
    pub contracts: Vec<PortfolioContract>,
}

/// Settlement status of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Open,
    Won,
    Lost,
}

/// Contract as shown on the orders view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: u64,
    pub contract_type: String,
    pub date_start: i64,
    pub date_expiry: i64,
    pub display_name: String,
    pub buy_price: Decimal,
    pub payout: Decimal,
    pub status: ContractStatus,
    pub underlying_symbol: String,
}

impl From<&PortfolioContract> for Contract {
    // Everything in the portfolio is still running.
    fn from(pc: &PortfolioContract) -> Self {
        Self {
            contract_id: pc.contract_id,
            contract_type: pc.contract_type.clone(),
            date_start: pc.purchase_time,
            date_expiry: pc.expiry_time,
            display_name: pc.longcode.clone(),
            buy_price: pc.buy_price,
            payout: pc.payout,
            status: ContractStatus::Open,
            underlying_symbol: pc.symbol.clone(),
        }
    }
}

impl Contract {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date_expiry, 0)
    }
}

/// A settled trade as listed by `profit_table`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfitTransaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
}

impl ProfitTransaction {
    /// Reported profit, or sell minus buy price when the server omits it
    pub fn profit(&self) -> Option<Decimal> {
        self.profit.or_else(|| match (self.sell_price, self.buy_price) {
            (Some(sell), Some(buy)) => Some(sell - buy),
            _ => None,
        })
    }

    /// Transaction time, falling back to purchase time
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.transaction_time
            .or(self.purchase_time)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// `profit_table` response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfitTable {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub transactions: Vec<ProfitTransaction>,
}

/// A history row ready for display; missing values render as "N/A"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRow {
    pub time: String,
    pub id: String,
    pub kind: String,
    pub amount: String,
    pub profit: String,
    pub balance: String,
    /// Sign source for win/loss colouring
    pub raw_profit: Decimal,
}

const NOT_AVAILABLE: &str = "N/A";

fn money(value: Option<Decimal>) -> String {
    value
        .map(|v| format!("${:.2}", v))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

impl From<&ProfitTransaction> for TradeRow {
    fn from(tx: &ProfitTransaction) -> Self {
        let profit = tx.profit();
        Self {
            time: tx
                .time()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            id: tx
                .transaction_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            kind: tx
                .shortcode
                .clone()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            amount: money(tx.buy_price),
            profit: money(profit),
            balance: money(tx.balance),
            raw_profit: profit.unwrap_or(Decimal::ZERO),
        }
    }
}
