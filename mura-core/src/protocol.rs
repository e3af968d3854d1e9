//! Deriv WebSocket protocol types
//!
//! Requests are flat JSON objects keyed by operation name; nothing in them
//! identifies the response they will produce. Responses are matched by shape:
//! each one carries exactly one recognized top-level key (or `error`).

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

use crate::account::{AccountInfo, AccountLimits, BalanceUpdate};
use crate::contract::{BuyReceipt, Portfolio, ProfitTable};
use crate::market::{ActiveSymbol, Tick};

// ============================================================================
// Client -> Server
// ============================================================================

/// API token used to authorize the stream (redacted in Debug output)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken([REDACTED])")
    }
}

/// Level of detail for `active_symbols`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolDetail {
    Brief,
    Full,
}

/// Kinds of server-pushed subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Ticks,
    Balance,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::Ticks => "ticks",
            SubscriptionKind::Balance => "balance",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique key for a subscription: at most one may be active per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionKey {
    Ticks { symbol: String },
    Balance,
}

impl SubscriptionKey {
    pub fn ticks(symbol: impl Into<String>) -> Self {
        SubscriptionKey::Ticks {
            symbol: symbol.into(),
        }
    }

    pub fn kind(&self) -> SubscriptionKind {
        match self {
            SubscriptionKey::Ticks { .. } => SubscriptionKind::Ticks,
            SubscriptionKey::Balance => SubscriptionKind::Balance,
        }
    }

    /// The request that opens this subscription
    pub fn subscribe_request(&self) -> Request {
        match self {
            SubscriptionKey::Ticks { symbol } => Request::Ticks {
                ticks: symbol.clone(),
                subscribe: 1,
            },
            SubscriptionKey::Balance => Request::Balance {
                balance: 1,
                subscribe: 1,
            },
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKey::Ticks { symbol } => write!(f, "ticks:{}", symbol),
            SubscriptionKey::Balance => f.write_str("balance"),
        }
    }
}

/// Direction of a rise/fall contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    Call,
    Put,
}

impl FromStr for ContractType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CALL" | "RISE" | "UP" => Ok(ContractType::Call),
            "PUT" | "FALL" | "DOWN" => Ok(ContractType::Put),
            _ => Err(format!("Unknown contract type: {}", s)),
        }
    }
}

fn decimal_as_number<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    rust_decimal::serde::float::serialize(value, serializer)
}

/// Contract parameters for a `buy` request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractParameters {
    #[serde(serialize_with = "decimal_as_number")]
    pub amount: Decimal,
    pub basis: String,
    pub contract_type: ContractType,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: String,
    pub symbol: String,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Request {
    /// Authenticate the stream
    Authorize { authorize: ApiToken },
    /// List tradable instruments
    ActiveSymbols {
        active_symbols: SymbolDetail,
        #[serde(skip_serializing_if = "Option::is_none")]
        product_type: Option<String>,
    },
    /// Subscribe to live quotes for one symbol
    Ticks { ticks: String, subscribe: u8 },
    /// Subscribe to account balance
    Balance { balance: u8, subscribe: u8 },
    /// Cancel every subscription of one kind
    ForgetAll { forget_all: SubscriptionKind },
    /// List open positions
    Portfolio { portfolio: u8 },
    /// Settled trade history
    ProfitTable {
        profit_table: u8,
        description: u8,
        limit: u32,
    },
    /// Account limits
    GetLimits { get_limits: u8 },
    /// Place a trade
    Buy {
        buy: u8,
        #[serde(serialize_with = "decimal_as_number")]
        price: Decimal,
        parameters: ContractParameters,
    },
    /// Keep-alive
    Ping { ping: u8 },
}

impl Request {
    pub fn authorize(token: ApiToken) -> Self {
        Request::Authorize { authorize: token }
    }

    pub fn active_symbols(detail: SymbolDetail, product_type: Option<&str>) -> Self {
        Request::ActiveSymbols {
            active_symbols: detail,
            product_type: product_type.map(str::to_string),
        }
    }

    pub fn forget_all(kind: SubscriptionKind) -> Self {
        Request::ForgetAll { forget_all: kind }
    }

    pub fn portfolio() -> Self {
        Request::Portfolio { portfolio: 1 }
    }

    pub fn profit_table(limit: u32) -> Self {
        Request::ProfitTable {
            profit_table: 1,
            description: 1,
            limit,
        }
    }

    pub fn get_limits() -> Self {
        Request::GetLimits { get_limits: 1 }
    }

    pub fn ping() -> Self {
        Request::Ping { ping: 1 }
    }

    /// Stake-based purchase in USD with a duration in minutes
    pub fn buy(symbol: &str, contract_type: ContractType, amount: Decimal, duration: u32) -> Self {
        Request::Buy {
            buy: 1,
            price: amount,
            parameters: ContractParameters {
                amount,
                basis: "stake".to_string(),
                contract_type,
                currency: "USD".to_string(),
                duration,
                duration_unit: "m".to_string(),
                symbol: symbol.to_string(),
            },
        }
    }

    /// Operation name (the request's top-level key)
    pub fn op(&self) -> &'static str {
        match self {
            Request::Authorize { .. } => "authorize",
            Request::ActiveSymbols { .. } => "active_symbols",
            Request::Ticks { .. } => "ticks",
            Request::Balance { .. } => "balance",
            Request::ForgetAll { .. } => "forget_all",
            Request::Portfolio { .. } => "portfolio",
            Request::ProfitTable { .. } => "profit_table",
            Request::GetLimits { .. } => "get_limits",
            Request::Buy { .. } => "buy",
            Request::Ping { .. } => "ping",
        }
    }

    /// True for requests that open a server-side subscription
    pub fn is_subscribe(&self) -> bool {
        matches!(self, Request::Ticks { .. } | Request::Balance { .. })
    }
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Error code the server sends when a subscription already exists
pub const ALREADY_SUBSCRIBED: &str = "AlreadySubscribed";

/// Error payload of an `error` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    #[serde(default)]
    pub message: String,
    /// `msg_type` of the frame, naming the request that failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,
}

impl ApiError {
    /// Kind of the request that failed, when the frame names one
    pub fn request_kind(&self) -> Option<EnvelopeKind> {
        let msg_type = self.msg_type.as_deref()?;
        EnvelopeKind::ALL
            .into_iter()
            .find(|kind| *kind != EnvelopeKind::Error && kind.key() == msg_type)
    }

    /// Whether the error is about a `kind` request.
    ///
    /// Without a `msg_type` the message text has to mention the kind.
    pub fn concerns(&self, kind: EnvelopeKind) -> bool {
        match &self.msg_type {
            Some(_) => self.request_kind() == Some(kind),
            None => self
                .message
                .to_lowercase()
                .contains(&kind.key().replace('_', " ")),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Top-level keys the decoder recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Authorize,
    ActiveSymbols,
    Tick,
    Balance,
    Portfolio,
    ProfitTable,
    Buy,
    GetLimits,
    ForgetAll,
    Ping,
    Error,
}

impl EnvelopeKind {
    /// Every recognized kind, `Error` first
    pub const ALL: [EnvelopeKind; 11] = [
        EnvelopeKind::Error,
        EnvelopeKind::Authorize,
        EnvelopeKind::ActiveSymbols,
        EnvelopeKind::Tick,
        EnvelopeKind::Balance,
        EnvelopeKind::Portfolio,
        EnvelopeKind::ProfitTable,
        EnvelopeKind::Buy,
        EnvelopeKind::GetLimits,
        EnvelopeKind::ForgetAll,
        EnvelopeKind::Ping,
    ];

    /// JSON key carrying this kind's payload
    pub fn key(&self) -> &'static str {
        match self {
            EnvelopeKind::Authorize => "authorize",
            EnvelopeKind::ActiveSymbols => "active_symbols",
            EnvelopeKind::Tick => "tick",
            EnvelopeKind::Balance => "balance",
            EnvelopeKind::Portfolio => "portfolio",
            EnvelopeKind::ProfitTable => "profit_table",
            EnvelopeKind::Buy => "buy",
            EnvelopeKind::GetLimits => "get_limits",
            EnvelopeKind::ForgetAll => "forget_all",
            EnvelopeKind::Ping => "ping",
            EnvelopeKind::Error => "error",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A decoded server message
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Authorize(AccountInfo),
    ActiveSymbols(Vec<ActiveSymbol>),
    Tick(Tick),
    Balance(BalanceUpdate),
    Portfolio(Portfolio),
    ProfitTable(ProfitTable),
    Buy(BuyReceipt),
    GetLimits(AccountLimits),
    /// Ids of the cancelled subscriptions
    ForgetAll(Vec<String>),
    Ping,
    Error(ApiError),
    /// None or several recognized keys; the router drops these
    Unrecognized { keys: Vec<String> },
}

impl Envelope {
    /// Recognized kind, `None` for unrecognized envelopes
    pub fn kind(&self) -> Option<EnvelopeKind> {
        Some(match self {
            Envelope::Authorize(_) => EnvelopeKind::Authorize,
            Envelope::ActiveSymbols(_) => EnvelopeKind::ActiveSymbols,
            Envelope::Tick(_) => EnvelopeKind::Tick,
            Envelope::Balance(_) => EnvelopeKind::Balance,
            Envelope::Portfolio(_) => EnvelopeKind::Portfolio,
            Envelope::ProfitTable(_) => EnvelopeKind::ProfitTable,
            Envelope::Buy(_) => EnvelopeKind::Buy,
            Envelope::GetLimits(_) => EnvelopeKind::GetLimits,
            Envelope::ForgetAll(_) => EnvelopeKind::ForgetAll,
            Envelope::Ping => EnvelopeKind::Ping,
            Envelope::Error(_) => EnvelopeKind::Error,
            Envelope::Unrecognized { .. } => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_requests_serialize_flat() {
        assert_eq!(
            serde_json::to_value(Request::authorize(ApiToken::new("abc"))).unwrap(),
            json!({"authorize": "abc"})
        );
        assert_eq!(
            serde_json::to_value(Request::active_symbols(SymbolDetail::Brief, Some("basic")))
                .unwrap(),
            json!({"active_symbols": "brief", "product_type": "basic"})
        );
        assert_eq!(
            serde_json::to_value(SubscriptionKey::ticks("R_100").subscribe_request()).unwrap(),
            json!({"ticks": "R_100", "subscribe": 1})
        );
        assert_eq!(
            serde_json::to_value(Request::forget_all(SubscriptionKind::Balance)).unwrap(),
            json!({"forget_all": "balance"})
        );
        assert_eq!(
            serde_json::to_value(Request::profit_table(20)).unwrap(),
            json!({"profit_table": 1, "description": 1, "limit": 20})
        );
    }

    #[test]
    fn test_buy_request_shape() {
        let request = Request::buy("R_100", ContractType::Call, dec!(10), 1);
        assert_eq!(
            serde_json::to_value(request).unwrap(),
            json!({
                "buy": 1,
                "price": 10.0,
                "parameters": {
                    "amount": 10.0,
                    "basis": "stake",
                    "contract_type": "CALL",
                    "currency": "USD",
                    "duration": 1,
                    "duration_unit": "m",
                    "symbol": "R_100"
                }
            })
        );
    }

    #[test]
    fn test_token_is_redacted() {
        let request = Request::authorize(ApiToken::new("secret-token"));
        assert!(!format!("{:?}", request).contains("secret-token"));
    }

    #[test]
    fn test_contract_type_parse() {
        assert_eq!("call".parse::<ContractType>().unwrap(), ContractType::Call);
        assert_eq!("FALL".parse::<ContractType>().unwrap(), ContractType::Put);
        assert!("sideways".parse::<ContractType>().is_err());
    }
}
