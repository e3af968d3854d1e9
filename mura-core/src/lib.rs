//! Core types for the Mura trading dashboard
//!
//! This crate defines the shared data structures used across the dashboard:
//! the Deriv wire protocol, the frame codec, market and account data, and
//! the error type.

pub mod account;
pub mod codec;
pub mod contract;
pub mod error;
pub mod market;
pub mod protocol;

pub use account::{AccountBalance, AccountInfo, AccountLimits, BalanceUpdate};
pub use codec::{decode, encode, DecodeError};
pub use contract::{
    BuyReceipt, Contract, ContractStatus, Portfolio, PortfolioContract, ProfitTable,
    ProfitTransaction, TradeRow,
};
pub use error::{MuraError, MuraResult};
pub use market::{ActiveSymbol, PriceBoard, PriceDirection, PricePoint, Tick};
pub use protocol::{
    ApiError, ApiToken, ContractParameters, ContractType, Envelope, EnvelopeKind, Request,
    SubscriptionKey, SubscriptionKind, SymbolDetail, ALREADY_SUBSCRIBED,
};
