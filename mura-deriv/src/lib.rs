//! Deriv integration for the Mura trading dashboard
//!
//! This crate owns the single WebSocket connection to the Deriv API that
//! every dashboard feature shares.

pub mod connection;

pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionState, DerivConnection, ReconnectPolicy,
};
