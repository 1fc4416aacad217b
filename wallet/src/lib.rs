//! Tidepool Wallet Connection
//! 
//! Connection state machine for the external wallet provider and the
//! sessions it hands out to ledger clients.

pub mod connection;
pub mod session;

pub use connection::*;
pub use session::*;
