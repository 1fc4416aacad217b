//! Tidepool development ledger
//!
//! In-memory ledger hosting accounts and the funding pool program:
//! - provider surface (accounts, balances, submission, inclusion)
//! - pool program reads
//! - block mining and fault injection for tests
//! - HTTP API

mod api;
mod config;
mod ledger;
mod program;
mod server;

pub use api::*;
pub use config::*;
pub use ledger::*;
pub use program::*;
pub use server::*;
