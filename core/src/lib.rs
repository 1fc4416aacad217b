//! Tidepool Core Library
//! 
//! Core types, traits, and abstractions shared by every Tidepool component:
//! ledger identifiers and amounts, the provider and pool program contracts,
//! the error taxonomy, client configuration and source-path routing.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;
pub mod route;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
