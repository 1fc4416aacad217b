//! Tidepool funding pool module
//!
//! Client side of the pool program:
//! - Reactive pool snapshot
//! - Confirm-then-refresh mutations
//! - Pool settings form validation

pub mod data;
pub mod client;
pub mod form;

pub use data::*;
pub use client::*;
pub use form::*;
