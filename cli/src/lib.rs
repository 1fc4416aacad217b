//! Tidepool CLI library
//!
//! HTTP-backed provider and pool program, plus terminal rendering of the
//! client stores.

pub mod client;
pub mod output;

pub use client::*;
pub use output::*;
