//! Tidepool State Management
//! 
//! Reactive containers through which asynchronous data reaches observers:
//! - `Observable` / `Readable`: single-writer values with ordered delivery
//! - `RemoteStore`: not asked / loading / success / error
//! - `ValidationStore`: per-field constraint evaluation

pub mod observable;
pub mod remote;
pub mod validation;

pub use observable::*;
pub use remote::*;
pub use validation::*;
