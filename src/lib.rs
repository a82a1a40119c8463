//! Pull-based proportional dividend token.

pub mod config;
pub mod dividend;
pub mod ledger;
pub mod math;
pub mod scenario;
pub mod token;

mod error;

pub use error::DividendError;
