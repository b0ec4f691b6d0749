//! Data models for Spendwatch

mod alert;
mod rule;
mod usage;

pub use alert::*;
pub use rule::*;
pub use usage::*;
