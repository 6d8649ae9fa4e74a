//! Account workers: keeps one background worker per unpaused account holder.

pub mod config;
pub mod error;
pub mod reconciler;
pub mod store;
pub mod worker;
