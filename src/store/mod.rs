//! Persistence layer: libSQL-backed account holder storage.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{AccountHolder, AccountId, AccountStore, NewAccountHolder};
