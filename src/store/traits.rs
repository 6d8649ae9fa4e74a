//! Account store trait and the account holder model it lists.

use std::fmt;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// Stable identity of an account holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An account holder as listed by the store.
///
/// `paused` is owned by whoever writes the store; workers only ever read it
/// through a fresh listing.
#[derive(Debug, Clone)]
pub struct AccountHolder {
    pub id: AccountId,
    pub username: String,
    pub password: SecretString,
    pub holder_name: String,
    pub paused: bool,
}

/// Fields needed to insert a new account holder.
#[derive(Debug, Clone)]
pub struct NewAccountHolder {
    pub username: String,
    pub password: SecretString,
    pub holder_name: String,
    pub paused: bool,
}

impl NewAccountHolder {
    /// An unpaused account holder.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        holder_name: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            holder_name: holder_name.into(),
            paused: false,
        }
    }

    /// Set the initial paused flag.
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }
}

/// Read side of the account store consumed by the reconciler.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Full snapshot of every account holder, paused or not.
    async fn list_account_holders(&self) -> Result<Vec<AccountHolder>, DatabaseError>;
}
