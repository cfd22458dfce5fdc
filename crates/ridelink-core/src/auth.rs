//! Access token supply
//!
//! Token issuance and refresh happen elsewhere; this crate only asks for the
//! current token when opening the live channel or delivering an action.

use std::sync::RwLock;

/// Supplies the current valid access token, if any
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// A token held in memory and replaced on login/logout
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// A provider with no credential (logged out)
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .filter(|t| !t.is_empty())
    }
}
