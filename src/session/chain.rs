//! Refresh token hash chain.
//!
//! Each rotation hands out a new refresh token whose hash becomes the current
//! link; the previous hash is kept as the parent. The core owns the chain, the
//! SDK only hashes and compares.

use crate::token::AccessTokenPayload;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of a refresh token, as carried in `refreshTokenHash1`.
#[must_use]
pub fn hash_refresh_token(refresh_token: &str) -> String {
    hex::encode(Sha256::digest(refresh_token.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshChainLink {
    pub current_hash1: String,
    pub parent_hash1: Option<String>,
}

impl RefreshChainLink {
    /// First link of a chain.
    #[must_use]
    pub fn root(refresh_token: &str) -> Self {
        Self {
            current_hash1: hash_refresh_token(refresh_token),
            parent_hash1: None,
        }
    }

    #[must_use]
    pub fn from_payload(payload: &AccessTokenPayload) -> Self {
        Self {
            current_hash1: payload.refresh_token_hash1.clone(),
            parent_hash1: payload.parent_refresh_token_hash1.clone(),
        }
    }

    /// The link produced by rotating to `new_refresh_token`.
    #[must_use]
    pub fn rotate(&self, new_refresh_token: &str) -> Self {
        Self {
            current_hash1: hash_refresh_token(new_refresh_token),
            parent_hash1: Some(self.current_hash1.clone()),
        }
    }

    /// `true` when this link was issued in exchange for the token hashing to `submitted_hash1`.
    #[must_use]
    pub fn is_successor_of(&self, submitted_hash1: &str) -> bool {
        self.parent_hash1.as_deref() == Some(submitted_hash1)
    }

    /// `true` when `refresh_token` is the token this link was issued for.
    #[must_use]
    pub fn is_current(&self, refresh_token: &str) -> bool {
        self.current_hash1 == hash_refresh_token(refresh_token)
    }
}
