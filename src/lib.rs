//! # sessionkit
//!
//! Client-side security core of an authentication SDK.
//!
//! - [`token`] signs and verifies RS256 access tokens locally.
//! - [`claims`] stores timestamped claim values inside the access token
//!   payload and validates them.
//! - [`querier`] talks to one or more core instances with failover, rate
//!   limit retries and CDI version negotiation.
//! - [`session`] runs the session lifecycle on top of the querier: create,
//!   verify, refresh with theft detection, update and revoke.
//!
//! Nothing here keeps global state. Build a [`config::CoreConfig`], hand it to
//! a [`querier::Querier`] and pass that to the components that need it.

pub mod claims;
pub mod cli;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod email_verification;
pub mod error;
pub mod querier;
pub mod session;
pub mod token;

pub use error::{Error, Result};

/// Open JSON object used for access token payloads and session data.
pub type Payload = serde_json::Map<String, serde_json::Value>;
