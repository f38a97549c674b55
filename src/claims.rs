//! Session claims.
//!
//! A claim is a named fact about the session's user that can be fetched on
//! demand and is cached inside the access token payload as an envelope:
//!
//! ```json
//! { "<key>": { "v": <value>, "t": <epoch millis of the fetch> } }
//! ```
//!
//! Validators check an envelope against an expected value and a maximum age.
//! They never touch the network; refetching goes through
//! [`SessionClaimValidator::refetch`].

use crate::error::Result;
use crate::Payload;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub const DEFAULT_MAX_AGE_SECONDS: u64 = 300;

/// Stored claim state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimEnvelope<T> {
    pub v: T,
    pub t: u64,
}

/// Fetches the current value of a claim for a user.
///
/// `Ok(None)` means the user has no value for this claim; the payload is then
/// left untouched.
#[async_trait]
pub trait FetchValue<T>: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<Option<T>>;
}

#[async_trait]
impl<T, F, Fut> FetchValue<T> for F
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<T>>> + Send,
{
    async fn fetch(&self, user_id: &str) -> Result<Option<T>> {
        (self)(user_id.to_string()).await
    }
}

/// A claim holding a single JSON-serialisable value.
pub struct PrimitiveClaim<T> {
    key: String,
    fetcher: Arc<dyn FetchValue<T>>,
    default_max_age_seconds: Option<u64>,
}

impl<T> Clone for PrimitiveClaim<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetcher: Arc::clone(&self.fetcher),
            default_max_age_seconds: self.default_max_age_seconds,
        }
    }
}

impl<T> fmt::Debug for PrimitiveClaim<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveClaim")
            .field("key", &self.key)
            .field("default_max_age_seconds", &self.default_max_age_seconds)
            .finish_non_exhaustive()
    }
}

impl<T> PrimitiveClaim<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
{
    pub fn new(key: impl Into<String>, fetcher: impl FetchValue<T> + 'static) -> Self {
        Self {
            key: key.into(),
            fetcher: Arc::new(fetcher),
            default_max_age_seconds: Some(DEFAULT_MAX_AGE_SECONDS),
        }
    }

    /// `None` disables staleness for validators built with [`Self::has_value`].
    #[must_use]
    pub fn with_default_max_age(mut self, seconds: Option<u64>) -> Self {
        self.default_max_age_seconds = seconds;
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn default_max_age_seconds(&self) -> Option<u64> {
        self.default_max_age_seconds
    }

    /// # Errors
    ///
    /// Returns whatever the fetcher returns.
    pub async fn fetch_value(&self, user_id: &str) -> Result<Option<T>> {
        self.fetcher.fetch(user_id).await
    }

    /// Write `{v: value, t: now}` under the claim key, replacing any prior envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialised.
    pub fn add_to_payload(&self, payload: &mut Payload, value: &T, now_millis: u64) -> Result<()> {
        let envelope = ClaimEnvelope {
            v: value,
            t: now_millis,
        };
        payload.insert(self.key.clone(), serde_json::to_value(envelope)?);
        Ok(())
    }

    /// Mark the claim for deletion in a payload that will be merged by the core.
    pub fn remove_from_payload_by_merge(&self, payload: &mut Payload) {
        payload.insert(self.key.clone(), Value::Null);
    }

    /// Drop the claim from a local payload copy.
    pub fn remove_from_payload(&self, payload: &mut Payload) {
        payload.remove(&self.key);
    }

    #[must_use]
    pub fn get_value(&self, payload: &Payload) -> Option<T> {
        self.envelope(payload).map(|envelope| envelope.v)
    }

    #[must_use]
    pub fn get_last_fetched_at(&self, payload: &Payload) -> Option<u64> {
        self.envelope(payload).map(|envelope| envelope.t)
    }

    fn envelope(&self, payload: &Payload) -> Option<ClaimEnvelope<T>> {
        let raw = self.raw_envelope(payload)?;
        let v = serde_json::from_value(raw.v).ok()?;
        Some(ClaimEnvelope { v, t: raw.t })
    }

    /// The stored envelope with `v` left as JSON, so values of the wrong type still show up.
    fn raw_envelope(&self, payload: &Payload) -> Option<ClaimEnvelope<Value>> {
        match payload.get(&self.key)? {
            Value::Null => None,
            value => serde_json::from_value(value.clone()).ok(),
        }
    }

    /// Validator expecting `expected`, aged by the claim's default max age.
    #[must_use]
    pub fn has_value(&self, expected: T) -> HasValue<T> {
        self.has_value_with_max_age(expected, self.default_max_age_seconds)
    }

    /// Validator expecting `expected` with an explicit max age; `None` never goes stale.
    #[must_use]
    pub fn has_value_with_max_age(&self, expected: T, max_age_seconds: Option<u64>) -> HasValue<T> {
        HasValue {
            id: self.key.clone(),
            claim: self.clone(),
            expected,
            max_age_seconds,
        }
    }
}

pub type BooleanClaim = PrimitiveClaim<bool>;

impl PrimitiveClaim<bool> {
    #[must_use]
    pub fn is_true(&self) -> HasValue<bool> {
        self.has_value(true)
    }

    #[must_use]
    pub fn is_false(&self) -> HasValue<bool> {
        self.has_value(false)
    }
}

/// Why a validator rejected a payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "message")]
pub enum ClaimValidationReason {
    #[serde(rename = "value does not exist", rename_all = "camelCase")]
    ValueDoesNotExist { expected_value: Value },
    #[serde(rename = "expired", rename_all = "camelCase")]
    Expired {
        age_in_seconds: u64,
        max_age_in_seconds: u64,
    },
    #[serde(rename = "wrong value", rename_all = "camelCase")]
    WrongValue {
        expected_value: Value,
        actual_value: Value,
    },
}

impl ClaimValidationReason {
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::ValueDoesNotExist { .. } => "value does not exist",
            Self::Expired { .. } => "expired",
            Self::WrongValue { .. } => "wrong value",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimValidationResult {
    pub is_valid: bool,
    pub reason: Option<ClaimValidationReason>,
}

impl ClaimValidationResult {
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn invalid(reason: ClaimValidationReason) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
        }
    }
}

/// A failed validator, as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimValidationError {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ClaimValidationReason>,
}

/// Object-safe validator interface so different claim types can be checked together.
#[async_trait]
pub trait SessionClaimValidator: Send + Sync {
    fn id(&self) -> &str;

    fn claim_key(&self) -> &str;

    fn should_refetch(&self, payload: &Payload, now_millis: u64) -> bool;

    fn validate(&self, payload: &Payload, now_millis: u64) -> ClaimValidationResult;

    /// Fetch a fresh value for `user_id` and store it in `payload`.
    async fn refetch(&self, user_id: &str, payload: &mut Payload, now_millis: u64) -> Result<()>;
}

/// Checks that a claim holds an expected value and is not older than a max age.
#[derive(Debug, Clone)]
pub struct HasValue<T> {
    id: String,
    claim: PrimitiveClaim<T>,
    expected: T,
    max_age_seconds: Option<u64>,
}

impl<T> HasValue<T> {
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn max_age_seconds(&self) -> Option<u64> {
        self.max_age_seconds
    }
}

#[async_trait]
impl<T> SessionClaimValidator for HasValue<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn claim_key(&self) -> &str {
        self.claim.key()
    }

    fn should_refetch(&self, payload: &Payload, now_millis: u64) -> bool {
        let Some(fetched_at) = self.claim.get_last_fetched_at(payload) else {
            return true;
        };
        self.max_age_seconds.is_some_and(|max_age| {
            now_millis.saturating_sub(fetched_at) > max_age.saturating_mul(1000)
        })
    }

    fn validate(&self, payload: &Payload, now_millis: u64) -> ClaimValidationResult {
        let expected_value = serde_json::to_value(&self.expected).unwrap_or(Value::Null);

        let Some(envelope) = self.claim.raw_envelope(payload) else {
            return ClaimValidationResult::invalid(ClaimValidationReason::ValueDoesNotExist {
                expected_value,
            });
        };

        if let Some(max_age_in_seconds) = self.max_age_seconds {
            let age_in_seconds = now_millis.saturating_sub(envelope.t) / 1000;
            if age_in_seconds > max_age_in_seconds {
                return ClaimValidationResult::invalid(ClaimValidationReason::Expired {
                    age_in_seconds,
                    max_age_in_seconds,
                });
            }
        }

        let matches = serde_json::from_value::<T>(envelope.v.clone())
            .is_ok_and(|actual| actual == self.expected);
        if !matches {
            return ClaimValidationResult::invalid(ClaimValidationReason::WrongValue {
                expected_value,
                actual_value: envelope.v,
            });
        }

        ClaimValidationResult::valid()
    }

    async fn refetch(&self, user_id: &str, payload: &mut Payload, now_millis: u64) -> Result<()> {
        if let Some(value) = self.claim.fetch_value(user_id).await? {
            self.claim.add_to_payload(payload, &value, now_millis)?;
        }
        Ok(())
    }
}

/// Run every validator against `payload` and collect the failures.
#[must_use]
pub fn validate_claims(
    payload: &Payload,
    validators: &[Arc<dyn SessionClaimValidator>],
    now_millis: u64,
) -> Vec<ClaimValidationError> {
    validators
        .iter()
        .filter_map(|validator| {
            let result = validator.validate(payload, now_millis);
            (!result.is_valid).then(|| ClaimValidationError {
                id: validator.id().to_string(),
                reason: result.reason,
            })
        })
        .collect()
}
