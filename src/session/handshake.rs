use super::recipe::RECIPE_ID;
use crate::clock;
use crate::error::{Error, Result};
use crate::querier::Querier;
use crate::token::{SigningKeyResolver, StaticKey};
use parking_lot::RwLock;
use rsa::RsaPublicKey;
use serde_json::{json, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CachedKey {
    key: StaticKey,
    expiry_time: u64,
}

/// Signing key handed out by the core.
///
/// Loaded with [`CoreKeyResolver::load`] and kept up to date from the keys the
/// core attaches to session create and refresh responses.
#[derive(Debug, Default)]
pub struct CoreKeyResolver {
    cached: RwLock<Option<CachedKey>>,
}

impl CoreKeyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the current signing key from the core.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response carries no usable key.
    pub async fn load(&self, querier: &Querier) -> Result<()> {
        let response = querier
            .with_rid(RECIPE_ID)
            .send_post_request("/recipe/handshake", &json!({}))
            .await?;

        let key = response
            .get("jwtSigningPublicKey")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::UnexpectedResponse("handshake response has no signing key".to_string())
            })?;
        let expiry_time = response
            .get("jwtSigningPublicKeyExpiryTime")
            .and_then(Value::as_u64)
            .unwrap_or(u64::MAX);

        self.set(key, expiry_time)
    }

    /// # Errors
    ///
    /// Returns `Error::Config` if `key` is not an RSA public key.
    pub fn set(&self, key: &str, expiry_time: u64) -> Result<()> {
        let key = StaticKey::from_core_string(key)?;
        *self.cached.write() = Some(CachedKey { key, expiry_time });
        debug!("core signing key updated, expires at {expiry_time}");
        Ok(())
    }

    #[must_use]
    pub fn expiry_time(&self) -> Option<u64> {
        self.cached.read().as_ref().map(|cached| cached.expiry_time)
    }

    /// `true` when no key is cached or the cached one has expired; call [`Self::load`] again.
    #[must_use]
    pub fn needs_reload(&self) -> bool {
        self.expiry_time()
            .map_or(true, |expiry_time| clock::now_millis() >= expiry_time)
    }
}

impl SigningKeyResolver for CoreKeyResolver {
    fn resolve(&self, _kid: Option<&str>) -> Result<RsaPublicKey> {
        let cached = self.cached.read();
        let cached = cached
            .as_ref()
            .ok_or_else(|| Error::TokenInvalid("signing key not loaded".to_string()))?;
        if clock::now_millis() >= cached.expiry_time {
            return Err(Error::TokenInvalid(format!(
                "signing key expired at {}",
                cached.expiry_time
            )));
        }
        Ok(cached.key.public_key().clone())
    }

    fn update_from_core(&self, key: &str, expiry_time: u64) {
        if let Err(err) = self.set(key, expiry_time) {
            warn!("ignoring signing key from core: {err}");
        }
    }
}
