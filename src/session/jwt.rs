//! Embedded third-party verifiable JWT.
//!
//! When enabled, the access token payload carries a JWT minted by the core
//! under a configurable property. The property name itself is stored under
//! [`JWT_PROPERTY_NAME_KEY`] so later updates can find it.

use super::recipe::{RecipeInterface, RecipeLayer};
use super::{CreatedSession, SessionInformation};
use crate::clock;
use crate::config::JwtConfig;
use crate::error::{Error, Result};
use crate::querier::Querier;
use crate::token::decode_unverified;
use crate::Payload;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const JWT_PROPERTY_NAME_KEY: &str = "_jwtPName";
const JWT_RECIPE_ID: &str = "jwt";

/// Adds the embedded JWT to the recipe below it.
#[derive(Debug, Clone)]
pub struct JwtLayer {
    querier: Querier,
    config: JwtConfig,
    access_token_validity_seconds: u64,
}

impl JwtLayer {
    #[must_use]
    pub fn new(querier: &Querier, config: JwtConfig, access_token_validity_seconds: u64) -> Self {
        Self {
            querier: querier.with_rid(JWT_RECIPE_ID),
            config,
            access_token_validity_seconds,
        }
    }

    /// Lifetime of the JWT minted with a new session.
    #[must_use]
    pub fn initial_validity_seconds(&self) -> u64 {
        self.config
            .validity_seconds()
            .map_or(self.access_token_validity_seconds, |requested| {
                requested.min(self.access_token_validity_seconds)
            })
    }
}

impl RecipeLayer for JwtLayer {
    fn wrap(&self, inner: Arc<dyn RecipeInterface>) -> Arc<dyn RecipeInterface> {
        Arc::new(JwtOverlay {
            inner,
            layer: self.clone(),
        })
    }
}

struct JwtOverlay {
    inner: Arc<dyn RecipeInterface>,
    layer: JwtLayer,
}

/// Seconds left on an existing JWT, never below one.
///
/// # Errors
///
/// Returns `Error::TokenInvalid` if the JWT cannot be decoded or has no `exp`.
pub fn remaining_validity_seconds(existing_jwt: &str, now_seconds: u64) -> Result<u64> {
    let claims = decode_unverified(existing_jwt)?;
    let exp = match claims.get("exp") {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        _ => None,
    }
    .ok_or_else(|| Error::TokenInvalid("embedded jwt has no exp".to_string()))?;
    Ok(exp.saturating_sub(now_seconds).max(1))
}

/// The property name and JWT embedded in `payload`, if any.
fn embedded_jwt(payload: &Payload) -> Option<(String, String)> {
    let name = payload.get(JWT_PROPERTY_NAME_KEY).and_then(Value::as_str)?;
    let jwt = payload.get(name).and_then(Value::as_str)?;
    Some((name.to_string(), jwt.to_string()))
}

impl JwtOverlay {
    async fn add_jwt(
        &self,
        mut payload: Payload,
        validity_seconds: u64,
        user_id: &str,
        property_name: &str,
    ) -> Result<Payload> {
        let mut claims = payload.clone();
        claims.remove(property_name);
        claims.remove(JWT_PROPERTY_NAME_KEY);
        claims.insert("sub".to_string(), json!(user_id));
        if let Some(issuer) = self.layer.config.issuer() {
            claims.insert("iss".to_string(), json!(issuer));
        }

        let response = self
            .layer
            .querier
            .send_post_request(
                "/recipe/jwt",
                &json!({
                    "payload": claims,
                    "validity": validity_seconds,
                    "algorithm": "RS256",
                    "jwksDomain": self.layer.config.issuer().unwrap_or_default(),
                }),
            )
            .await?;

        let jwt = match response.get("status").and_then(Value::as_str) {
            Some("OK") => response.get("jwt").and_then(Value::as_str),
            _ => None,
        }
        .ok_or_else(|| {
            Error::UnexpectedResponse(format!("jwt creation failed: {}", Value::Object(response.clone())))
        })?;

        debug!("embedded jwt issued for {validity_seconds}s");
        payload.insert(property_name.to_string(), json!(jwt));
        payload.insert(JWT_PROPERTY_NAME_KEY.to_string(), json!(property_name));
        Ok(payload)
    }
}

#[async_trait]
impl RecipeInterface for JwtOverlay {
    async fn create_new_session(
        &self,
        user_id: &str,
        access_token_payload: Payload,
        session_data: Payload,
    ) -> Result<CreatedSession> {
        let property_name = self.layer.config.property_name();
        if access_token_payload.contains_key(property_name) {
            return Err(Error::Config(format!(
                "{property_name} is already used in the access token payload"
            )));
        }
        let payload = self
            .add_jwt(
                access_token_payload,
                self.layer.initial_validity_seconds(),
                user_id,
                property_name,
            )
            .await?;
        self.inner
            .create_new_session(user_id, payload, session_data)
            .await
    }

    async fn refresh_session(
        &self,
        refresh_token: &str,
        anti_csrf_token: Option<&str>,
    ) -> Result<CreatedSession> {
        let mut created = self
            .inner
            .refresh_session(refresh_token, anti_csrf_token)
            .await?;
        let Some((property_name, _)) = embedded_jwt(&created.access_token_payload) else {
            return Ok(created);
        };

        // A rotated session gets a JWT with the full initial lifetime.
        let payload = self
            .add_jwt(
                created.access_token_payload.clone(),
                self.layer.initial_validity_seconds(),
                &created.user_id,
                &property_name,
            )
            .await?;
        if !self
            .inner
            .update_access_token_payload(&created.session_handle, payload.clone())
            .await?
        {
            return Err(Error::Unauthorised(format!(
                "session {} disappeared during refresh",
                created.session_handle
            )));
        }
        created.access_token_payload = payload;
        Ok(created)
    }

    async fn get_session_information(
        &self,
        session_handle: &str,
    ) -> Result<Option<SessionInformation>> {
        self.inner.get_session_information(session_handle).await
    }

    async fn update_access_token_payload(
        &self,
        session_handle: &str,
        access_token_payload: Payload,
    ) -> Result<bool> {
        let Some(info) = self.inner.get_session_information(session_handle).await? else {
            return Ok(false);
        };

        let payload = match embedded_jwt(&info.access_token_payload) {
            Some((property_name, jwt)) => {
                let validity = remaining_validity_seconds(&jwt, clock::now_seconds())?
                    .min(self.layer.initial_validity_seconds())
                    .max(1);
                self.add_jwt(access_token_payload, validity, &info.user_id, &property_name)
                    .await?
            }
            None => access_token_payload,
        };

        self.inner
            .update_access_token_payload(session_handle, payload)
            .await
    }

    async fn update_session_data(
        &self,
        session_handle: &str,
        session_data: Payload,
    ) -> Result<bool> {
        self.inner.update_session_data(session_handle, session_data).await
    }

    async fn revoke_sessions(&self, session_handles: &[String]) -> Result<Vec<String>> {
        self.inner.revoke_sessions(session_handles).await
    }

    async fn revoke_all_sessions_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.inner.revoke_all_sessions_for_user(user_id).await
    }

    async fn get_all_session_handles_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.inner.get_all_session_handles_for_user(user_id).await
    }
}
