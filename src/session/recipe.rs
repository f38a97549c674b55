//! Core-facing session operations and the decorator stack around them.
//!
//! [`CoreRecipe`] talks to the core. Layers ([`RecipeLayer`]) wrap a recipe and
//! delegate to it, overriding only what they need. [`RecipeStack`] applies
//! layers in order, so the last one added sees calls first.

use super::chain::hash_refresh_token;
use super::{CreatedSession, SessionInformation, TokenInfo};
use crate::error::{Error, Result};
use crate::querier::Querier;
use crate::Payload;
use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

pub const RECIPE_ID: &str = "session";

#[async_trait]
pub trait RecipeInterface: Send + Sync {
    async fn create_new_session(
        &self,
        user_id: &str,
        access_token_payload: Payload,
        session_data: Payload,
    ) -> Result<CreatedSession>;

    /// Exchange a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// `Error::TokenTheftDetected` when the token was already rotated out,
    /// `Error::Unauthorised` when the core does not know it.
    async fn refresh_session(
        &self,
        refresh_token: &str,
        anti_csrf_token: Option<&str>,
    ) -> Result<CreatedSession>;

    /// `None` when the session does not exist.
    async fn get_session_information(&self, session_handle: &str)
        -> Result<Option<SessionInformation>>;

    /// Replace the access token payload. `false` when the session does not exist.
    async fn update_access_token_payload(
        &self,
        session_handle: &str,
        access_token_payload: Payload,
    ) -> Result<bool>;

    /// Replace the server-side session data. `false` when the session does not exist.
    async fn update_session_data(&self, session_handle: &str, session_data: Payload)
        -> Result<bool>;

    /// Returns the handles that were actually revoked.
    async fn revoke_sessions(&self, session_handles: &[String]) -> Result<Vec<String>>;

    async fn revoke_all_sessions_for_user(&self, user_id: &str) -> Result<Vec<String>>;

    async fn get_all_session_handles_for_user(&self, user_id: &str) -> Result<Vec<String>>;
}

/// Wraps a recipe with extra behaviour.
pub trait RecipeLayer: Send + Sync {
    fn wrap(&self, inner: Arc<dyn RecipeInterface>) -> Arc<dyn RecipeInterface>;
}

impl<F> RecipeLayer for F
where
    F: Fn(Arc<dyn RecipeInterface>) -> Arc<dyn RecipeInterface> + Send + Sync,
{
    fn wrap(&self, inner: Arc<dyn RecipeInterface>) -> Arc<dyn RecipeInterface> {
        (self)(inner)
    }
}

pub struct RecipeStack {
    base: Arc<dyn RecipeInterface>,
    layers: Vec<Box<dyn RecipeLayer>>,
}

impl RecipeStack {
    #[must_use]
    pub fn new(base: Arc<dyn RecipeInterface>) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    #[must_use]
    pub fn layer(mut self, layer: impl RecipeLayer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<dyn RecipeInterface> {
        self.layers
            .iter()
            .fold(self.base, |inner, layer| layer.wrap(inner))
    }
}

/// Session operations backed by the core's `/recipe/session` endpoints.
#[derive(Debug, Clone)]
pub struct CoreRecipe {
    querier: Querier,
    enable_anti_csrf: bool,
}

impl CoreRecipe {
    #[must_use]
    pub fn new(querier: &Querier, enable_anti_csrf: bool) -> Self {
        Self {
            querier: querier.with_rid(RECIPE_ID),
            enable_anti_csrf,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireToken {
    token: String,
    expiry: u64,
    created_time: u64,
}

impl From<WireToken> for TokenInfo {
    fn from(wire: WireToken) -> Self {
        Self {
            token: SecretString::from(wire.token),
            expiry: wire.expiry,
            created_time: wire.created_time,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSession {
    handle: String,
    user_id: String,
    #[serde(default, rename = "userDataInJWT")]
    user_data_in_jwt: Payload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCreatedSession {
    session: WireSession,
    access_token: WireToken,
    refresh_token: WireToken,
    #[serde(default)]
    anti_csrf_token: Option<String>,
    #[serde(default)]
    jwt_signing_public_key: Option<String>,
    #[serde(default)]
    jwt_signing_public_key_expiry_time: Option<u64>,
}

impl From<WireCreatedSession> for CreatedSession {
    fn from(wire: WireCreatedSession) -> Self {
        let core_signing_key = wire
            .jwt_signing_public_key
            .zip(wire.jwt_signing_public_key_expiry_time);
        Self {
            session_handle: wire.session.handle,
            user_id: wire.session.user_id,
            access_token_payload: wire.session.user_data_in_jwt,
            access_token: wire.access_token.into(),
            refresh_token: wire.refresh_token.into(),
            anti_csrf_token: wire.anti_csrf_token,
            core_signing_key,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSessionInformation {
    session_handle: String,
    user_id: String,
    #[serde(default, rename = "userDataInDatabase")]
    session_data: Payload,
    #[serde(default, rename = "userDataInJWT")]
    access_token_payload: Payload,
    expiry: u64,
    time_created: u64,
}

fn status(response: &Payload) -> &str {
    response.get("status").and_then(Value::as_str).unwrap_or("")
}

fn unexpected(path: &str, response: &Payload) -> Error {
    Error::UnexpectedResponse(format!(
        "{path} returned status '{}'",
        status(response)
    ))
}

fn parse<T: for<'de> Deserialize<'de>>(response: Payload) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(response))?)
}

fn string_list(response: &Payload, key: &str) -> Vec<String> {
    response
        .get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl RecipeInterface for CoreRecipe {
    async fn create_new_session(
        &self,
        user_id: &str,
        access_token_payload: Payload,
        session_data: Payload,
    ) -> Result<CreatedSession> {
        let path = "/recipe/session";
        let response = self
            .querier
            .send_post_request(
                path,
                &json!({
                    "userId": user_id,
                    "userDataInJWT": access_token_payload,
                    "userDataInDatabase": session_data,
                    "enableAntiCsrf": self.enable_anti_csrf,
                }),
            )
            .await?;

        if status(&response) != "OK" {
            return Err(unexpected(path, &response));
        }
        Ok(parse::<WireCreatedSession>(response)?.into())
    }

    async fn refresh_session(
        &self,
        refresh_token: &str,
        anti_csrf_token: Option<&str>,
    ) -> Result<CreatedSession> {
        let path = "/recipe/session/refresh";
        let response = self
            .querier
            .send_post_request(
                path,
                &json!({
                    "refreshToken": refresh_token,
                    "refreshTokenHash1": hash_refresh_token(refresh_token),
                    "antiCsrfToken": anti_csrf_token,
                    "enableAntiCsrf": self.enable_anti_csrf,
                }),
            )
            .await?;

        match status(&response) {
            "OK" => Ok(parse::<WireCreatedSession>(response)?.into()),
            "UNAUTHORISED" => Err(Error::Unauthorised(
                response
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("refresh token rejected")
                    .to_string(),
            )),
            "TOKEN_THEFT_DETECTED" => {
                let session = response.get("session");
                let field = |key: &str| {
                    session
                        .and_then(|s| s.get(key))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                let session_handle = field("handle");
                let user_id = field("userId");
                warn!("token theft detected for session {session_handle}");
                Err(Error::TokenTheftDetected {
                    session_handle,
                    user_id,
                })
            }
            _ => Err(unexpected(path, &response)),
        }
    }

    async fn get_session_information(
        &self,
        session_handle: &str,
    ) -> Result<Option<SessionInformation>> {
        let path = "/recipe/session";
        let response = self
            .querier
            .send_get_request(path, &[("sessionHandle", session_handle)])
            .await?;

        match status(&response) {
            "OK" => {
                let wire: WireSessionInformation = parse(response)?;
                Ok(Some(SessionInformation {
                    session_handle: wire.session_handle,
                    user_id: wire.user_id,
                    session_data: wire.session_data,
                    access_token_payload: wire.access_token_payload,
                    expiry: wire.expiry,
                    time_created: wire.time_created,
                }))
            }
            "UNAUTHORISED" => Ok(None),
            _ => Err(unexpected(path, &response)),
        }
    }

    async fn update_access_token_payload(
        &self,
        session_handle: &str,
        access_token_payload: Payload,
    ) -> Result<bool> {
        let path = "/recipe/jwt/data";
        let response = self
            .querier
            .send_put_request(
                path,
                &json!({
                    "sessionHandle": session_handle,
                    "userDataInJWT": access_token_payload,
                }),
            )
            .await?;

        match status(&response) {
            "OK" => Ok(true),
            "UNAUTHORISED" => Ok(false),
            _ => Err(unexpected(path, &response)),
        }
    }

    async fn update_session_data(
        &self,
        session_handle: &str,
        session_data: Payload,
    ) -> Result<bool> {
        let path = "/recipe/session/data";
        let response = self
            .querier
            .send_put_request(
                path,
                &json!({
                    "sessionHandle": session_handle,
                    "userDataInDatabase": session_data,
                }),
            )
            .await?;

        match status(&response) {
            "OK" => Ok(true),
            "UNAUTHORISED" => Ok(false),
            _ => Err(unexpected(path, &response)),
        }
    }

    async fn revoke_sessions(&self, session_handles: &[String]) -> Result<Vec<String>> {
        let response = self
            .querier
            .send_post_request(
                "/recipe/session/remove",
                &json!({ "sessionHandles": session_handles }),
            )
            .await?;
        Ok(string_list(&response, "sessionHandlesRevoked"))
    }

    async fn revoke_all_sessions_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let response = self
            .querier
            .send_post_request("/recipe/session/remove", &json!({ "userId": user_id }))
            .await?;
        Ok(string_list(&response, "sessionHandlesRevoked"))
    }

    async fn get_all_session_handles_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let response = self
            .querier
            .send_get_request("/recipe/session/user", &[("userId", user_id)])
            .await?;
        Ok(string_list(&response, "sessionHandles"))
    }
}
