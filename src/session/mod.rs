//! Session protocol.
//!
//! Access tokens are verified locally on every request. Only refresh, payload
//! updates and revocation go to the core, through the [`RecipeInterface`]
//! stack.
//!
//! Concurrent refreshes of the same session are not serialised here. The core
//! must allow at most one successful rotation per refresh token; a second
//! caller presenting the same token is then reported as theft.

pub mod chain;
pub mod handshake;
pub mod jwt;
pub mod recipe;
mod state;

pub use chain::{hash_refresh_token, RefreshChainLink};
pub use handshake::CoreKeyResolver;
pub use jwt::{JwtLayer, JWT_PROPERTY_NAME_KEY};
pub use recipe::{CoreRecipe, RecipeInterface, RecipeLayer, RecipeStack};
pub use state::{SessionEvent, SessionState};

use crate::claims::{self, ClaimValidationError, PrimitiveClaim, SessionClaimValidator};
use crate::clock;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::querier::Querier;
use crate::token::{verify_access_token, AccessTokenPayload, SigningKeyResolver};
use crate::Payload;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub token: SecretString,
    pub expiry: u64,
    pub created_time: u64,
}

/// What the core returns when it mints a token pair.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_handle: String,
    pub user_id: String,
    pub access_token_payload: Payload,
    pub access_token: TokenInfo,
    pub refresh_token: TokenInfo,
    pub anti_csrf_token: Option<String>,
    /// Signing key and its expiry, when the core attaches them.
    pub core_signing_key: Option<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionInformation {
    pub session_handle: String,
    pub user_id: String,
    pub session_data: Payload,
    pub access_token_payload: Payload,
    pub expiry: u64,
    pub time_created: u64,
}

#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: TokenInfo,
    /// Only known for sessions that were created or refreshed in this process.
    pub refresh_token: Option<TokenInfo>,
    pub anti_csrf_token: Option<String>,
}

/// A session held by the application.
#[derive(Debug, Clone)]
pub struct Session {
    handle: String,
    user_id: String,
    access_token_payload: Payload,
    tokens: SessionTokens,
    chain: RefreshChainLink,
    state: SessionState,
}

impl Session {
    fn from_verified(payload: AccessTokenPayload, tokens: SessionTokens) -> Self {
        Self {
            chain: RefreshChainLink::from_payload(&payload),
            handle: payload.session_handle,
            user_id: payload.user_id,
            access_token_payload: payload.user_data,
            tokens,
            state: SessionState::Active,
        }
    }

    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn access_token_payload(&self) -> &Payload {
        &self.access_token_payload
    }

    #[must_use]
    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    #[must_use]
    pub fn chain(&self) -> &RefreshChainLink {
        &self.chain
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn apply(&mut self, event: SessionEvent) -> SessionState {
        self.state = self.state.on(event);
        self.state
    }

    /// Re-check the access token locally; a refreshable failure moves the session to `Stale`.
    ///
    /// # Errors
    ///
    /// Returns the verification error.
    pub fn verify(&mut self, protocol: &SessionProtocol) -> Result<()> {
        let result = protocol.verify_session(
            self.tokens.access_token.token.expose_secret(),
            self.tokens.anti_csrf_token.as_deref(),
            false,
        );
        match result {
            Ok(payload) => {
                self.access_token_payload = payload.user_data;
                Ok(())
            }
            Err(err) => {
                if err.is_try_refresh() {
                    self.apply(SessionEvent::LocalVerificationFailed);
                }
                Err(err)
            }
        }
    }

    /// Rotate the token pair through the core, driving the state machine.
    ///
    /// # Errors
    ///
    /// `Error::TokenTheftDetected` leaves the session `Revoked`, `Error::Unauthorised`
    /// leaves it `Failed`; other errors put it back to `Stale`.
    pub async fn refresh(&mut self, protocol: &SessionProtocol) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::Unauthorised(format!(
                "session {} is no longer usable",
                self.handle
            )));
        }
        let Some(refresh_token) = self.tokens.refresh_token.clone() else {
            return Err(Error::Unauthorised(
                "no refresh token held for this session".to_string(),
            ));
        };

        self.apply(SessionEvent::RefreshStarted);
        let result = protocol
            .refresh_session(
                refresh_token.token.expose_secret(),
                self.tokens.anti_csrf_token.as_deref(),
            )
            .await;

        match result {
            Ok(refreshed) => {
                let state = self.state;
                *self = refreshed;
                self.state = state;
                self.apply(SessionEvent::Rotated);
                Ok(())
            }
            Err(err) => {
                let event = match &err {
                    Error::TokenTheftDetected { .. } => SessionEvent::TheftDetected,
                    Error::Unauthorised(_) => SessionEvent::RefreshRejected,
                    _ => SessionEvent::RefreshAborted,
                };
                self.apply(event);
                Err(err)
            }
        }
    }

    /// Revoke this session at the core.
    ///
    /// # Errors
    ///
    /// Returns an error if the core cannot be reached.
    pub async fn revoke(&mut self, protocol: &SessionProtocol) -> Result<()> {
        protocol.revoke_session(&self.handle).await?;
        self.apply(SessionEvent::Revoked);
        Ok(())
    }
}

/// Session operations for one application.
#[derive(Clone)]
pub struct SessionProtocol {
    recipe: Arc<dyn RecipeInterface>,
    keys: Arc<dyn SigningKeyResolver>,
    config: SessionConfig,
}

impl SessionProtocol {
    /// Build the default recipe stack: the core recipe, plus the JWT layer when configured.
    #[must_use]
    pub fn new(querier: &Querier, config: SessionConfig, keys: Arc<dyn SigningKeyResolver>) -> Self {
        let mut stack = RecipeStack::new(Arc::new(CoreRecipe::new(
            querier,
            config.enable_anti_csrf(),
        )));
        if let Some(jwt) = config.jwt() {
            stack = stack.layer(JwtLayer::new(
                querier,
                jwt.clone(),
                config.access_token_validity_seconds(),
            ));
        }
        Self::from_recipe(stack.build(), config, keys)
    }

    /// Use an already assembled recipe stack.
    #[must_use]
    pub fn from_recipe(
        recipe: Arc<dyn RecipeInterface>,
        config: SessionConfig,
        keys: Arc<dyn SigningKeyResolver>,
    ) -> Self {
        Self {
            recipe,
            keys,
            config,
        }
    }

    /// Wrap the current recipe stack with one more layer.
    #[must_use]
    pub fn with_layer(mut self, layer: impl RecipeLayer) -> Self {
        self.recipe = layer.wrap(self.recipe);
        self
    }

    #[must_use]
    pub fn recipe(&self) -> &Arc<dyn RecipeInterface> {
        &self.recipe
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn session_from_created(&self, created: CreatedSession) -> Result<Session> {
        if let Some((key, expiry_time)) = &created.core_signing_key {
            self.keys.update_from_core(key, *expiry_time);
        }
        let payload = verify_access_token(
            created.access_token.token.expose_secret(),
            self.keys.as_ref(),
            false,
            clock::now_millis(),
        )?;
        let mut session = Session::from_verified(
            payload,
            SessionTokens {
                access_token: created.access_token,
                refresh_token: Some(created.refresh_token),
                anti_csrf_token: created.anti_csrf_token,
            },
        );
        // A layer may have rewritten the payload after the core issued the token.
        if !created.access_token_payload.is_empty() {
            session.access_token_payload = created.access_token_payload;
        }
        Ok(session)
    }

    /// Mint the first token pair for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the core call fails or the returned access token does not verify.
    #[instrument(skip(self, access_token_payload, session_data))]
    pub async fn create_new_session(
        &self,
        user_id: &str,
        access_token_payload: Payload,
        session_data: Payload,
    ) -> Result<Session> {
        let created = self
            .recipe
            .create_new_session(user_id, access_token_payload, session_data)
            .await?;
        let session = self.session_from_created(created)?;
        debug!("created session {}", session.handle());
        Ok(session)
    }

    /// Verify an access token without contacting the core.
    ///
    /// # Errors
    ///
    /// - `Error::TokenInvalid`, `Error::MalformedToken` or `Error::Expired`: refresh and retry,
    /// - `Error::AntiCsrfMismatch`: reject the request.
    pub fn verify_session(
        &self,
        access_token: &str,
        anti_csrf_token: Option<&str>,
        do_anti_csrf_check: bool,
    ) -> Result<AccessTokenPayload> {
        let check_anti_csrf = do_anti_csrf_check && self.config.enable_anti_csrf();
        let payload = verify_access_token(
            access_token,
            self.keys.as_ref(),
            check_anti_csrf,
            clock::now_millis(),
        )?;

        if check_anti_csrf && payload.anti_csrf_token.as_deref() != anti_csrf_token {
            return Err(Error::AntiCsrfMismatch);
        }
        Ok(payload)
    }

    /// [`SessionProtocol::verify_session`] wrapped into a [`Session`].
    ///
    /// # Errors
    ///
    /// See [`SessionProtocol::verify_session`].
    pub fn get_session(
        &self,
        access_token: &str,
        anti_csrf_token: Option<&str>,
        do_anti_csrf_check: bool,
    ) -> Result<Session> {
        let payload = self.verify_session(access_token, anti_csrf_token, do_anti_csrf_check)?;
        let access_token = TokenInfo {
            token: SecretString::from(access_token.to_string()),
            expiry: payload.expiry_time,
            created_time: payload.time_created,
        };
        let anti_csrf_token = payload.anti_csrf_token.clone();
        Ok(Session::from_verified(
            payload,
            SessionTokens {
                access_token,
                refresh_token: None,
                anti_csrf_token,
            },
        ))
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// The new access token must name the submitted token's hash as its
    /// parent. Concurrent refreshes with the same token rely on the core to
    /// let only one of them rotate.
    ///
    /// # Errors
    ///
    /// - `Error::TokenTheftDetected` when an already rotated token is replayed,
    /// - `Error::Unauthorised` when the core rejects the token or the chain does not continue.
    #[instrument(skip_all)]
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        anti_csrf_token: Option<&str>,
    ) -> Result<Session> {
        let submitted_hash1 = hash_refresh_token(refresh_token);
        let created = self
            .recipe
            .refresh_session(refresh_token, anti_csrf_token)
            .await?;
        let new_refresh_token = created.refresh_token.token.clone();
        let session = self.session_from_created(created)?;

        let link = session.chain();
        if !link.is_successor_of(&submitted_hash1)
            || !link.is_current(new_refresh_token.expose_secret())
        {
            warn!(
                "refresh of session {} does not continue the chain",
                session.handle()
            );
            return Err(Error::Unauthorised(
                "refreshed session does not continue the refresh chain".to_string(),
            ));
        }

        debug!("rotated session {}", session.handle());
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns an error if the core call fails.
    pub async fn get_session_information(
        &self,
        session_handle: &str,
    ) -> Result<Option<SessionInformation>> {
        self.recipe.get_session_information(session_handle).await
    }

    /// Fetch the current access token payload, apply `mutator`, and store the result.
    ///
    /// Returns `false` when the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a core call fails.
    #[instrument(skip(self, mutator))]
    pub async fn update_access_token_payload<F>(&self, session_handle: &str, mutator: F) -> Result<bool>
    where
        F: FnOnce(&mut Payload) + Send,
    {
        let Some(info) = self.recipe.get_session_information(session_handle).await? else {
            return Ok(false);
        };
        let mut payload = info.access_token_payload;
        mutator(&mut payload);
        self.recipe
            .update_access_token_payload(session_handle, payload)
            .await
    }

    /// Merge `update` into the stored payload. A `null` value deletes its key.
    ///
    /// # Errors
    ///
    /// Returns an error if a core call fails.
    pub async fn merge_into_access_token_payload(
        &self,
        session_handle: &str,
        update: Payload,
    ) -> Result<bool> {
        self.update_access_token_payload(session_handle, move |payload| {
            merge_payload(payload, update);
        })
        .await
    }

    /// # Errors
    ///
    /// Returns an error if the core call fails.
    pub async fn update_session_data(&self, session_handle: &str, session_data: Payload) -> Result<bool> {
        self.recipe
            .update_session_data(session_handle, session_data)
            .await
    }

    /// Revoke one session. Unknown or already revoked handles are not an error.
    ///
    /// Returns whether this call revoked it.
    ///
    /// # Errors
    ///
    /// Returns an error if the core call fails.
    #[instrument(skip(self))]
    pub async fn revoke_session(&self, session_handle: &str) -> Result<bool> {
        let revoked = self
            .recipe
            .revoke_sessions(&[session_handle.to_string()])
            .await?;
        Ok(revoked.iter().any(|handle| handle == session_handle))
    }

    /// # Errors
    ///
    /// Returns an error if the core call fails.
    pub async fn revoke_multiple_sessions(&self, session_handles: &[String]) -> Result<Vec<String>> {
        self.recipe.revoke_sessions(session_handles).await
    }

    /// # Errors
    ///
    /// Returns an error if the core call fails.
    pub async fn revoke_all_sessions_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.recipe.revoke_all_sessions_for_user(user_id).await
    }

    /// # Errors
    ///
    /// Returns an error if the core call fails.
    pub async fn get_all_session_handles_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.recipe.get_all_session_handles_for_user(user_id).await
    }

    /// Fetch `claim` for the session's user and store it in the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetcher or a core call fails.
    pub async fn fetch_and_set_claim<T>(&self, session_handle: &str, claim: &PrimitiveClaim<T>) -> Result<bool>
    where
        T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
    {
        let Some(info) = self.recipe.get_session_information(session_handle).await? else {
            return Ok(false);
        };
        let mut payload = info.access_token_payload;
        if let Some(value) = claim.fetch_value(&info.user_id).await? {
            claim.add_to_payload(&mut payload, &value, clock::now_millis())?;
        }
        self.recipe
            .update_access_token_payload(session_handle, payload)
            .await
    }

    /// # Errors
    ///
    /// Returns an error if the value cannot be serialised or a core call fails.
    pub async fn set_claim_value<T>(
        &self,
        session_handle: &str,
        claim: &PrimitiveClaim<T>,
        value: &T,
    ) -> Result<bool>
    where
        T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
    {
        let mut update = Payload::new();
        claim.add_to_payload(&mut update, value, clock::now_millis())?;
        self.merge_into_access_token_payload(session_handle, update)
            .await
    }

    /// # Errors
    ///
    /// Returns an error if a core call fails.
    pub async fn remove_claim<T>(&self, session_handle: &str, claim: &PrimitiveClaim<T>) -> Result<bool>
    where
        T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
    {
        let mut update = Payload::new();
        claim.remove_from_payload_by_merge(&mut update);
        self.merge_into_access_token_payload(session_handle, update)
            .await
    }

    /// # Errors
    ///
    /// Returns `Error::Unauthorised` if the session does not exist.
    pub async fn get_claim_value<T>(&self, session_handle: &str, claim: &PrimitiveClaim<T>) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
    {
        let info = self
            .recipe
            .get_session_information(session_handle)
            .await?
            .ok_or_else(|| Error::Unauthorised(format!("session {session_handle} does not exist")))?;
        Ok(claim.get_value(&info.access_token_payload))
    }

    /// Check `payload` against `validators`. An empty result means every check passed.
    #[must_use]
    pub fn validate_claims(
        &self,
        payload: &Payload,
        validators: &[Arc<dyn SessionClaimValidator>],
        now_millis: u64,
    ) -> Vec<ClaimValidationError> {
        claims::validate_claims(payload, validators, now_millis)
    }

    /// Refetch stale claims, persist them, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a fetcher or a core call fails.
    #[instrument(skip(self, session, validators), fields(session = %session.handle()))]
    pub async fn validate_claims_for_session(
        &self,
        session: &mut Session,
        validators: &[Arc<dyn SessionClaimValidator>],
    ) -> Result<Vec<ClaimValidationError>> {
        let now = clock::now_millis();
        let mut payload = session.access_token_payload.clone();

        for validator in validators {
            if validator.should_refetch(&payload, now) {
                debug!("refetching claim {}", validator.claim_key());
                validator.refetch(&session.user_id, &mut payload, now).await?;
            }
        }

        if payload != session.access_token_payload {
            self.recipe
                .update_access_token_payload(&session.handle, payload.clone())
                .await?;
            session.access_token_payload = payload;
        }

        Ok(self.validate_claims(&session.access_token_payload, validators, now))
    }

    /// [`SessionProtocol::validate_claims_for_session`], failing on any invalid claim.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidClaims` listing the failed validators.
    pub async fn assert_claims(
        &self,
        session: &mut Session,
        validators: &[Arc<dyn SessionClaimValidator>],
    ) -> Result<()> {
        let failures = self.validate_claims_for_session(session, validators).await?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidClaims(failures))
        }
    }
}

fn merge_payload(payload: &mut Payload, update: Payload) {
    for (key, value) in update {
        if value == Value::Null {
            payload.remove(&key);
        } else {
            payload.insert(key, value);
        }
    }
}
