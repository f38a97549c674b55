//! Email verification through the core.
//!
//! The core issues single-use verification tokens and records verified
//! addresses. This module builds the verification link, hands it to a
//! [`DeliverySender`], and exposes the verified flag as a session claim.

use crate::claims::{BooleanClaim, PrimitiveClaim};
use crate::delivery::{DeliveryMessage, DeliverySender};
use crate::error::{Error, Result};
use crate::querier::Querier;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const RECIPE_ID: &str = "emailverification";
pub const EMAIL_VERIFIED_CLAIM_KEY: &str = "st-ev";
pub const EMAIL_VERIFICATION_TEMPLATE: &str = "email-verification";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub user_id: String,
    pub email: String,
}

/// Looks up the email address of a user, if they have one.
#[async_trait]
pub trait EmailForUser: Send + Sync {
    async fn email_for_user(&self, user_id: &str) -> Result<Option<String>>;
}

#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

#[derive(Clone)]
pub struct EmailVerification {
    querier: Querier,
    sender: Arc<dyn DeliverySender>,
    website_domain: String,
    app_name: String,
}

impl EmailVerification {
    #[must_use]
    pub fn new(
        querier: &Querier,
        sender: Arc<dyn DeliverySender>,
        website_domain: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            querier: querier.with_rid(RECIPE_ID),
            sender,
            website_domain: website_domain.into(),
            app_name: app_name.into(),
        }
    }

    /// Link the user follows to confirm their address.
    #[must_use]
    pub fn verification_url(&self, token: &str) -> String {
        format!(
            "{}/verify-email?token={token}&rid={RECIPE_ID}",
            self.website_domain.trim_end_matches('/')
        )
    }

    /// `None` when the address is already verified.
    ///
    /// # Errors
    ///
    /// Returns an error if the core call fails.
    pub async fn create_email_verification_token(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<Option<String>> {
        let path = "/recipe/user/email/verify/token";
        let response = self
            .querier
            .send_post_request(path, &json!({"userId": user_id, "email": email}))
            .await?;

        match response.get("status").and_then(Value::as_str) {
            Some("OK") => response
                .get("token")
                .and_then(Value::as_str)
                .map(|token| Some(token.to_string()))
                .ok_or_else(|| Error::UnexpectedResponse(format!("{path} returned no token"))),
            Some("EMAIL_ALREADY_VERIFIED_ERROR") => Ok(None),
            other => Err(Error::UnexpectedResponse(format!(
                "{path} returned status {other:?}"
            ))),
        }
    }

    /// Create a token and send the verification link.
    ///
    /// Returns `false` when the address was already verified and nothing was sent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Delivery` for an invalid address or a failed send, or a core error.
    #[instrument(skip(self))]
    pub async fn send_verification_email(&self, user_id: &str, email: &str) -> Result<bool> {
        let email = email.trim();
        if !valid_email(email) {
            return Err(Error::Delivery(format!("invalid email address: {email}")));
        }

        let Some(token) = self.create_email_verification_token(user_id, email).await? else {
            debug!("email already verified, nothing to send");
            return Ok(false);
        };

        let message = DeliveryMessage::new(email, EMAIL_VERIFICATION_TEMPLATE)
            .with_param("appName", self.app_name.as_str())
            .with_param("emailVerifyURL", self.verification_url(&token));
        self.sender.send(&message).await?;
        Ok(true)
    }

    /// `None` when the token is unknown or was already used.
    ///
    /// # Errors
    ///
    /// Returns an error if the core call fails.
    pub async fn verify_email_using_token(&self, token: &str) -> Result<Option<VerifiedUser>> {
        let path = "/recipe/user/email/verify";
        let response = self
            .querier
            .send_post_request(path, &json!({"method": "token", "token": token}))
            .await?;

        match response.get("status").and_then(Value::as_str) {
            Some("OK") => {
                let field = |key: &str| {
                    response
                        .get(key)
                        .and_then(Value::as_str)
                        .map(ToString::to_string)
                        .ok_or_else(|| Error::UnexpectedResponse(format!("{path} returned no {key}")))
                };
                Ok(Some(VerifiedUser {
                    user_id: field("userId")?,
                    email: field("email")?,
                }))
            }
            Some("EMAIL_VERIFICATION_INVALID_TOKEN_ERROR") => Ok(None),
            other => Err(Error::UnexpectedResponse(format!(
                "{path} returned status {other:?}"
            ))),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the core call fails.
    pub async fn is_email_verified(&self, user_id: &str, email: &str) -> Result<bool> {
        let response = self
            .querier
            .send_get_request(
                "/recipe/user/email/verify",
                &[("userId", user_id), ("email", email)],
            )
            .await?;
        Ok(response
            .get("isVerified")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Session claim holding whether the user's email is verified.
    ///
    /// Users without an email address count as verified.
    #[must_use]
    pub fn email_verified_claim(&self, emails: Arc<dyn EmailForUser>) -> BooleanClaim {
        let verification = self.clone();
        PrimitiveClaim::new(EMAIL_VERIFIED_CLAIM_KEY, move |user_id: String| {
            let verification = verification.clone();
            let emails = Arc::clone(&emails);
            async move {
                let verified = match emails.email_for_user(&user_id).await? {
                    Some(email) => verification.is_email_verified(&user_id, &email).await?,
                    None => true,
                };
                Ok::<_, Error>(Some(verified))
            }
        })
    }
}
