//! Access token codec.
//!
//! Access tokens are compact RS256 JWS strings
//! (`base64url(header).base64url(payload).base64url(signature)`). Verification
//! is local: the signing key comes from a [`SigningKeyResolver`] and the clock
//! is passed in, so nothing here touches the network.

pub mod keys;
#[cfg(test)]
pub(crate) mod test_keys;

pub use keys::{Jwk, Jwks, SigningKeyResolver, StaticKey};

use crate::error::{Error, Result};
use crate::Payload;
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

const ALG_RS256: &str = "RS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl JwtHeader {
    fn rs256(kid: Option<&str>) -> Self {
        Self {
            alg: ALG_RS256.to_string(),
            typ: "JWT".to_string(),
            kid: kid.map(ToString::to_string),
        }
    }
}

/// Verified contents of an access token.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessTokenPayload {
    pub session_handle: String,
    pub user_id: String,
    pub refresh_token_hash1: String,
    pub parent_refresh_token_hash1: Option<String>,
    pub user_data: Payload,
    pub anti_csrf_token: Option<String>,
    pub expiry_time: u64,
    pub time_created: u64,
}

impl AccessTokenPayload {
    /// Pull the session fields out of a decoded claim set.
    ///
    /// Strings are trimmed; a field of the wrong type counts as absent.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedToken` when a required field is missing and
    /// `Error::AntiCsrfMismatch` when `anti_csrf_required` and the token has none.
    pub fn from_claims(claims: &Payload, anti_csrf_required: bool) -> Result<Self> {
        let session_handle = sanitize_string(claims.get("sessionHandle"));
        let user_id = sanitize_string(claims.get("userId"));
        let refresh_token_hash1 = sanitize_string(claims.get("refreshTokenHash1"));
        let parent_refresh_token_hash1 = sanitize_string(claims.get("parentRefreshTokenHash1"));
        let user_data = claims.get("userData").and_then(Value::as_object).cloned();
        let anti_csrf_token = sanitize_string(claims.get("antiCsrfToken"));
        let expiry_time = sanitize_millis(claims.get("expiryTime"));
        let time_created = sanitize_millis(claims.get("timeCreated"));

        let (
            Some(session_handle),
            Some(user_id),
            Some(refresh_token_hash1),
            Some(user_data),
            Some(expiry_time),
            Some(time_created),
        ) = (
            session_handle,
            user_id,
            refresh_token_hash1,
            user_data,
            expiry_time,
            time_created,
        )
        else {
            return Err(Error::MalformedToken);
        };

        if anti_csrf_required && anti_csrf_token.is_none() {
            return Err(Error::AntiCsrfMismatch);
        }

        Ok(Self {
            session_handle,
            user_id,
            refresh_token_hash1,
            parent_refresh_token_hash1,
            user_data,
            anti_csrf_token,
            expiry_time,
            time_created,
        })
    }

    /// Claim set in wire form, ready to be signed.
    #[must_use]
    pub fn to_claims(&self) -> Payload {
        let mut claims = Payload::new();
        claims.insert("sessionHandle".into(), self.session_handle.clone().into());
        claims.insert("userId".into(), self.user_id.clone().into());
        claims.insert(
            "refreshTokenHash1".into(),
            self.refresh_token_hash1.clone().into(),
        );
        if let Some(parent) = &self.parent_refresh_token_hash1 {
            claims.insert("parentRefreshTokenHash1".into(), parent.clone().into());
        }
        claims.insert("userData".into(), Value::Object(self.user_data.clone()));
        if let Some(anti_csrf) = &self.anti_csrf_token {
            claims.insert("antiCsrfToken".into(), anti_csrf.clone().into());
        }
        claims.insert("expiryTime".into(), self.expiry_time.into());
        claims.insert("timeCreated".into(), self.time_created.into());
        claims
    }
}

fn sanitize_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(|s| s.trim().to_string())
}

fn sanitize_millis(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        _ => None,
    }
}

struct DecodedToken<'a> {
    header: JwtHeader,
    payload: Payload,
    signing_input: &'a str,
    signature_b64: &'a str,
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str, what: &str) -> Result<T> {
    let bytes = Base64UrlUnpadded::decode_vec(s)
        .map_err(|_| Error::TokenInvalid(format!("invalid base64url {what}")))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::TokenInvalid(format!("invalid {what} json")))
}

fn decode_parts(token: &str) -> Result<DecodedToken<'_>> {
    let token = token.trim();
    let format_error = || Error::TokenInvalid("invalid token format".to_string());

    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or_else(format_error)?;
    let payload_b64 = parts.next().ok_or_else(format_error)?;
    let signature_b64 = parts.next().ok_or_else(format_error)?;
    if parts.next().is_some() {
        return Err(format_error());
    }

    let header: JwtHeader = b64d_json(header_b64, "header")?;
    let payload = match b64d_json::<Value>(payload_b64, "payload")? {
        Value::Object(map) => map,
        _ => return Err(Error::TokenInvalid("payload is not an object".to_string())),
    };

    Ok(DecodedToken {
        header,
        payload,
        signing_input: &token[..header_b64.len() + 1 + payload_b64.len()],
        signature_b64,
    })
}

fn verify_signature(decoded: &DecodedToken<'_>, keys: &dyn SigningKeyResolver) -> Result<()> {
    if decoded.header.alg != ALG_RS256 {
        return Err(Error::TokenInvalid(format!(
            "unsupported algorithm: {}",
            decoded.header.alg
        )));
    }

    let public_key = keys.resolve(decoded.header.kid.as_deref())?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature_bytes = Base64UrlUnpadded::decode_vec(decoded.signature_b64)
        .map_err(|_| Error::TokenInvalid("invalid base64url signature".to_string()))?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| Error::TokenInvalid("invalid signature".to_string()))?;

    verifying_key
        .verify(decoded.signing_input.as_bytes(), &signature)
        .map_err(|_| Error::TokenInvalid("invalid signature".to_string()))
}

/// Sign a claim set as an RS256 compact JWS.
///
/// # Errors
///
/// Returns an error if the private key cannot be parsed or the claims cannot be encoded.
pub fn sign_rs256(private_key_pem_or_der: &[u8], kid: Option<&str>, claims: &Payload) -> Result<String> {
    let header_b64 = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&JwtHeader::rs256(kid))?);
    let claims_b64 = Base64UrlUnpadded::encode_string(&serde_json::to_vec(claims)?);
    let signing_input = format!("{header_b64}.{claims_b64}");

    let private_key = keys::decode_private_key(private_key_pem_or_der)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Sign an access token payload.
///
/// # Errors
///
/// Returns an error if the private key cannot be parsed.
pub fn sign_access_token(
    private_key_pem_or_der: &[u8],
    kid: Option<&str>,
    payload: &AccessTokenPayload,
) -> Result<String> {
    sign_rs256(private_key_pem_or_der, kid, &payload.to_claims())
}

/// Check the signature and return the raw claims. No claim is validated.
///
/// # Errors
///
/// Returns `Error::TokenInvalid` on a structural or signature failure.
pub fn verify_rs256(token: &str, keys: &dyn SigningKeyResolver) -> Result<Payload> {
    let decoded = decode_parts(token)?;
    verify_signature(&decoded, keys)?;
    Ok(decoded.payload)
}

/// Read the claims of a compact JWS without checking its signature.
///
/// # Errors
///
/// Returns `Error::TokenInvalid` if the token is not structurally valid.
pub fn decode_unverified(token: &str) -> Result<Payload> {
    Ok(decode_parts(token)?.payload)
}

/// Verify an access token locally.
///
/// Checks run in this order: structure, expiry, signature, required fields,
/// anti-CSRF token presence. An expired token is reported as `Expired` even
/// when its signature would not verify.
///
/// # Errors
///
/// - `Error::TokenInvalid` for structural or signature failures,
/// - `Error::Expired` when `expiryTime <= now_millis`,
/// - `Error::MalformedToken` when a required field is missing,
/// - `Error::AntiCsrfMismatch` when `do_anti_csrf_check` and the token has no anti-CSRF token.
pub fn verify_access_token(
    token: &str,
    keys: &dyn SigningKeyResolver,
    do_anti_csrf_check: bool,
    now_millis: u64,
) -> Result<AccessTokenPayload> {
    let decoded = decode_parts(token)?;

    if let Some(expiry_time) = sanitize_millis(decoded.payload.get("expiryTime")) {
        if expiry_time <= now_millis {
            return Err(Error::Expired);
        }
    }

    verify_signature(&decoded, keys)?;

    AccessTokenPayload::from_claims(&decoded.payload, do_anti_csrf_check)
}
