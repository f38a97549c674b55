//! Signing keys used to verify access tokens.

use crate::error::{Error, Result};
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

/// Looks up the public key that signed a token.
///
/// `kid` is the key id from the token header, if the token carries one.
pub trait SigningKeyResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns `Error::TokenInvalid` if no key matches.
    fn resolve(&self, kid: Option<&str>) -> Result<RsaPublicKey>;

    /// Called with the signing key the core attaches to session responses.
    fn update_from_core(&self, _key: &str, _expiry_time: u64) {}
}

/// A single, fixed public key.
#[derive(Clone, Debug)]
pub struct StaticKey {
    key: RsaPublicKey,
}

impl StaticKey {
    #[must_use]
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// # Errors
    ///
    /// Returns `Error::Config` if the key cannot be parsed.
    pub fn from_pem_or_der(pem_or_der: &[u8]) -> Result<Self> {
        Ok(Self::new(decode_public_key(pem_or_der)?))
    }

    /// Accepts a PEM document or the bare base64 DER body the core hands out.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key cannot be parsed.
    pub fn from_core_string(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.starts_with("-----BEGIN") {
            return Self::from_pem_or_der(trimmed.as_bytes());
        }
        let der = Base64::decode_vec(trimmed)
            .map_err(|_| Error::Config("signing key is not valid base64".to_string()))?;
        Self::from_pem_or_der(&der)
    }

    /// Derive the public half of a private key (PEM or DER).
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key cannot be parsed.
    pub fn from_private_key_pem_or_der(pem_or_der: &[u8]) -> Result<Self> {
        let private_key = decode_private_key(pem_or_der)?;
        Ok(Self::new(RsaPublicKey::from(&private_key)))
    }

    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.key
    }
}

impl SigningKeyResolver for StaticKey {
    fn resolve(&self, _kid: Option<&str>) -> Result<RsaPublicKey> {
        Ok(self.key.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a JWKS from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not valid JSON or doesn't match the expected JWKS shape.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Build a JWKS holding the public half of an RSA private key (PEM or DER).
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be parsed.
    pub fn from_rsa_private_key_pem_or_der(
        private_key_pem_or_der: &[u8],
        kid: impl Into<String>,
    ) -> Result<Self> {
        let private_key = decode_private_key(private_key_pem_or_der)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            keys: vec![Jwk::from_rsa_public_key(&public_key, kid)],
        })
    }
}

impl SigningKeyResolver for Jwks {
    fn resolve(&self, kid: Option<&str>) -> Result<RsaPublicKey> {
        let jwk = match kid {
            Some(kid) => self
                .find_by_kid(kid)
                .ok_or_else(|| Error::TokenInvalid(format!("unknown key id: {kid}")))?,
            None => self
                .keys
                .first()
                .ok_or_else(|| Error::TokenInvalid("key set is empty".to_string()))?,
        };
        jwk.to_rsa_public_key()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    pub kid: String,
    pub n: String,
    pub e: String,
}

impl Jwk {
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            kid: kid.into(),
            n: Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be()),
            e: Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be()),
        }
    }

    /// # Errors
    ///
    /// Returns `Error::TokenInvalid` if the key is not RSA or its parameters are invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey> {
        if self.kty != "RSA" {
            return Err(Error::TokenInvalid(format!(
                "unsupported key type: {}",
                self.kty
            )));
        }
        let n = Base64UrlUnpadded::decode_vec(&self.n)
            .map_err(|_| Error::TokenInvalid("invalid jwk modulus".to_string()))?;
        let e = Base64UrlUnpadded::decode_vec(&self.e)
            .map_err(|_| Error::TokenInvalid("invalid jwk exponent".to_string()))?;
        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|e| Error::TokenInvalid(format!("invalid rsa key: {e}")))
    }
}

pub(crate) fn decode_private_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey> {
    let parse_error = || Error::Config("failed to parse RSA private key".to_string());

    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| parse_error())?;
        if let Ok(k) = RsaPrivateKey::from_pkcs8_pem(s) {
            return Ok(k);
        }
        return RsaPrivateKey::from_pkcs1_pem(s).map_err(|_| parse_error());
    }

    if let Ok(k) = RsaPrivateKey::from_pkcs8_der(pem_or_der) {
        return Ok(k);
    }
    RsaPrivateKey::from_pkcs1_der(pem_or_der).map_err(|_| parse_error())
}

fn decode_public_key(pem_or_der: &[u8]) -> Result<RsaPublicKey> {
    let parse_error = || Error::Config("failed to parse RSA public key".to_string());

    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| parse_error())?;
        if let Ok(k) = RsaPublicKey::from_public_key_pem(s) {
            return Ok(k);
        }
        return RsaPublicKey::from_pkcs1_pem(s).map_err(|_| parse_error());
    }

    if let Ok(k) = RsaPublicKey::from_public_key_der(pem_or_der) {
        return Ok(k);
    }
    RsaPublicKey::from_pkcs1_der(pem_or_der).map_err(|_| parse_error())
}
