use crate::clock;
use crate::error::Error;
use crate::token::{verify_access_token, StaticKey};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub token: SecretString,
    pub public_key: PathBuf,
    pub anti_csrf: Option<String>,
}

/// Read a PEM or DER public key from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not an RSA public key.
pub fn load_public_key(path: &Path) -> Result<StaticKey> {
    let bytes =
        std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
    let key = StaticKey::from_pem_or_der(&bytes)
        .with_context(|| format!("invalid public key in {}", path.display()))?;
    Ok(key)
}

/// Verify the token locally, the anti-CSRF token is checked only when one is given.
///
/// # Errors
///
/// Returns the verification error.
pub fn execute(args: &Args) -> Result<()> {
    let key = load_public_key(&args.public_key)?;
    let check_anti_csrf = args.anti_csrf.is_some();
    let payload = verify_access_token(
        args.token.expose_secret(),
        &key,
        check_anti_csrf,
        clock::now_millis(),
    )?;

    if check_anti_csrf && payload.anti_csrf_token != args.anti_csrf {
        return Err(Error::AntiCsrfMismatch.into());
    }
    debug!("access token for session {} verified", payload.session_handle);

    println!(
        "{}",
        serde_json::to_string_pretty(&Value::Object(payload.to_claims()))?
    );
    Ok(())
}
