use crate::cli::actions::verify::load_public_key;
use crate::cli::globals::GlobalArgs;
use crate::config::SessionConfig;
use crate::querier::Querier;
use crate::session::{CoreKeyResolver, SessionProtocol};
use crate::token::SigningKeyResolver;
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub refresh_token: SecretString,
    /// Without a key file the signing key is fetched from the core.
    pub public_key: Option<PathBuf>,
    pub anti_csrf: Option<String>,
}

/// # Errors
///
/// Returns an error if the key cannot be loaded or the core rejects the refresh.
pub async fn execute(globals: &GlobalArgs, args: Args) -> Result<()> {
    let querier = Querier::new(&globals.core_config())?;

    let keys: Arc<dyn SigningKeyResolver> = match &args.public_key {
        Some(path) => Arc::new(load_public_key(path)?),
        None => {
            let resolver = CoreKeyResolver::new();
            resolver.load(&querier).await?;
            Arc::new(resolver)
        }
    };

    let config = SessionConfig::new();
    let protocol = SessionProtocol::new(&querier, config, keys);
    let session = protocol
        .refresh_session(
            args.refresh_token.expose_secret(),
            args.anti_csrf.as_deref(),
        )
        .await?;
    info!("session {} rotated", session.handle());

    let tokens = session.tokens();
    let output = json!({
        "sessionHandle": session.handle(),
        "userId": session.user_id(),
        "accessToken": {
            "token": tokens.access_token.token.expose_secret(),
            "expiry": tokens.access_token.expiry,
            "createdTime": tokens.access_token.created_time,
        },
        "refreshToken": tokens.refresh_token.as_ref().map(|refresh| json!({
            "token": refresh.token.expose_secret(),
            "expiry": refresh.expiry,
            "createdTime": refresh.created_time,
        })),
        "antiCsrfToken": tokens.anti_csrf_token,
        "refreshTokenHash1": session.chain().current_hash1,
        "parentRefreshTokenHash1": session.chain().parent_hash1,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
