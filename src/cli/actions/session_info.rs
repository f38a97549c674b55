use crate::cli::globals::GlobalArgs;
use crate::config::SessionConfig;
use crate::querier::Querier;
use crate::session::{CoreKeyResolver, SessionProtocol};
use anyhow::{anyhow, Result};
use serde_json::json;
use std::sync::Arc;

/// # Errors
///
/// Returns an error if the session does not exist or the core cannot be reached.
pub async fn execute(globals: &GlobalArgs, handle: &str) -> Result<()> {
    let querier = Querier::new(&globals.core_config())?;
    let protocol = SessionProtocol::new(
        &querier,
        SessionConfig::new(),
        Arc::new(CoreKeyResolver::new()),
    );

    let info = protocol
        .get_session_information(handle)
        .await?
        .ok_or_else(|| anyhow!("session {handle} does not exist"))?;

    let output = json!({
        "sessionHandle": info.session_handle,
        "userId": info.user_id,
        "sessionData": info.session_data,
        "accessTokenPayload": info.access_token_payload,
        "expiry": info.expiry,
        "timeCreated": info.time_created,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
