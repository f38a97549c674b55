use crate::cli::globals::GlobalArgs;
use crate::config::SessionConfig;
use crate::querier::Querier;
use crate::session::{CoreKeyResolver, SessionProtocol};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// # Errors
///
/// Returns an error if the core cannot be reached.
pub async fn execute(globals: &GlobalArgs, handle: &str) -> Result<()> {
    let querier = Querier::new(&globals.core_config())?;
    let protocol = SessionProtocol::new(
        &querier,
        SessionConfig::new(),
        Arc::new(CoreKeyResolver::new()),
    );

    if protocol.revoke_session(handle).await? {
        info!("session {handle} revoked");
        println!("revoked {handle}");
    } else {
        println!("{handle} was not active");
    }
    Ok(())
}
