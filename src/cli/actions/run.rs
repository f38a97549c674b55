use crate::cli::actions::{api_version, refresh, revoke, session_info, verify, Action};
use anyhow::Result;

/// Single dispatch point for all CLI actions.
///
/// # Errors
///
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::ApiVersion(globals) => api_version::execute(&globals).await,
        Action::Verify(args) => verify::execute(&args),
        Action::Refresh(globals, args) => refresh::execute(&globals, args).await,
        Action::Revoke(globals, handle) => revoke::execute(&globals, &handle).await,
        Action::SessionInfo(globals, handle) => session_info::execute(&globals, &handle).await,
    }
}
