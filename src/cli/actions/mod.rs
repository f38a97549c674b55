pub mod api_version;
pub mod refresh;
pub mod revoke;
pub mod session_info;
pub mod verify;

mod run;

use crate::cli::globals::GlobalArgs;

#[derive(Debug)]
pub enum Action {
    ApiVersion(GlobalArgs),
    Verify(verify::Args),
    Refresh(GlobalArgs, refresh::Args),
    Revoke(GlobalArgs, String),
    SessionInfo(GlobalArgs, String),
}

impl Action {
    /// Execute the action.
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
