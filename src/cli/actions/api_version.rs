use crate::cli::globals::GlobalArgs;
use crate::querier::Querier;
use anyhow::Result;
use tracing::debug;

/// # Errors
///
/// Returns an error if no core answers or none speaks a supported version.
pub async fn execute(globals: &GlobalArgs) -> Result<()> {
    let querier = Querier::new(&globals.core_config())?;
    debug!("querying {} core(s)", querier.hosts().len());
    let version = querier.api_version().await?;
    println!("{version}");
    Ok(())
}
