use crate::cli::actions::{refresh, verify, Action};
use crate::cli::globals::GlobalArgs;
use anyhow::{Context, Result};
use secrecy::SecretString;

fn required(matches: &clap::ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

/// # Errors
///
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let mut globals = GlobalArgs::new(required(matches, "connection-uri")?);
    if let Some(api_key) = matches.get_one::<String>("api-key") {
        globals.set_api_key(SecretString::from(api_key.clone()));
    }

    match matches.subcommand() {
        Some(("api-version", _)) => Ok(Action::ApiVersion(globals)),
        Some(("verify", sub_m)) => Ok(Action::Verify(verify::Args {
            token: SecretString::from(required(sub_m, "token")?),
            public_key: required(sub_m, "public-key")?.into(),
            anti_csrf: sub_m.get_one::<String>("anti-csrf").cloned(),
        })),
        Some(("refresh", sub_m)) => Ok(Action::Refresh(
            globals,
            refresh::Args {
                refresh_token: SecretString::from(required(sub_m, "refresh-token")?),
                public_key: sub_m.get_one::<String>("public-key").map(Into::into),
                anti_csrf: sub_m.get_one::<String>("anti-csrf").cloned(),
            },
        )),
        Some(("revoke", sub_m)) => Ok(Action::Revoke(globals, required(sub_m, "handle")?)),
        Some(("session-info", sub_m)) => {
            Ok(Action::SessionInfo(globals, required(sub_m, "handle")?))
        }
        _ => anyhow::bail!("no subcommand given, see --help"),
    }
}
