use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

fn public_key_arg() -> Arg {
    Arg::new("public-key")
        .long("public-key")
        .help("Path to the RSA public key (PEM or DER) that signs access tokens")
        .env("SESSIONKIT_PUBLIC_KEY")
}

fn anti_csrf_arg() -> Arg {
    Arg::new("anti-csrf")
        .long("anti-csrf")
        .help("Anti-CSRF token sent alongside the request")
}

fn handle_arg() -> Arg {
    Arg::new("handle")
        .long("handle")
        .help("Session handle")
        .required(true)
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("sessionkit")
        .about("Session tokens against an authentication core")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("connection-uri")
                .short('c')
                .long("connection-uri")
                .help("Core URLs separated by ';', example: http://core-a:3567;http://core-b:3567")
                .default_value("http://localhost:3567")
                .env("SESSIONKIT_CONNECTION_URI")
                .global(true),
        )
        .arg(
            Arg::new("api-key")
                .long("api-key")
                .help("Core API key")
                .env("SESSIONKIT_API_KEY")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Write logs as JSON")
                .env("SESSIONKIT_JSON_LOGS")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("SESSIONKIT_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .subcommand(Command::new("api-version").about("Negotiate and print the CDI version"))
        .subcommand(
            Command::new("verify")
                .about("Verify an access token locally and print its payload")
                .arg(
                    Arg::new("token")
                        .long("token")
                        .help("Access token")
                        .required(true),
                )
                .arg(public_key_arg().required(true))
                .arg(anti_csrf_arg()),
        )
        .subcommand(
            Command::new("refresh")
                .about("Rotate a refresh token through the core")
                .arg(
                    Arg::new("refresh-token")
                        .long("refresh-token")
                        .help("Refresh token")
                        .env("SESSIONKIT_REFRESH_TOKEN")
                        .hide_env_values(true)
                        .required(true),
                )
                .arg(public_key_arg())
                .arg(anti_csrf_arg()),
        )
        .subcommand(
            Command::new("revoke")
                .about("Revoke a session")
                .arg(handle_arg()),
        )
        .subcommand(
            Command::new("session-info")
                .about("Print what the core stores for a session")
                .arg(handle_arg()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "sessionkit");
        assert_eq!(
            command.get_about().unwrap().to_string(),
            "Session tokens against an authentication core"
        );
        assert_eq!(
            command.get_version().unwrap().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_check_verify_args() {
        temp_env::with_vars([("SESSIONKIT_PUBLIC_KEY", None::<String>)], || {
            let matches = new().get_matches_from(vec![
                "sessionkit",
                "--connection-uri",
                "http://core-a:3567;http://core-b:3567",
                "verify",
                "--token",
                "a.b.c",
                "--public-key",
                "/tmp/key.pem",
                "--anti-csrf",
                "csrf",
            ]);

            assert_eq!(
                matches.get_one::<String>("connection-uri").cloned(),
                Some("http://core-a:3567;http://core-b:3567".to_string())
            );
            let (name, sub) = matches.subcommand().unwrap();
            assert_eq!(name, "verify");
            assert_eq!(sub.get_one::<String>("token").cloned(), Some("a.b.c".to_string()));
            assert_eq!(
                sub.get_one::<String>("public-key").cloned(),
                Some("/tmp/key.pem".to_string())
            );
            assert_eq!(sub.get_one::<String>("anti-csrf").cloned(), Some("csrf".to_string()));
        });
    }

    #[test]
    fn test_verify_requires_token() {
        let result = new().try_get_matches_from(vec!["sessionkit", "verify", "--public-key", "k.pem"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("SESSIONKIT_CONNECTION_URI", Some("https://core.tld")),
                ("SESSIONKIT_API_KEY", Some("secret")),
                ("SESSIONKIT_REFRESH_TOKEN", Some("rt")),
                ("SESSIONKIT_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["sessionkit", "refresh"]);
                assert_eq!(
                    matches.get_one::<String>("connection-uri").cloned(),
                    Some("https://core.tld".to_string())
                );
                assert_eq!(
                    matches.get_one::<String>("api-key").cloned(),
                    Some("secret".to_string())
                );
                assert_eq!(matches.get_one::<u8>("verbosity").map(|s| *s), Some(2));
                let sub = matches.subcommand_matches("refresh").unwrap();
                assert_eq!(sub.get_one::<String>("refresh-token").cloned(), Some("rt".to_string()));
            },
        );
    }

    #[test]
    fn test_default_connection_uri() {
        temp_env::with_vars([("SESSIONKIT_CONNECTION_URI", None::<String>)], || {
            let matches = new().get_matches_from(vec!["sessionkit", "api-version"]);
            assert_eq!(
                matches.get_one::<String>("connection-uri").cloned(),
                Some("http://localhost:3567".to_string())
            );
        });
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars([("SESSIONKIT_LOG_LEVEL", Some(level))], || {
                let matches = new().get_matches_from(vec!["sessionkit", "revoke", "--handle", "h1"]);
                assert_eq!(
                    matches.get_one::<u8>("verbosity").map(|s| *s),
                    Some(index as u8)
                );
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("SESSIONKIT_LOG_LEVEL", None::<String>)], || {
                let mut args = vec![
                    "sessionkit".to_string(),
                    "session-info".to_string(),
                    "--handle".to_string(),
                    "h1".to_string(),
                ];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>("verbosity").map(|s| *s),
                    Some(index as u8)
                );
            });
        }
    }
}
