use crate::config::CoreConfig;
use secrecy::SecretString;

/// Connection settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub connection_uri: String,
    pub api_key: Option<SecretString>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(connection_uri: String) -> Self {
        Self {
            connection_uri,
            api_key: None,
        }
    }

    pub fn set_api_key(&mut self, api_key: SecretString) {
        self.api_key = Some(api_key);
    }

    #[must_use]
    pub fn core_config(&self) -> CoreConfig {
        let config = CoreConfig::new(self.connection_uri.clone());
        match &self.api_key {
            Some(api_key) => config.with_api_key(api_key.clone()),
            None => config,
        }
    }
}
