//! Configuration objects built once at startup and handed to the components
//! that need them.

use crate::error::{Error, Result};
use crate::querier::QuerierHost;
use secrecy::SecretString;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_ACCESS_TOKEN_VALIDITY_SECONDS: u64 = 60 * 60;
const DEFAULT_JWT_PROPERTY_NAME: &str = "jwt";

/// CDI versions this SDK can talk.
pub const SUPPORTED_CDI_VERSIONS: &[&str] = &["2.9", "2.10", "2.11", "2.12", "2.13"];

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Where the core lives and how to reach it.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    connection_uri: String,
    api_key: Option<SecretString>,
    connect_timeout: Duration,
    request_timeout: Duration,
    supported_versions: Vec<String>,
    api_version: Option<String>,
    user_agent: String,
}

impl CoreConfig {
    /// `connection_uri` holds one or more core URLs separated by `;`.
    #[must_use]
    pub fn new(connection_uri: impl Into<String>) -> Self {
        Self {
            connection_uri: connection_uri.into(),
            api_key: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            supported_versions: SUPPORTED_CDI_VERSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            api_version: None,
            user_agent: APP_USER_AGENT.to_string(),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_supported_versions(mut self, versions: Vec<String>) -> Self {
        self.supported_versions = versions;
        self
    }

    /// Pin the CDI version and skip negotiation with the core.
    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn connection_uri(&self) -> &str {
        &self.connection_uri
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn supported_versions(&self) -> &[String] {
        &self.supported_versions
    }

    #[must_use]
    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Parse the connection URI into the ordered host list.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no host is given or one of them is not a valid URL.
    pub fn hosts(&self) -> Result<Vec<QuerierHost>> {
        let hosts = self
            .connection_uri
            .split(';')
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .map(QuerierHost::parse)
            .collect::<Result<Vec<_>>>()?;

        if hosts.is_empty() {
            return Err(Error::Config("connection uri has no hosts".to_string()));
        }

        Ok(hosts)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AntiCsrf {
    None,
    /// The core issues an anti-CSRF token that travels with the access token.
    #[default]
    ViaToken,
    /// A custom request header is checked by the web framework adapter.
    ViaCustomHeader,
}

/// Embedded third-party verifiable JWT inside the access token payload.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    property_name: String,
    validity_seconds: Option<u64>,
    issuer: Option<String>,
}

impl JwtConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            property_name: DEFAULT_JWT_PROPERTY_NAME.to_string(),
            validity_seconds: None,
            issuer: None,
        }
    }

    #[must_use]
    pub fn with_property_name(mut self, name: impl Into<String>) -> Self {
        self.property_name = name.into();
        self
    }

    #[must_use]
    pub fn with_validity_seconds(mut self, seconds: u64) -> Self {
        self.validity_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    #[must_use]
    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    #[must_use]
    pub fn validity_seconds(&self) -> Option<u64> {
        self.validity_seconds
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    anti_csrf: AntiCsrf,
    access_token_validity_seconds: u64,
    jwt: Option<JwtConfig>,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            anti_csrf: AntiCsrf::default(),
            access_token_validity_seconds: DEFAULT_ACCESS_TOKEN_VALIDITY_SECONDS,
            jwt: None,
        }
    }

    #[must_use]
    pub fn with_anti_csrf(mut self, anti_csrf: AntiCsrf) -> Self {
        self.anti_csrf = anti_csrf;
        self
    }

    /// Lifetime of access tokens minted by the core; bounds embedded JWTs.
    #[must_use]
    pub fn with_access_token_validity_seconds(mut self, seconds: u64) -> Self {
        self.access_token_validity_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_jwt(mut self, jwt: JwtConfig) -> Self {
        self.jwt = Some(jwt);
        self
    }

    #[must_use]
    pub fn anti_csrf(&self) -> AntiCsrf {
        self.anti_csrf
    }

    #[must_use]
    pub fn enable_anti_csrf(&self) -> bool {
        self.anti_csrf == AntiCsrf::ViaToken
    }

    #[must_use]
    pub fn access_token_validity_seconds(&self) -> u64 {
        self.access_token_validity_seconds
    }

    #[must_use]
    pub fn jwt(&self) -> Option<&JwtConfig> {
        self.jwt.as_ref()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
