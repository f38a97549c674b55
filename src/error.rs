use crate::claims::ClaimValidationError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid access token: {0}")]
    TokenInvalid(String),
    #[error("access token does not contain all the information, maybe the structure has changed")]
    MalformedToken,
    #[error("access token expired")]
    Expired,
    #[error("anti-csrf token mismatch")]
    AntiCsrfMismatch,
    #[error("token theft detected for session {session_handle}")]
    TokenTheftDetected {
        session_handle: String,
        user_id: String,
    },
    #[error("unauthorised: {0}")]
    Unauthorised(String),
    #[error("no core available to query")]
    NoCoreAvailable,
    #[error("the running core is not compatible with this SDK, core supports {core_versions:?}")]
    IncompatibleCoreVersion { core_versions: Vec<String> },
    #[error("core returned status {status} for a request to path '{path}': {body}")]
    CoreRequestFailed {
        status: u16,
        path: String,
        body: String,
    },
    #[error("claim validation failed: {0:?}")]
    InvalidClaims(Vec<ClaimValidationError>),
    #[error("unexpected core response: {0}")]
    UnexpectedResponse(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error")]
    Http(#[from] reqwest::Error),
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Local verification failures whose recovery is a refresh.
    #[must_use]
    pub fn is_try_refresh(&self) -> bool {
        matches!(
            self,
            Self::TokenInvalid(_) | Self::MalformedToken | Self::Expired
        )
    }

    /// Failures after which the user has to sign in again.
    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::TokenTheftDetected { .. } | Self::Unauthorised(_))
    }
}
