use crate::error::{Error, Result};
use url::Url;

/// One core replica: scheme, host and port, plus an optional base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerierHost {
    domain: String,
    base_path: String,
}

impl QuerierHost {
    /// # Errors
    ///
    /// Returns `Error::Config` if `raw` is not an http(s) URL with a host.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let url = Url::parse(raw)
            .map_err(|e| Error::Config(format!("invalid connection uri '{raw}': {e}")))?;

        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(Error::Config(format!(
                "invalid connection uri '{raw}': expected http(s)"
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("invalid connection uri '{raw}': no host")))?;

        let domain = match url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        };

        Ok(Self {
            domain,
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Full URL for a normalised core path.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}{}", self.domain, self.base_path, path)
    }
}

/// Leading slash, no trailing slash, no surrounding whitespace.
pub(crate) fn normalise_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Recipe-scoped paths carry the `rid` header.
#[must_use]
pub fn is_recipe_path(path: &str) -> bool {
    path == "/recipe" || path.starts_with("/recipe/")
}
