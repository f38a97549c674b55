//! HTTP client for the core.
//!
//! Every state change that needs the core goes through a [`Querier`]. It owns:
//! - the ordered host list, tried round-robin,
//! - the negotiated CDI version, resolved once and cached,
//! - the optional API key sent with every request.
//!
//! Connection failures move on to the next host until each host was tried
//! once. A 429 is retried on the same URL with a linear backoff. Any other
//! non-200 status fails the call.

mod host;
mod retry;
mod version;

pub use host::{is_recipe_path, QuerierHost};
pub use retry::{rate_limit_delay, RetryBudget, RATE_LIMIT_RETRIES};
pub use version::largest_common_version;

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::Payload;
use host::normalise_path;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

const API_VERSION_PATH: &str = "/apiversion";

#[derive(Clone)]
pub struct Querier {
    inner: Arc<QuerierInner>,
    rid: Option<String>,
}

struct QuerierInner {
    client: reqwest::Client,
    hosts: Vec<QuerierHost>,
    api_key: Option<SecretString>,
    supported_versions: Vec<String>,
    api_version: tokio::sync::Mutex<Option<String>>,
    last_tried_index: parking_lot::Mutex<usize>,
}

impl fmt::Debug for Querier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Querier")
            .field("hosts", &self.inner.hosts)
            .field("rid", &self.rid)
            .finish_non_exhaustive()
    }
}

impl Querier {
    /// # Errors
    ///
    /// Returns an error if the connection URI is invalid or the HTTP client cannot be built.
    pub fn new(config: &CoreConfig) -> Result<Self> {
        let hosts = config.hosts()?;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent())
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            inner: Arc::new(QuerierInner {
                client,
                hosts,
                api_key: config.api_key().cloned(),
                supported_versions: config.supported_versions().to_vec(),
                api_version: tokio::sync::Mutex::new(config.api_version().map(ToString::to_string)),
                last_tried_index: parking_lot::Mutex::new(0),
            }),
            rid: None,
        })
    }

    /// A querier sharing this one's state that sends `rid` on recipe paths.
    #[must_use]
    pub fn with_rid(&self, rid: impl Into<String>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            rid: Some(rid.into()),
        }
    }

    #[must_use]
    pub fn rid(&self) -> Option<&str> {
        self.rid.as_deref()
    }

    #[must_use]
    pub fn hosts(&self) -> &[QuerierHost] {
        &self.inner.hosts
    }

    /// The CDI version used for every request, negotiated on first use.
    ///
    /// Concurrent callers wait for the first negotiation and share its result.
    ///
    /// # Errors
    ///
    /// Returns `Error::IncompatibleCoreVersion` if the core and this SDK share no
    /// version, or any error from the negotiation request.
    pub async fn api_version(&self) -> Result<String> {
        let mut cached = self.inner.api_version.lock().await;
        if let Some(version) = cached.as_ref() {
            return Ok(version.clone());
        }

        let response = self
            .execute(Method::GET, API_VERSION_PATH, None, &[], None)
            .instrument(info_span!("core.apiversion"))
            .await?;

        let core_versions: Vec<String> = response
            .get("versions")
            .and_then(Value::as_array)
            .map(|versions| {
                versions
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let version = largest_common_version(&core_versions, &self.inner.supported_versions)
            .ok_or(Error::IncompatibleCoreVersion { core_versions })?;

        debug!("negotiated cdi version {version}");
        *cached = Some(version.clone());
        Ok(version)
    }

    /// # Errors
    ///
    /// See [`Querier::send_request`].
    pub async fn send_get_request(&self, path: &str, params: &[(&str, &str)]) -> Result<Payload> {
        self.send_request(Method::GET, path, None, params).await
    }

    /// # Errors
    ///
    /// See [`Querier::send_request`].
    pub async fn send_post_request(&self, path: &str, body: &Value) -> Result<Payload> {
        self.send_request(Method::POST, path, Some(body), &[]).await
    }

    /// # Errors
    ///
    /// See [`Querier::send_request`].
    pub async fn send_put_request(&self, path: &str, body: &Value) -> Result<Payload> {
        self.send_request(Method::PUT, path, Some(body), &[]).await
    }

    /// # Errors
    ///
    /// See [`Querier::send_request`].
    pub async fn send_delete_request(
        &self,
        path: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
    ) -> Result<Payload> {
        self.send_request(Method::DELETE, path, body, params).await
    }

    /// Send a request to the core and return its JSON object body.
    ///
    /// A 200 whose body is not a JSON object comes back as `{"result": <body>}`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompatibleCoreVersion` if version negotiation fails,
    /// - `Error::NoCoreAvailable` once every host refused the connection,
    /// - `Error::CoreRequestFailed` for a non-200 status, including 429 after the retry budget,
    /// - `Error::Http` for other transport failures.
    pub async fn send_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
    ) -> Result<Payload> {
        let api_version = self.api_version().await?;
        let span = info_span!("core.request", method = %method, path = %path);
        self.execute(method, path, body, params, Some(&api_version))
            .instrument(span)
            .await
    }

    fn next_host(&self) -> &QuerierHost {
        let hosts = &self.inner.hosts;
        let mut cursor = self.inner.last_tried_index.lock();
        let index = *cursor % hosts.len();
        *cursor = (index + 1) % hosts.len();
        &hosts[index]
    }

    #[cfg(test)]
    fn cursor(&self) -> usize {
        *self.inner.last_tried_index.lock()
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
        api_version: Option<&str>,
    ) -> Result<Payload> {
        let path = normalise_path(path);
        let body = body.map(serde_json::to_vec).transpose()?;
        let mut tries_remaining = self.inner.hosts.len();
        let mut retry_budget = RetryBudget::new();

        'hosts: loop {
            if tries_remaining == 0 {
                return Err(Error::NoCoreAvailable);
            }
            let url = self.next_host().url_for(&path);

            loop {
                let mut request = self
                    .inner
                    .client
                    .request(method.clone(), &url)
                    .header("Accept", "application/json");
                if !params.is_empty() {
                    request = request.query(params);
                }
                if let Some(body) = &body {
                    request = request
                        .header("Content-Type", "application/json; charset=utf-8")
                        .body(body.clone());
                }
                if let Some(version) = api_version {
                    request = request.header("cdi-version", version);
                }
                if let Some(api_key) = &self.inner.api_key {
                    request = request.header("api-key", api_key.expose_secret());
                }
                if let Some(rid) = self.rid.as_deref().filter(|_| is_recipe_path(&path)) {
                    request = request.header("rid", rid);
                }

                debug!("core request: {} {}", method, url);
                let response = match request.send().await {
                    Ok(response) => response,
                    Err(err) if err.is_connect() => {
                        warn!("core at {url} unreachable: {err}");
                        tries_remaining -= 1;
                        continue 'hosts;
                    }
                    Err(err) => return Err(err.into()),
                };

                let status = response.status();
                let text = response.text().await?;

                if status == StatusCode::TOO_MANY_REQUESTS {
                    if let Some(delay) = retry_budget.consume(&url) {
                        debug!("core rate limited {url}, retrying in {delay:?}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }

                if status != StatusCode::OK {
                    return Err(Error::CoreRequestFailed {
                        status: status.as_u16(),
                        path,
                        body: text,
                    });
                }

                return Ok(parse_body(text));
            }
        }
    }
}

fn parse_body(text: String) -> Payload {
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Payload::new();
            map.insert("result".to_string(), Value::String(text));
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn refused_uri() -> anyhow::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);
        Ok(format!("http://127.0.0.1:{port}"))
    }

    fn pinned(uri: &str) -> CoreConfig {
        CoreConfig::new(uri).with_api_version("2.13")
    }

    #[tokio::test]
    async fn round_robin_across_hosts() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let mut servers = Vec::new();
        for i in 0..3 {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/hello"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"host": i})))
                .mount(&server)
                .await;
            servers.push(server);
        }
        let uri = servers
            .iter()
            .map(MockServer::uri)
            .collect::<Vec<_>>()
            .join(";");
        let querier = Querier::new(&pinned(&uri))?;

        let mut seen = Vec::new();
        for _ in 0..6 {
            let response = querier.send_get_request("/hello", &[]).await?;
            seen.push(response.get("host").and_then(Value::as_u64).unwrap_or(99));
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn all_hosts_refused_is_no_core_available() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let uri = [refused_uri()?, refused_uri()?, refused_uri()?].join(";");
        let querier = Querier::new(&pinned(&uri))?;

        let result = querier.send_get_request("/hello", &[]).await;
        assert!(matches!(result, Err(Error::NoCoreAvailable)));
        // one attempt per host brings the cursor back to where it started
        assert_eq!(querier.cursor(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn refused_host_fails_over_to_next() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        let uri = format!("{};{}", refused_uri()?, server.uri());
        let querier = Querier::new(&pinned(&uri))?;

        let response = querier.send_get_request("/hello", &[]).await?;
        assert_eq!(response.get("ok"), Some(&json!(true)));
        Ok(())
    }

    #[tokio::test]
    async fn rate_limited_retries_then_fails() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(6)
            .mount(&server)
            .await;
        let querier = Querier::new(&pinned(&server.uri()))?;

        let result = querier.send_get_request("/busy", &[]).await;
        match result {
            Err(Error::CoreRequestFailed { status, path, body }) => {
                assert_eq!(status, 429);
                assert_eq!(path, "/busy");
                assert_eq!(body, "slow down");
            }
            other => panic!("expected rate limit failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_recovers_on_same_host() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": 1})))
            .expect(1)
            .mount(&server)
            .await;
        let querier = Querier::new(&pinned(&server.uri()))?;

        let response = querier.send_get_request("/busy", &[]).await?;
        assert_eq!(response.get("done"), Some(&json!(1)));
        Ok(())
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recipe/session"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;
        let querier = Querier::new(&pinned(&server.uri()))?;

        let result = querier
            .send_post_request("/recipe/session", &json!({}))
            .await;
        assert!(matches!(
            result,
            Err(Error::CoreRequestFailed { status: 500, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn non_json_body_is_wrapped() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello"))
            .mount(&server)
            .await;
        let querier = Querier::new(&pinned(&server.uri()))?;

        let response = querier.send_get_request("/hello", &[]).await?;
        assert_eq!(response.get("result"), Some(&json!("Hello")));
        Ok(())
    }

    #[tokio::test]
    async fn negotiates_once_for_concurrent_callers() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apiversion"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"versions": ["2.8", "2.9", "2.10", "9.0"]})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .and(header("cdi-version", "2.10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(3)
            .mount(&server)
            .await;
        let querier = Querier::new(&CoreConfig::new(server.uri()))?;

        let (a, b, c) = tokio::join!(
            querier.send_get_request("/hello", &[]),
            querier.send_get_request("/hello", &[]),
            querier.send_get_request("/hello", &[]),
        );
        a?;
        b?;
        c?;
        assert_eq!(querier.api_version().await?, "2.10");
        Ok(())
    }

    #[tokio::test]
    async fn incompatible_core_version() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apiversion"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"versions": ["1.0"]})))
            .mount(&server)
            .await;
        let querier = Querier::new(&CoreConfig::new(server.uri()))?;

        match querier.send_get_request("/hello", &[]).await {
            Err(Error::IncompatibleCoreVersion { core_versions }) => {
                assert_eq!(core_versions, vec!["1.0".to_string()]);
            }
            other => panic!("expected incompatible version, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn headers_and_rid_on_recipe_paths_only() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recipe/session"))
            .and(header("rid", "session"))
            .and(header("api-key", "secret"))
            .and(header("cdi-version", "2.13"))
            .and(body_json(json!({"userId": "u1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "OK"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/count"))
            .and(query_param("includeRecipeIds", "session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
            .expect(1)
            .mount(&server)
            .await;
        let config = pinned(&server.uri()).with_api_key(SecretString::from("secret".to_string()));
        let querier = Querier::new(&config)?.with_rid("session");

        querier
            .send_post_request("/recipe/session", &json!({"userId": "u1"}))
            .await?;
        querier
            .send_get_request("/users/count", &[("includeRecipeIds", "session")])
            .await?;

        let requests = server.received_requests().await.unwrap_or_default();
        let count_request = requests
            .iter()
            .find(|r| r.url.path() == "/users/count")
            .ok_or_else(|| anyhow::anyhow!("count request not received"))?;
        assert!(count_request.headers.get("rid").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn base_path_is_prefixed() -> anyhow::Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/core/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        let querier = Querier::new(&pinned(&format!("{}/core/", server.uri())))?;

        querier.send_get_request("hello/", &[]).await?;
        Ok(())
    }
}
