//! Rate-limited HTTP plumbing
//!
//! Every outbound call to GitHub goes through a [`RateLimitedHttpClient`], which
//! enforces a minimum interval between request dispatches and applies a request
//! timeout. The actual I/O sits behind the [`HttpTransport`] trait so the client
//! can be driven by reqwest in production and by an in-memory stub in tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Minimum spacing between the starts of two consecutive requests
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1150);

/// Socket timeout applied when a request does not carry its own
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// An outbound request.
///
/// `params` are serialized into the query string for GET and into a
/// form-encoded body for POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            timeout: None,
            follow_redirects: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return redirect responses as-is instead of following them
    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    /// Look up a parameter by name (first match)
    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup, first match wins
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request timed out")]
    Timeout,

    #[error("http transport error: {0}")]
    Transport(String),
}

/// Transport boundary for all HTTP I/O
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Production transport backed by reqwest
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    no_redirect: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let no_redirect = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            no_redirect,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout
    } else {
        HttpError::Transport(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let client = if request.follow_redirects {
            &self.client
        } else {
            &self.no_redirect
        };

        let mut builder = match request.method {
            HttpMethod::Get => {
                let builder = client.get(&request.url);
                if request.params.is_empty() {
                    builder
                } else {
                    builder.query(&request.params)
                }
            }
            HttpMethod::Post => client.post(&request.url).form(&request.params),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await.map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let body = resp.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// HTTP client that serializes all calls through a minimum-interval gate.
///
/// The gate is per instance: the time of the last dispatch is held behind an
/// async mutex for the whole read, sleep and stamp sequence, so concurrent
/// callers sharing one client still queue up behind each other.
pub struct RateLimitedHttpClient {
    transport: Arc<dyn HttpTransport>,
    min_interval: Duration,
    timeout: Duration,
    user_agent: String,
    last_dispatch: Mutex<Option<Instant>>,
}

impl RateLimitedHttpClient {
    pub fn new(transport: Arc<dyn HttpTransport>, user_agent: impl Into<String>) -> Self {
        Self {
            transport,
            min_interval: DEFAULT_MIN_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            user_agent: user_agent.into(),
            last_dispatch: Mutex::new(None),
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until `min_interval` has passed since the previous dispatch, then
    /// stamp the current time as the new dispatch time.
    async fn throttle(&self) {
        let mut last = self.last_dispatch.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("Rate limiting: sleeping {:?} before next request", wait);
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }

    /// Issue a request. Does not retry and does not inspect the status code.
    pub async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.throttle().await;

        request.timeout.get_or_insert(self.timeout);
        request
            .headers
            .push(("User-Agent".to_string(), self.user_agent.clone()));

        debug!("{} {}", request.method.as_str(), request.url);
        self.transport.send(request).await
    }
}

// ---------- Test-only stub transport ----------

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;

    /// Scripted in-memory transport keyed by URL (query excluded).
    ///
    /// Queued responses are returned in FIFO order; the last one for a URL
    /// keeps being returned once the queue is down to a single entry.
    #[derive(Clone, Default)]
    pub struct StubTransport {
        inner: Arc<StdMutex<StubInner>>,
    }

    #[derive(Default)]
    struct StubInner {
        routes: HashMap<String, VecDeque<HttpResponse>>,
        requests: Vec<(HttpRequest, Instant)>,
        fail_all: bool,
    }

    impl StubTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, url: impl Into<String>, response: HttpResponse) {
            let mut inner = self.inner.lock().unwrap();
            inner
                .routes
                .entry(url.into())
                .or_default()
                .push_back(response);
        }

        pub fn push_json(&self, url: impl Into<String>, body: serde_json::Value) {
            self.push(
                url,
                HttpResponse {
                    status: 200,
                    headers: Vec::new(),
                    body: body.to_string().into_bytes(),
                },
            );
        }

        pub fn push_status(&self, url: impl Into<String>, status: u16) {
            self.push(
                url,
                HttpResponse {
                    status,
                    headers: Vec::new(),
                    body: Vec::new(),
                },
            );
        }

        /// Make every call fail at the transport level
        pub fn fail_all(&self) {
            self.inner.lock().unwrap().fail_all = true;
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            let inner = self.inner.lock().unwrap();
            inner.requests.iter().map(|(r, _)| r.clone()).collect()
        }

        pub fn dispatch_times(&self) -> Vec<Instant> {
            let inner = self.inner.lock().unwrap();
            inner.requests.iter().map(|(_, t)| *t).collect()
        }

        pub fn urls(&self) -> Vec<String> {
            self.requests().into_iter().map(|r| r.url).collect()
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let mut inner = self.inner.lock().unwrap();
            let url = request.url.clone();
            inner.requests.push((request, Instant::now()));

            if inner.fail_all {
                return Err(HttpError::Transport("stubbed failure".to_string()));
            }

            match inner.routes.get_mut(&url) {
                Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap()),
                Some(queue) if !queue.is_empty() => Ok(queue[0].clone()),
                _ => Err(HttpError::Transport(format!("no stub for {}", url))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::StubTransport;
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok_response() -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: b"{}".to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_requests_are_spaced() {
        let stub = StubTransport::new();
        stub.push("http://example.test/a", ok_response());
        let client = RateLimitedHttpClient::new(Arc::new(stub.clone()), "ghmirror-test");

        client.send(HttpRequest::get("http://example.test/a")).await.unwrap();
        client.send(HttpRequest::get("http://example.test/a")).await.unwrap();

        let times = stub.dispatch_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_millis(1150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_has_passed() {
        let stub = StubTransport::new();
        stub.push("http://example.test/a", ok_response());
        let client = RateLimitedHttpClient::new(Arc::new(stub.clone()), "ghmirror-test");

        client.send(HttpRequest::get("http://example.test/a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let before = Instant::now();
        client.send(HttpRequest::get("http://example.test/a")).await.unwrap();

        let times = stub.dispatch_times();
        assert_eq!(times[1], before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_the_gate() {
        let stub = StubTransport::new();
        stub.push("http://example.test/a", ok_response());
        let client = RateLimitedHttpClient::new(Arc::new(stub.clone()), "ghmirror-test");

        let (a, b, c) = tokio::join!(
            client.send(HttpRequest::get("http://example.test/a")),
            client.send(HttpRequest::get("http://example.test/a")),
            client.send(HttpRequest::get("http://example.test/a")),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let times = stub.dispatch_times();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= Duration::from_millis(1150));
        assert!(times[2] - times[1] >= Duration::from_millis(1150));
    }

    #[tokio::test]
    async fn test_default_timeout_and_user_agent_are_applied() {
        let stub = StubTransport::new();
        stub.push("http://example.test/a", ok_response());
        let client = RateLimitedHttpClient::new(Arc::new(stub.clone()), "ghmirror-test")
            .with_min_interval(Duration::ZERO);

        client.send(HttpRequest::get("http://example.test/a")).await.unwrap();
        client
            .send(HttpRequest::get("http://example.test/a").timeout(Duration::from_secs(9)))
            .await
            .unwrap();

        let requests = stub.requests();
        assert_eq!(requests[0].timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(requests[1].timeout, Some(Duration::from_secs(9)));
        assert!(requests[0]
            .headers
            .contains(&("User-Agent".to_string(), "ghmirror-test".to_string())));
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let resp = HttpResponse {
            status: 302,
            headers: vec![("Location".to_string(), "http://gist.github.com/1".to_string())],
            body: Vec::new(),
        };
        assert_eq!(resp.header("location"), Some("http://gist.github.com/1"));
        assert_eq!(resp.header("etag"), None);
    }

    #[tokio::test]
    async fn test_reqwest_get_encodes_params_in_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/json/user/show/alice"))
            .and(query_param("username", "alice"))
            .and(query_param("token", "secret"))
            .and(header("User-Agent", "ghmirror-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"user\":{}}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = RateLimitedHttpClient::new(
            Arc::new(ReqwestTransport::new().unwrap()),
            "ghmirror-test",
        );
        let resp = client
            .send(
                HttpRequest::get(format!("{}/api/v2/json/user/show/alice", server.uri()))
                    .param("username", "alice")
                    .param("token", "secret"),
            )
            .await
            .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.text(), "{\"user\":{}}");
    }

    #[tokio::test]
    async fn test_reqwest_post_sends_form_body_without_following_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gists"))
            .and(body_string_contains("file_ext%5Bgistfile1%5D=.txt"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "http://gist.github.com/42"),
            )
            .mount(&server)
            .await;

        let client = RateLimitedHttpClient::new(
            Arc::new(ReqwestTransport::new().unwrap()),
            "ghmirror-test",
        );
        let resp = client
            .send(
                HttpRequest::post(format!("{}/gists", server.uri()))
                    .param("file_ext[gistfile1]", ".txt")
                    .without_redirects(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status, 302);
        assert_eq!(resp.header("location"), Some("http://gist.github.com/42"));
    }

    #[tokio::test]
    async fn test_reqwest_timeout_maps_to_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = RateLimitedHttpClient::new(
            Arc::new(ReqwestTransport::new().unwrap()),
            "ghmirror-test",
        )
        .with_timeout(Duration::from_millis(100));

        let result = client
            .send(HttpRequest::get(format!("{}/slow", server.uri())))
            .await;
        assert!(matches!(result, Err(HttpError::Timeout)));
    }
}
