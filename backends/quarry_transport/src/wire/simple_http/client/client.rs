//! The HTTP client facade.
//!
//! WHY: Callers want `get`/`post` against one upstream without managing
//! connections, resolution or retries themselves.
//!
//! WHAT: [`HttpClient`] is bound to one `(host, port, secure)` target. Secure
//! targets go through a shared [`TransportPool`]. Plaintext targets use a
//! fresh [`Transport`] per call. Both paths retry under the same
//! [`RetryPolicy`]. Non-2xx results from `get`/`post` become
//! [`HttpClientError::Request`]. [`HttpClient::send`] returns any status as-is.

use std::sync::Arc;

use url::Url;

use crate::netcap::ssl::{SecureContextFactory, SecureContextProvider};
use crate::netcap::{Timeouts, TransportKind};
use crate::retries::{pause, RetryDecider, RetryPolicy, DEAD_STREAM_STATUS};
use crate::wire::simple_http::client::{
    build_followup_request, origin_url, ClientConfig, CycleOutcome, DnsResolver, Exchange,
    HttpClientError, HttpClientResult, RedirectPolicy, RequestError, ResolutionCache,
    SystemDnsResolver, Transport, TransportPool, DEFAULT_POOL_SIZE,
};
use crate::wire::simple_http::{
    HttpRequestBuilder, SimpleHeaders, SimpleMethod, SimpleRequest, SimpleResponse,
    DEFAULT_USER_AGENT,
};

pub struct HttpClientBuilder<R: DnsResolver = SystemDnsResolver> {
    host: String,
    port: u16,
    secure: Option<bool>,
    pool_size: usize,
    policy: RetryPolicy,
    timeouts: Timeouts,
    redirects: RedirectPolicy,
    user_agent: Option<String>,
    context_factory: SecureContextFactory,
    cache: Arc<ResolutionCache<R>>,
}

impl HttpClientBuilder<SystemDnsResolver> {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: None,
            pool_size: DEFAULT_POOL_SIZE,
            policy: RetryPolicy::default(),
            timeouts: Timeouts::default(),
            redirects: RedirectPolicy::default(),
            user_agent: None,
            context_factory: SecureContextProvider::default_factory(),
            cache: ResolutionCache::shared(SystemDnsResolver),
        }
    }
}

impl<R: DnsResolver> HttpClientBuilder<R> {
    /// Forces TLS on or off. Without it, TLS is used for port 443.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn redirect_policy(mut self, redirects: RedirectPolicy) -> Self {
        self.redirects = redirects;
        self
    }

    #[must_use]
    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Replaces the producer of TLS contexts, e.g. with
    /// [`SecureContextProvider::root_certificates_factory`] for private CAs.
    #[must_use]
    pub fn secure_context_factory(mut self, factory: SecureContextFactory) -> Self {
        self.context_factory = factory;
        self
    }

    /// Applies every setting of `config`.
    #[must_use]
    pub fn with_config(mut self, config: &ClientConfig) -> Self {
        self.secure = config.secure.or(self.secure);
        self.pool_size = config.pool_size;
        self.policy = config.retry.to_policy();
        self.timeouts = config.timeouts.to_timeouts();
        self.redirects = config.redirects;
        if let Some(agent) = &config.user_agent {
            self.user_agent = Some(agent.clone());
        }
        self
    }

    /// Uses a shared, caller-owned resolution cache instead of a private one.
    pub fn with_resolution_cache<R2: DnsResolver>(
        self,
        cache: Arc<ResolutionCache<R2>>,
    ) -> HttpClientBuilder<R2> {
        HttpClientBuilder {
            host: self.host,
            port: self.port,
            secure: self.secure,
            pool_size: self.pool_size,
            policy: self.policy,
            timeouts: self.timeouts,
            redirects: self.redirects,
            user_agent: self.user_agent,
            context_factory: self.context_factory,
            cache,
        }
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure.unwrap_or(self.port == 443)
    }

    /// Builds the client. Secure clients resolve the target and connect their
    /// whole pool here.
    ///
    /// # Errors
    ///
    /// Invalid host, TLS context, resolution or pool connection failures.
    pub fn build(self) -> HttpClientResult<HttpClient<R>> {
        let secure = self.is_secure();

        let origin = origin_url(secure, &self.host, self.port).map_err(|err| {
            HttpClientError::InvalidConfig(format!("invalid host {:?}: {err}", self.host))
        })?;

        let kind = if secure {
            TransportKind::secure(self.host.clone(), (self.context_factory)()?)
        } else {
            TransportKind::Plaintext
        };

        let pool = if secure {
            let endpoints = self.cache.get(&self.host, self.port, true)?;
            Some(TransportPool::connect(
                self.pool_size,
                kind.clone(),
                endpoints,
                self.policy.clone(),
                self.timeouts,
            )?)
        } else {
            None
        };

        let host_header = match origin.port() {
            Some(port) => format!("{}:{port}", origin.host_str().unwrap_or(&self.host)),
            None => origin.host_str().unwrap_or(&self.host).to_string(),
        };

        Ok(HttpClient {
            host: self.host,
            port: self.port,
            host_header,
            origin,
            cache: self.cache,
            kind,
            pool,
            policy: self.policy,
            timeouts: self.timeouts,
            redirects: self.redirects,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        })
    }
}

pub struct HttpClient<R: DnsResolver = SystemDnsResolver> {
    host: String,
    port: u16,
    host_header: String,
    origin: Url,
    cache: Arc<ResolutionCache<R>>,
    kind: TransportKind,
    pool: Option<TransportPool>,
    policy: RetryPolicy,
    timeouts: Timeouts,
    redirects: RedirectPolicy,
    user_agent: String,
}

impl<R: DnsResolver> std::fmt::Debug for HttpClient<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.is_secure())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl HttpClient<SystemDnsResolver> {
    pub fn builder<S: Into<String>>(host: S, port: u16) -> HttpClientBuilder<SystemDnsResolver> {
        HttpClientBuilder::new(host, port)
    }

    /// A client with default settings.
    ///
    /// # Errors
    ///
    /// See [`HttpClientBuilder::build`].
    pub fn new<S: Into<String>>(host: S, port: u16) -> HttpClientResult<Self> {
        Self::builder(host, port).build()
    }

    /// A client configured from `config`.
    ///
    /// # Errors
    ///
    /// Invalid configuration values, then see [`HttpClientBuilder::build`].
    pub fn from_config<S: Into<String>>(
        host: S,
        port: u16,
        config: &ClientConfig,
    ) -> HttpClientResult<Self> {
        config.validate()?;
        Self::builder(host, port).with_config(config).build()
    }
}

impl<R: DnsResolver> HttpClient<R> {
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.kind.is_secure()
    }

    /// The connection pool, for secure clients.
    #[must_use]
    pub fn pool(&self) -> Option<&TransportPool> {
        self.pool.as_ref()
    }

    #[must_use]
    pub fn resolution_cache(&self) -> &Arc<ResolutionCache<R>> {
        &self.cache
    }

    /// A request builder preset with this client's `Host` and `User-Agent`.
    pub fn request<M: Into<SimpleMethod>, S: Into<String>>(
        &self,
        method: M,
        target: S,
    ) -> HttpRequestBuilder {
        HttpRequestBuilder::new(method, target)
            .with_host(self.host_header.clone())
            .with_user_agent(self.user_agent.clone())
    }

    /// GETs `target`.
    ///
    /// # Errors
    ///
    /// [`HttpClientError::Request`] for non-2xx results, including unfollowed
    /// redirects. Resolution, connect and framing failures otherwise.
    pub fn get<S: Into<String>>(
        &self,
        target: S,
        headers: &SimpleHeaders,
    ) -> HttpClientResult<SimpleResponse> {
        let request = self.request(SimpleMethod::GET, target).with_headers(headers).build()?;
        self.execute(request)
    }

    /// POSTs `body` to `target`.
    ///
    /// # Errors
    ///
    /// Same as [`HttpClient::get`].
    pub fn post<S: Into<String>, B: Into<Vec<u8>>>(
        &self,
        target: S,
        body: B,
        headers: &SimpleHeaders,
    ) -> HttpClientResult<SimpleResponse> {
        let request = self
            .request(SimpleMethod::POST, target)
            .with_headers(headers)
            .with_body_bytes(body)
            .build()?;
        self.execute(request)
    }

    /// Sends `request`, follows redirects per the client's policy, and raises
    /// on anything but a 2xx response.
    ///
    /// # Errors
    ///
    /// Same as [`HttpClient::get`].
    pub fn execute(&self, request: SimpleRequest) -> HttpClientResult<SimpleResponse> {
        let mut request = request;
        let mut hops = 0u32;

        loop {
            let exchange = self.dispatch(&request)?;
            let attempts = exchange.attempts;

            let CycleOutcome::Completed(response) = exchange.outcome else {
                return Err(Self::failure(&request, DEAD_STREAM_STATUS, attempts, Vec::new(), None));
            };

            if response.is_success() {
                return Ok(response);
            }

            if response.is_redirect() {
                if hops < self.redirects.max_hops {
                    if let Some(next) = build_followup_request(&self.origin, &request, &response) {
                        hops += 1;
                        tracing::debug!(
                            "Following {} redirect {hops}/{} to {}",
                            response.status(),
                            self.redirects.max_hops,
                            next.target()
                        );
                        request = next;
                        continue;
                    }
                }

                let location = response.location().map(str::to_string);
                let status = i32::from(response.status());
                return Err(Self::failure(&request, status, attempts, response.into_body(), location));
            }

            let status = i32::from(response.status());
            return Err(Self::failure(&request, status, attempts, response.into_body(), None));
        }
    }

    /// Sends `request` with retries and returns the response whatever its
    /// status. No redirects are followed.
    ///
    /// # Errors
    ///
    /// [`HttpClientError::Request`] with the dead-stream status when no
    /// attempt got a response. Resolution and connect failures otherwise.
    #[tracing::instrument(skip(self, request), fields(method = %request.method(), path = request.target()))]
    pub fn send(&self, request: &SimpleRequest) -> HttpClientResult<SimpleResponse> {
        let exchange = self.dispatch(request)?;
        match exchange.outcome {
            CycleOutcome::Completed(response) => Ok(response),
            CycleOutcome::Dead => Err(Self::failure(
                request,
                DEAD_STREAM_STATUS,
                exchange.attempts,
                Vec::new(),
                None,
            )),
        }
    }

    fn failure(
        request: &SimpleRequest,
        status: i32,
        attempts: u32,
        body: Vec<u8>,
        location: Option<String>,
    ) -> HttpClientError {
        let err = RequestError {
            status,
            method: request.method().clone(),
            target: request.target().to_string(),
            attempts,
            body,
            location,
        };
        tracing::debug!("{err}");
        HttpClientError::Request(err)
    }

    fn dispatch(&self, request: &SimpleRequest) -> HttpClientResult<Exchange> {
        match &self.pool {
            Some(pool) => Ok(pool.send_and_read(request)),
            None => self.send_ad_hoc(request),
        }
    }

    /// Plaintext path: a fresh connection per attempt, closed afterwards.
    fn send_ad_hoc(&self, request: &SimpleRequest) -> HttpClientResult<Exchange> {
        let endpoints = self.cache.get(&self.host, self.port, false)?;
        let mut state = self.policy.start();

        loop {
            let (outcome, connect_error) =
                match Transport::connect(&self.kind, &endpoints, &self.timeouts) {
                    Ok(mut transport) => (transport.cycle(request), None),
                    Err(err) => {
                        tracing::warn!("Connecting to {}:{} failed: {err}", self.host, self.port);
                        (CycleOutcome::Dead, Some(err))
                    }
                };

            let status = outcome.status();
            if outcome.is_success() || !self.policy.should_retry(status) {
                return Ok(Exchange {
                    outcome,
                    attempts: state.attempts_used(),
                });
            }

            let Some(next) = self.policy.decide(state.clone()) else {
                tracing::error!(
                    "Giving up after {} attempt(s), last status {status}",
                    state.attempts_used()
                );
                if let Some(err) = connect_error {
                    return Err(err.into());
                }
                return Ok(Exchange {
                    outcome,
                    attempts: state.attempts_used(),
                });
            };

            let wait = next.wait.unwrap_or_default();
            tracing::warn!(
                "Status {status} on attempt {}, retrying in {wait:?}",
                state.attempts_used()
            );
            pause(wait);
            state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retries::BackoffStrategy;
    use crate::wire::simple_http::client::{DnsError, MockDnsResolver};
    use quarry_testing::http::{TestHttpServer, TestResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn plain_client(server: &TestHttpServer) -> HttpClient {
        HttpClient::builder("localhost", server.port())
            .secure(false)
            .retry_policy(RetryPolicy::new(
                Duration::from_millis(5),
                Duration::from_millis(20),
                BackoffStrategy::Exponential,
                3,
                [429, 500, 502, 503, 504],
            ))
            .timeouts(Timeouts::uniform(Duration::from_secs(2)))
            .build()
            .unwrap()
    }

    /// WHY: Port 443 implies TLS unless overridden
    /// WHAT: The builder infers the mode from the port
    #[test]
    fn test_security_mode_inference() {
        assert!(HttpClient::builder("example.com", 443).is_secure());
        assert!(!HttpClient::builder("example.com", 80).is_secure());
        assert!(HttpClient::builder("example.com", 8443).secure(true).is_secure());
        assert!(!HttpClient::builder("example.com", 443).secure(false).is_secure());
    }

    /// WHY: The basic happy path of the facade
    /// WHAT: GET returns the body and sends Host, User-Agent and caller headers
    #[test]
    fn test_plain_get() {
        let server = TestHttpServer::start_with(|req| {
            let host = req.header("host").unwrap_or_default().to_string();
            let agent = req.header("user-agent").unwrap_or_default().to_string();
            let custom = req.header("x-trace").unwrap_or_default().to_string();
            TestResponse::ok(format!("{} {host} {agent} {custom}", req.path))
        });
        let client = plain_client(&server);
        assert!(!client.is_secure());
        assert!(client.pool().is_none());

        let headers: SimpleHeaders = [("X-Trace", "abc")].into_iter().collect();
        let response = client.get("/get?q=1", &headers).unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.body_text(),
            format!("/get?q=1 localhost:{} {DEFAULT_USER_AGENT} abc", server.port())
        );
    }

    /// WHY: POST bodies must arrive intact with their length
    /// WHAT: The server sees the method, the body and its Content-Length
    #[test]
    fn test_plain_post() {
        let server = TestHttpServer::start_with(|req| {
            TestResponse::ok(format!(
                "{} {} {}",
                req.method,
                req.header("content-length").unwrap_or_default(),
                String::from_utf8_lossy(&req.body)
            ))
        });
        let client = plain_client(&server);

        let response = client.post("/post", "price=42", &SimpleHeaders::new()).unwrap();
        assert_eq!(response.body_text(), "POST 8 price=42");
    }

    /// WHY: Non-success statuses must surface as a typed error with context
    /// WHAT: A 404 becomes RequestError with status, target, body and attempts
    #[test]
    fn test_non_success_raises() {
        let server = TestHttpServer::start_with(|_| TestResponse::status(404, "Not Found").with_body("nope"));
        let client = plain_client(&server);

        let err = client.get("/missing", &SimpleHeaders::new()).unwrap_err();
        let HttpClientError::Request(request_error) = err else {
            panic!("expected a request error");
        };
        assert_eq!(request_error.status, 404);
        assert_eq!(request_error.target, "/missing");
        assert_eq!(request_error.body_text(), "nope");
        assert_eq!(request_error.attempts, 1);
    }

    /// WHY: Raw access is the escape hatch for callers that handle statuses themselves
    /// WHAT: `send` returns the 404 response instead of raising
    #[test]
    fn test_send_returns_raw_status() {
        let server = TestHttpServer::start_with(|_| TestResponse::status(404, "Not Found"));
        let client = plain_client(&server);

        let request = client.request("GET", "/raw").build().unwrap();
        let response = client.send(&request).unwrap();
        assert_eq!(response.status(), 404);
    }

    /// WHY: Plaintext calls retry with fresh connections too
    /// WHAT: Two 503s then 200 succeed within three attempts on three connections
    #[test]
    fn test_plain_retries_with_fresh_connections() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let server = TestHttpServer::start_with(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                TestResponse::status(503, "Service Unavailable")
            } else {
                TestResponse::ok("ok")
            }
        });
        let client = plain_client(&server);

        let response = client.get("/", &SimpleHeaders::new()).unwrap();
        assert_eq!(response.body_text(), "ok");
        server.wait_for_connections(3, Duration::from_secs(2));
        assert_eq!(server.connections_accepted(), 3);
    }

    /// WHY: Redirects are detected and surfaced by default
    /// WHAT: A 308 raises with the Location attached
    #[test]
    fn test_redirect_surfaces_by_default() {
        let server = TestHttpServer::start_with(|_| TestResponse::redirect(308, "/moved"));
        let client = plain_client(&server);

        let err = client.get("/old", &SimpleHeaders::new()).unwrap_err();
        let HttpClientError::Request(request_error) = err else {
            panic!("expected a request error");
        };
        assert!(request_error.is_redirect());
        assert_eq!(request_error.location.as_deref(), Some("/moved"));
    }

    /// WHY: Opt-in following must stay bounded
    /// WHAT: Same-origin hops are followed up to the limit, then surfaced
    #[test]
    fn test_redirect_follow_is_bounded() {
        let server = TestHttpServer::start_with(|req| match req.path.as_str() {
            "/a" => TestResponse::redirect(307, "/b"),
            "/b" => TestResponse::redirect(302, "/c"),
            "/c" => TestResponse::ok("arrived"),
            _ => TestResponse::redirect(301, "/loop"),
        });

        let following = HttpClient::builder("localhost", server.port())
            .secure(false)
            .redirect_policy(RedirectPolicy::follow(2))
            .build()
            .unwrap();

        let response = following.get("/a", &SimpleHeaders::new()).unwrap();
        assert_eq!(response.body_text(), "arrived");

        let err = following.get("/loop", &SimpleHeaders::new()).unwrap_err();
        assert_eq!(err.status(), Some(301));
    }

    /// WHY: Cross-origin redirects would silently leave the bound target
    /// WHAT: They surface as errors even when following is enabled
    #[test]
    fn test_cross_origin_redirect_not_followed() {
        let server =
            TestHttpServer::start_with(|_| TestResponse::redirect(302, "http://elsewhere.example/x"));
        let client = HttpClient::builder("localhost", server.port())
            .secure(false)
            .redirect_policy(RedirectPolicy::follow(5))
            .build()
            .unwrap();

        let err = client.get("/", &SimpleHeaders::new()).unwrap_err();
        assert_eq!(err.status(), Some(302));
    }

    /// WHY: Connections dying on every attempt must be reported, not hidden
    /// WHAT: A server that always hangs up yields a dead-stream RequestError
    #[test]
    fn test_dead_stream_surfaces() {
        let server = TestHttpServer::start_with(|_| TestResponse::hang_up());
        let client = plain_client(&server);

        let err = client.get("/", &SimpleHeaders::new()).unwrap_err();
        let HttpClientError::Request(request_error) = err else {
            panic!("expected a request error");
        };
        assert!(request_error.is_dead_stream());
        assert_eq!(request_error.attempts, 3);
    }

    /// WHY: Unreachable upstreams are connect failures, not statuses
    /// WHAT: A refused port surfaces as HttpClientError::Connect after retries
    #[test]
    fn test_unreachable_upstream() {
        let dead_port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = HttpClient::builder("127.0.0.1", dead_port)
            .secure(false)
            .retry_policy(RetryPolicy::no_retry())
            .build()
            .unwrap();

        let err = client.get("/", &SimpleHeaders::new()).unwrap_err();
        assert!(matches!(err, HttpClientError::Connect(_)), "{err:?}");
    }

    /// WHY: Resolution failures must carry the DNS cause
    /// WHAT: A mock resolver without an entry yields HttpClientError::Dns
    #[test]
    fn test_resolution_failure() {
        let cache = ResolutionCache::shared(MockDnsResolver::new());
        let client = HttpClient::builder("nowhere.invalid", 80)
            .with_resolution_cache(cache)
            .build()
            .unwrap();

        let err = client.get("/", &SimpleHeaders::new()).unwrap_err();
        assert!(matches!(err, HttpClientError::Dns(DnsError::NoAddressesFound(_))));
    }

    /// WHY: Secure clients must route through a pool over verified TLS
    /// WHAT: A fixture trusted via custom roots serves a pooled GET
    #[test]
    fn test_secure_get_through_pool() {
        let server = TestHttpServer::start_tls(|_| TestResponse::ok("tls"));
        let factory =
            SecureContextProvider::root_certificates_factory(server.certificate_pem().into_bytes());

        let client = HttpClient::builder("localhost", server.port())
            .secure(true)
            .pool_size(2)
            .secure_context_factory(factory)
            .build()
            .unwrap();

        assert!(client.is_secure());
        assert_eq!(client.pool().map(TransportPool::size), Some(2));

        let response = client.get("/get", &SimpleHeaders::new()).unwrap();
        assert_eq!(response.body_text(), "tls");
        assert_eq!(client.pool().map(TransportPool::available), Some(2));
    }
}
