use std::borrow::Cow;

use super::{SimpleRequestError, SimpleRequestResult};

pub const DEFAULT_USER_AGENT: &str = concat!("quarry/", env!("CARGO_PKG_VERSION"));

// -- HTTP Artefacts

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Proto {
    HTTP10,
    HTTP11,
    Custom(String),
}

impl From<&str> for Proto {
    fn from(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "HTTP/1.0" => Self::HTTP10,
            "HTTP/1.1" => Self::HTTP11,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl core::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HTTP10 => write!(f, "HTTP/1.0"),
            Self::HTTP11 => write!(f, "HTTP/1.1"),
            Self::Custom(inner) => write!(f, "{inner}"),
        }
    }
}

/// HTTP methods
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum SimpleMethod {
    HEAD,
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    OPTIONS,
    Custom(String),
}

impl core::fmt::Display for SimpleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl From<&str> for SimpleMethod {
    fn from(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "HEAD" => Self::HEAD,
            "GET" => Self::GET,
            "POST" => Self::POST,
            "PUT" => Self::PUT,
            "DELETE" => Self::DELETE,
            "PATCH" => Self::PATCH,
            "OPTIONS" => Self::OPTIONS,
            _ => Self::Custom(value.to_string()),
        }
    }
}

impl SimpleMethod {
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            SimpleMethod::HEAD => "HEAD",
            SimpleMethod::GET => "GET",
            SimpleMethod::POST => "POST",
            SimpleMethod::PUT => "PUT",
            SimpleMethod::DELETE => "DELETE",
            SimpleMethod::PATCH => "PATCH",
            SimpleMethod::OPTIONS => "OPTIONS",
            SimpleMethod::Custom(inner) => inner.as_str(),
        }
    }

    /// Methods whose requests carry a body, so an empty one is still framed
    /// with `Content-Length: 0`.
    #[must_use]
    pub fn expects_body(&self) -> bool {
        matches!(self, Self::POST | Self::PUT | Self::PATCH)
    }
}

/// Header list that keeps insertion order and matches names case-insensitively.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimpleHeaders(Vec<(String, String)>);

impl SimpleHeaders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adds a value, keeping any existing ones.
    pub fn append<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.0.push((name.into(), value.into()));
    }

    /// Replaces every value of `name` with `value`, at the position of the
    /// first existing entry or at the end.
    pub fn set<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();

        match self.0.iter().position(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            Some(index) => {
                self.0[index].1 = value;
                let mut seen = 0usize;
                self.0.retain(|(key, _)| {
                    if key.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.0.push((name, value)),
        }
    }

    /// Removes every value of `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `name` holds `token` in any of its comma-separated values.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SimpleHeaders {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn validate_header(name: &str, value: &str) -> SimpleRequestResult<()> {
    if name.is_empty() || !name.chars().all(is_token_char) {
        return Err(SimpleRequestError::InvalidHeader(name.to_string()));
    }
    if value.contains(['\r', '\n', '\0']) {
        return Err(SimpleRequestError::InvalidHeader(name.to_string()));
    }
    Ok(())
}

fn validate_method(method: &SimpleMethod) -> SimpleRequestResult<()> {
    let name = method.value();
    if name.is_empty() || !name.chars().all(is_token_char) {
        return Err(SimpleRequestError::InvalidMethod(name.to_string()));
    }
    Ok(())
}

fn validate_target(target: &str) -> SimpleRequestResult<()> {
    if target.is_empty() || target.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(SimpleRequestError::InvalidTarget(target.to_string()));
    }
    Ok(())
}

/// A framed, ready-to-send HTTP/1.1 request.
///
/// Produced by [`HttpRequestBuilder::build`], which has already placed the
/// `Host`, `User-Agent`, `Connection` and `Content-Length` headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleRequest {
    method: SimpleMethod,
    target: String,
    proto: Proto,
    headers: SimpleHeaders,
    body: Vec<u8>,
}

impl SimpleRequest {
    #[must_use]
    pub fn builder<M: Into<SimpleMethod>, S: Into<String>>(
        method: M,
        target: S,
    ) -> HttpRequestBuilder {
        HttpRequestBuilder::new(method, target)
    }

    #[must_use]
    pub fn method(&self) -> &SimpleMethod {
        &self.method
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn proto(&self) -> &Proto {
        &self.proto
    }

    #[must_use]
    pub fn headers(&self) -> &SimpleHeaders {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn keep_alive(&self) -> bool {
        !self.headers.has_token("Connection", "close")
    }

    /// Copy of this request pointed at `target`, used when following a
    /// redirect. With `as_get` the copy becomes a body-less GET.
    #[must_use]
    pub fn redirected(&self, target: String, as_get: bool) -> Self {
        let mut next = self.clone();
        next.target = target;

        if as_get && self.method != SimpleMethod::GET {
            next.method = SimpleMethod::GET;
            next.body.clear();
            next.headers.remove("Content-Length");
            next.headers.remove("Content-Type");
        }

        next
    }
}

/// Builds [`SimpleRequest`] values.
#[derive(Clone, Debug)]
pub struct HttpRequestBuilder {
    method: SimpleMethod,
    target: String,
    proto: Proto,
    host: Option<String>,
    user_agent: Option<String>,
    keep_alive: bool,
    headers: SimpleHeaders,
    body: Option<Vec<u8>>,
}

impl HttpRequestBuilder {
    pub fn new<M: Into<SimpleMethod>, S: Into<String>>(method: M, target: S) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            proto: Proto::HTTP11,
            host: None,
            user_agent: None,
            keep_alive: true,
            headers: SimpleHeaders::new(),
            body: None,
        }
    }

    pub fn get<S: Into<String>>(target: S) -> Self {
        Self::new(SimpleMethod::GET, target)
    }

    pub fn post<S: Into<String>>(target: S) -> Self {
        Self::new(SimpleMethod::POST, target)
    }

    #[must_use]
    pub fn with_proto(mut self, proto: Proto) -> Self {
        self.proto = proto;
        self
    }

    #[must_use]
    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn add_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.append(key, value);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: &SimpleHeaders) -> Self {
        for (key, value) in headers.iter() {
            self.headers.append(key, value);
        }
        self
    }

    #[must_use]
    pub fn with_body_bytes<S: Into<Vec<u8>>>(mut self, body: S) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_body_string<S: Into<String>>(mut self, body: S) -> Self {
        self.body = Some(body.into().into_bytes());
        self
    }

    /// Validates the target and headers and lays out the final header list:
    /// `Host`, `User-Agent`, the caller's headers in insertion order, then
    /// `Connection` and `Content-Length`. Caller-supplied values for the
    /// first three win. `Content-Length` is always computed from the body.
    ///
    /// # Errors
    ///
    /// Returns [`SimpleRequestError`] when the method, the target or any
    /// header would break request framing.
    pub fn build(self) -> SimpleRequestResult<SimpleRequest> {
        validate_method(&self.method)?;
        validate_target(&self.target)?;

        let mut headers = SimpleHeaders::new();

        if let Some(host) = self.host.filter(|_| !self.headers.contains("Host")) {
            headers.append("Host", host);
        }

        if !self.headers.contains("User-Agent") {
            let agent = self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
            headers.append("User-Agent", agent);
        }

        for (key, value) in self.headers.iter() {
            if key.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            headers.append(key, value);
        }

        if !headers.contains("Connection") {
            let hint = if self.keep_alive { "keep-alive" } else { "close" };
            headers.append("Connection", hint);
        }

        let body = self.body.unwrap_or_default();
        if !body.is_empty() || self.method.expects_body() {
            headers.append("Content-Length", body.len().to_string());
        }

        for (key, value) in headers.iter() {
            validate_header(key, value)?;
        }

        Ok(SimpleRequest {
            method: self.method,
            target: self.target,
            proto: self.proto,
            headers,
            body,
        })
    }
}

/// A fully read HTTP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleResponse {
    proto: Proto,
    status: u16,
    reason: String,
    headers: SimpleHeaders,
    body: Vec<u8>,
}

impl SimpleResponse {
    #[must_use]
    pub fn new(
        proto: Proto,
        status: u16,
        reason: String,
        headers: SimpleHeaders,
        body: Vec<u8>,
    ) -> Self {
        Self {
            proto,
            status,
            reason,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn proto(&self) -> &Proto {
        &self.proto
    }

    #[must_use]
    pub fn headers(&self) -> &SimpleHeaders {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    #[must_use]
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers.get("Location")
    }

    /// Whether the server announced it will close the connection after this
    /// response.
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        match self.proto {
            Proto::HTTP10 => !self.headers.has_token("Connection", "keep-alive"),
            _ => self.headers.has_token("Connection", "close"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// WHY: Header lookups must not depend on the case the peer used
    /// WHAT: get/set/remove match names case-insensitively and keep order
    #[test]
    fn test_headers_case_insensitive_and_ordered() {
        let mut headers = SimpleHeaders::new();
        headers.append("X-First", "1");
        headers.append("content-type", "text/plain");
        headers.append("X-Multi", "a");
        headers.append("x-multi", "b");

        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get_all("X-MULTI").collect::<Vec<_>>(), vec!["a", "b"]);

        headers.set("X-Multi", "c");
        assert_eq!(headers.get_all("x-multi").collect::<Vec<_>>(), vec!["c"]);

        let names: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["X-First", "content-type", "X-Multi"]);

        assert_eq!(headers.remove("X-FIRST"), 1);
        assert_eq!(headers.len(), 2);
    }

    /// WHY: Connection tokens may be listed together in one value
    /// WHAT: `has_token` splits comma-separated values
    #[test]
    fn test_headers_token_lookup() {
        let headers: SimpleHeaders = [("Connection", "Upgrade, close")].into_iter().collect();
        assert!(headers.has_token("connection", "close"));
        assert!(!headers.has_token("connection", "keep-alive"));
    }

    /// WHY: The builder must produce the canonical header layout
    /// WHAT: Host, User-Agent, caller headers, Connection, in that order
    #[test]
    fn test_builder_header_layout() {
        let request = HttpRequestBuilder::get("/get?x=1")
            .with_host("example.com")
            .with_user_agent("tests/1.0")
            .add_header("Accept", "application/json")
            .build()
            .expect("valid request");

        let layout: Vec<(&str, &str)> = request.headers().iter().collect();
        assert_eq!(
            layout,
            vec![
                ("Host", "example.com"),
                ("User-Agent", "tests/1.0"),
                ("Accept", "application/json"),
                ("Connection", "keep-alive"),
            ]
        );
        assert_eq!(request.method(), &SimpleMethod::GET);
        assert_eq!(request.proto(), &Proto::HTTP11);
        assert!(request.body().is_empty());
        assert!(request.keep_alive());
    }

    /// WHY: Servers need a length for every body-carrying request
    /// WHAT: POST bodies get an exact Content-Length, empty POSTs get zero
    #[test]
    fn test_builder_computes_content_length() {
        let request = HttpRequestBuilder::post("/post")
            .add_header("Content-Length", "999")
            .with_body_string("hello")
            .build()
            .unwrap();
        assert_eq!(request.headers().get_all("content-length").collect::<Vec<_>>(), vec!["5"]);

        let empty = HttpRequestBuilder::post("/post").build().unwrap();
        assert_eq!(empty.headers().get("Content-Length"), Some("0"));

        let get = HttpRequestBuilder::get("/").build().unwrap();
        assert!(get.headers().get("Content-Length").is_none());
    }

    /// WHY: CR/LF in a header or target would let callers inject requests
    /// WHAT: Such inputs are rejected at build time
    #[test]
    fn test_builder_rejects_framing_breakers() {
        let bad_value = HttpRequestBuilder::get("/")
            .add_header("X-Evil", "a\r\nHost: other")
            .build();
        assert_eq!(
            bad_value,
            Err(SimpleRequestError::InvalidHeader("X-Evil".to_string()))
        );

        let bad_name = HttpRequestBuilder::get("/").add_header("Bad Name", "x").build();
        assert!(matches!(bad_name, Err(SimpleRequestError::InvalidHeader(_))));

        let bad_target = HttpRequestBuilder::get("/a b").build();
        assert!(matches!(bad_target, Err(SimpleRequestError::InvalidTarget(_))));

        assert!(HttpRequestBuilder::get("").build().is_err());
    }

    /// WHY: Custom methods go straight into the request line
    /// WHAT: Non-token method names are rejected, extension methods pass
    #[test]
    fn test_builder_rejects_non_token_methods() {
        let injected = HttpRequestBuilder::new("GE T\r\nX: y", "/").build();
        assert_eq!(
            injected,
            Err(SimpleRequestError::InvalidMethod("GE T\r\nX: y".to_string()))
        );

        assert!(matches!(
            HttpRequestBuilder::new("", "/").build(),
            Err(SimpleRequestError::InvalidMethod(_))
        ));

        let purge = HttpRequestBuilder::new("PURGE", "/cache").build().unwrap();
        assert_eq!(purge.method().value(), "PURGE");
    }

    /// WHY: Keep-alive can be turned off per request
    /// WHAT: The hint becomes `Connection: close`
    #[test]
    fn test_builder_close_hint() {
        let request = HttpRequestBuilder::get("/").keep_alive(false).build().unwrap();
        assert_eq!(request.headers().get("Connection"), Some("close"));
        assert!(!request.keep_alive());
    }

    /// WHY: 303-style redirects must drop the body and become GET
    /// WHAT: `redirected(.., true)` rewrites method, body and length header
    #[test]
    fn test_redirected_as_get() {
        let request = HttpRequestBuilder::post("/submit")
            .add_header("Content-Type", "text/plain")
            .with_body_string("data")
            .build()
            .unwrap();

        let kept = request.redirected("/elsewhere".to_string(), false);
        assert_eq!(kept.method(), &SimpleMethod::POST);
        assert_eq!(kept.body(), b"data");
        assert_eq!(kept.target(), "/elsewhere");

        let downgraded = request.redirected("/elsewhere".to_string(), true);
        assert_eq!(downgraded.method(), &SimpleMethod::GET);
        assert!(downgraded.body().is_empty());
        assert!(downgraded.headers().get("Content-Length").is_none());
        assert!(downgraded.headers().get("Content-Type").is_none());
    }

    /// WHY: Redirect detection and success checks drive the facade
    /// WHAT: Status helpers classify codes and expose Location
    #[test]
    fn test_response_helpers() {
        let headers: SimpleHeaders = [("Location", "/next")].into_iter().collect();
        let response = SimpleResponse::new(
            Proto::HTTP11,
            308,
            "Permanent Redirect".into(),
            headers,
            b"moved".to_vec(),
        );

        assert!(response.is_redirect());
        assert!(!response.is_success());
        assert_eq!(response.location(), Some("/next"));
        assert_eq!(response.body_text(), "moved");
        assert!(!response.closes_connection());

        let legacy = SimpleResponse::new(
            Proto::HTTP10,
            200,
            "OK".into(),
            SimpleHeaders::new(),
            Vec::new(),
        );
        assert!(legacy.is_success());
        assert!(legacy.closes_connection());
    }

    /// WHY: Methods arrive as text from configuration and callers
    /// WHAT: Known names map to variants, unknown ones are kept verbatim
    #[test]
    fn test_method_parsing() {
        assert_eq!(SimpleMethod::from("get"), SimpleMethod::GET);
        assert_eq!(SimpleMethod::from("PATCH"), SimpleMethod::PATCH);
        assert_eq!(
            SimpleMethod::from("PURGE"),
            SimpleMethod::Custom("PURGE".to_string())
        );
        assert_eq!(SimpleMethod::from("PURGE").to_string(), "PURGE");
        assert_eq!(Proto::from("http/1.1"), Proto::HTTP11);
    }
}
