use crate::wire::simple_http::{SimpleMethod, SimpleRequest, SimpleResponse};
use url::Url;

/// How the client treats redirect responses.
///
/// With `max_hops == 0` redirects are returned to the caller as errors that
/// carry the `Location`. Otherwise same-origin redirects are followed up to
/// `max_hops` times. A client is bound to one target, so cross-origin
/// locations are never followed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct RedirectPolicy {
    pub max_hops: u32,
}

impl RedirectPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self { max_hops: 0 }
    }

    #[must_use]
    pub fn follow(max_hops: u32) -> Self {
        Self { max_hops }
    }

    #[must_use]
    pub fn follows(&self) -> bool {
        self.max_hops > 0
    }
}

/// Base URL of the origin a client talks to.
///
/// # Errors
///
/// Returns the parse error if `host` cannot form a URL.
pub fn origin_url(secure: bool, host: &str, port: u16) -> Result<Url, url::ParseError> {
    let scheme = if secure { "https" } else { "http" };
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    Url::parse(&format!("{scheme}://{host}:{port}/"))
}

/// Resolves a `Location` value (absolute, absolute-path or relative) against
/// the URL of the request that produced it.
#[must_use]
pub fn resolve_location(base: &Url, location: &str) -> Option<Url> {
    base.join(location.trim()).ok()
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Builds the follow-up request for a redirect response, or `None` when the
/// response is not a redirect, lacks a usable `Location`, or points at
/// another origin.
///
/// 307 and 308 keep the method and body. 301, 302 and 303 re-issue as a
/// body-less GET (HEAD stays HEAD).
#[must_use]
pub fn build_followup_request(
    origin: &Url,
    request: &SimpleRequest,
    response: &SimpleResponse,
) -> Option<SimpleRequest> {
    if !response.is_redirect() {
        return None;
    }

    let location = response.location()?;
    let current = origin.join(request.target()).ok()?;
    let next = resolve_location(&current, location)?;

    if !same_origin(origin, &next) {
        tracing::debug!("Not following cross-origin redirect to {next}");
        return None;
    }

    let mut target = next.path().to_string();
    if let Some(query) = next.query() {
        target.push('?');
        target.push_str(query);
    }

    let as_get =
        matches!(response.status(), 301 | 302 | 303) && *request.method() != SimpleMethod::HEAD;

    Some(request.redirected(target, as_get))
}
