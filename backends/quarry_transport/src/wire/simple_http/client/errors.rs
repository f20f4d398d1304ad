use crate::netcap::{ConnectError, TlsError};
use crate::retries::DEAD_STREAM_STATUS;
use crate::wire::simple_http::{SimpleMethod, SimpleRequestError};
use derive_more::From;
use std::io;

pub type DnsResult<T> = std::result::Result<T, DnsError>;

/// DNS resolution errors.
///
/// These errors occur during DNS hostname resolution.
#[derive(From, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// DNS resolution failed for the given hostname.
    #[from(ignore)]
    ResolutionFailed(String),

    /// Invalid hostname provided.
    #[from(ignore)]
    InvalidHost(String),

    /// No addresses found for the given hostname.
    #[from(ignore)]
    NoAddressesFound(String),

    /// I/O error during DNS resolution.
    #[from(ignore)]
    IoError(String),
}

impl From<io::Error> for DnsError {
    fn from(err: io::Error) -> Self {
        DnsError::IoError(err.to_string())
    }
}

impl std::error::Error for DnsError {}

impl core::fmt::Display for DnsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResolutionFailed(host) => write!(f, "DNS resolution failed for host: {host}"),
            Self::InvalidHost(host) => write!(f, "Invalid hostname: {host:?}"),
            Self::NoAddressesFound(host) => write!(f, "No addresses found for host: {host}"),
            Self::IoError(err) => write!(f, "I/O error during DNS resolution: {err}"),
        }
    }
}

/// A request that did not end in a 2xx response.
///
/// `status` is the last observed status, or [`DEAD_STREAM_STATUS`] when the
/// connection failed on every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub status: i32,
    pub method: SimpleMethod,
    pub target: String,
    pub attempts: u32,
    pub body: Vec<u8>,
    /// `Location` of an unfollowed redirect.
    pub location: Option<String>,
}

impl RequestError {
    #[must_use]
    pub fn is_dead_stream(&self) -> bool {
        self.status == DEAD_STREAM_STATUS
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl std::error::Error for RequestError {}

impl core::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_dead_stream() {
            write!(
                f,
                "{} {} failed: connection unusable after {} attempt(s)",
                self.method, self.target, self.attempts
            )?;
        } else {
            write!(
                f,
                "{} {} failed with status {} after {} attempt(s)",
                self.method, self.target, self.status, self.attempts
            )?;
        }

        if let Some(location) = &self.location {
            write!(f, ", redirected to {location}")?;
        }

        Ok(())
    }
}

pub type HttpClientResult<T> = std::result::Result<T, HttpClientError>;

/// HTTP client errors.
///
/// The single error type surfaced by [`super::HttpClient`].
#[derive(From, Debug)]
pub enum HttpClientError {
    /// DNS resolution error.
    #[from]
    Dns(DnsError),

    /// TCP connect or TLS handshake failure.
    #[from]
    Connect(ConnectError),

    /// The TLS client context could not be built.
    #[from]
    Tls(TlsError),

    /// The request could not be framed.
    #[from]
    Build(SimpleRequestError),

    /// The server answered with a non-success status.
    #[from]
    Request(RequestError),

    /// Configuration text could not be parsed.
    #[from]
    Config(toml::de::Error),

    /// Configuration values are inconsistent.
    #[from(ignore)]
    InvalidConfig(String),
}

impl HttpClientError {
    /// Status of a [`HttpClientError::Request`] failure.
    #[must_use]
    pub fn status(&self) -> Option<i32> {
        match self {
            Self::Request(err) => Some(err.status),
            _ => None,
        }
    }
}

impl std::error::Error for HttpClientError {}

impl core::fmt::Display for HttpClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dns(err) => write!(f, "DNS error: {err}"),
            Self::Connect(err) => write!(f, "Connection failed: {err}"),
            Self::Tls(err) => write!(f, "TLS setup failed: {err}"),
            Self::Build(err) => write!(f, "Invalid request: {err}"),
            Self::Request(err) => write!(f, "Request failed: {err}"),
            Self::Config(err) => write!(f, "Invalid configuration: {err}"),
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}
