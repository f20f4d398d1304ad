use derive_more::From;

use std::{io, net::SocketAddr};

pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Failures while building a reusable TLS client configuration.
#[derive(From, Debug)]
pub enum TlsError {
    /// No trust anchors could be loaded for peer verification.
    #[from(ignore)]
    NoTrustAnchors,

    /// The supplied PEM data held no usable certificate.
    #[from(ignore)]
    InvalidCertificate(String),

    #[from]
    Rustls(rustls::Error),
}

impl std::error::Error for TlsError {}

impl core::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTrustAnchors => write!(f, "no trust anchors available for peer verification"),
            Self::InvalidCertificate(msg) => write!(f, "invalid certificate data: {msg}"),
            Self::Rustls(err) => write!(f, "rustls configuration failed: {err}"),
        }
    }
}

pub type ConnectResult<T> = std::result::Result<T, ConnectError>;

/// Failures while establishing a connection. All of them are fatal for the
/// handle being built and are never retried internally.
#[derive(Debug)]
pub enum ConnectError {
    /// The resolved address set was empty.
    NoAddresses,

    /// Every resolved address refused or failed the TCP connect.
    Exhausted {
        attempted: usize,
        last: io::Error,
    },

    /// Every resolved address timed out.
    TimedOut(SocketAddr),

    /// The host could not be used as a TLS server name.
    InvalidServerName(String),

    /// The TLS handshake was rejected or failed mid-way.
    Handshake(String),

    IO(io::Error),
}

impl ConnectError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

impl From<io::Error> for ConnectError {
    fn from(value: io::Error) -> Self {
        ConnectError::IO(value)
    }
}

impl std::error::Error for ConnectError {}

impl core::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAddresses => write!(f, "no resolved addresses to connect to"),
            Self::Exhausted { attempted, last } => {
                write!(f, "all {attempted} resolved addresses failed, last error: {last}")
            }
            Self::TimedOut(addr) => write!(f, "connection to {addr} timed out"),
            Self::InvalidServerName(host) => write!(f, "invalid TLS server name: {host}"),
            Self::Handshake(msg) => write!(f, "TLS handshake failed: {msg}"),
            Self::IO(err) => write!(f, "I/O error while connecting: {err}"),
        }
    }
}
