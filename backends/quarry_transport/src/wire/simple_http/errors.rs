use derive_more::From;
use std::io;

pub type WireResult<T> = std::result::Result<T, WireError>;

/// Failures while reading a framed HTTP/1.1 response off a stream.
#[derive(From, Debug)]
pub enum WireError {
    #[from(ignore)]
    MalformedStatusLine(String),

    #[from(ignore)]
    MalformedHeader(String),

    /// A head line exceeded the line limit, or the head held too many headers.
    #[from(ignore)]
    HeadTooLarge(usize),

    #[from(ignore)]
    InvalidChunk(String),

    #[from(ignore)]
    InvalidContentLength(String),

    /// The peer closed the stream before the response was complete.
    UnexpectedEof,

    #[from]
    IO(io::Error),
}

impl std::error::Error for WireError {}

impl core::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedStatusLine(line) => write!(f, "malformed status line: {line:?}"),
            Self::MalformedHeader(line) => write!(f, "malformed header line: {line:?}"),
            Self::HeadTooLarge(limit) => write!(f, "response head exceeded limit of {limit}"),
            Self::InvalidChunk(line) => write!(f, "invalid chunk framing: {line:?}"),
            Self::InvalidContentLength(value) => write!(f, "invalid Content-Length: {value:?}"),
            Self::UnexpectedEof => write!(f, "stream closed before the response was complete"),
            Self::IO(err) => write!(f, "I/O error on stream: {err}"),
        }
    }
}

pub type SimpleRequestResult<T> = std::result::Result<T, SimpleRequestError>;

/// Failures while building a request.
#[derive(Debug, PartialEq, Eq)]
pub enum SimpleRequestError {
    /// The method was empty or not an HTTP token.
    InvalidMethod(String),

    /// The request target was empty or contained whitespace or control bytes.
    InvalidTarget(String),

    /// A header name or value would break the request framing.
    InvalidHeader(String),
}

impl std::error::Error for SimpleRequestError {}

impl core::fmt::Display for SimpleRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMethod(method) => write!(f, "invalid request method: {method:?}"),
            Self::InvalidTarget(target) => write!(f, "invalid request target: {target:?}"),
            Self::InvalidHeader(name) => write!(f, "invalid header: {name:?}"),
        }
    }
}
