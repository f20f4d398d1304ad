//! Local fixture servers for quarry's tests.
//!
//! - [`http::TestHttpServer`]: a keep-alive HTTP/1.1 server, plaintext or TLS,
//!   driven by a per-request handler and counting what it sees.
//! - [`tls::TestIdentity`]: a throwaway self-signed identity for `localhost`.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

pub mod http;
pub mod tls;
