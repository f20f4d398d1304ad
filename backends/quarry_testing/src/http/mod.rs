//! HTTP test server utilities.
//!
//! WHY: Transport tests need a real peer that can be told to fail, stall or
//! drop connections on cue.
//!
//! WHAT: [`TestHttpServer`] for integration testing HTTP clients.
//!
//! HOW: Stdlib `TcpListener`, one thread per connection, hand-parsed requests
//! and hand-rendered responses. TLS mode wraps each socket in a rustls server
//! connection.

mod server;

pub use server::{TestHttpServer, TestRequest, TestResponse};
