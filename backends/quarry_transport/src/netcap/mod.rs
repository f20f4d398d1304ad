//! Outbound network capabilities: TCP connections, optionally upgraded to TLS.

mod errors;
pub use errors::*;

mod connection;
pub use connection::*;

pub mod ssl;
