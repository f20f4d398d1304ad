//! Pooled HTTP/1.1 client bound to a single upstream.
//!
//! Layers, bottom up: [`DnsResolver`] and [`ResolutionCache`] turn a host into
//! addresses, [`Transport`] runs one exchange over one connection,
//! [`TransportPool`] shares N transports with retry and replacement, and
//! [`HttpClient`] is the facade callers use.

#[allow(clippy::module_inception)]
mod client;
mod config;
mod dns;
mod errors;
mod pool;
mod redirects;
mod transport;

pub use client::*;
pub use config::*;
pub use dns::*;
pub use errors::*;
pub use pool::*;
pub use redirects::*;
pub use transport::*;
