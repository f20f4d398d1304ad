//! Pooled, TLS-capable HTTP/1.1 transport to a single upstream host.
//!
//! ```no_run
//! use quarry_transport::wire::simple_http::client::HttpClient;
//! use quarry_transport::wire::simple_http::SimpleHeaders;
//!
//! let client = HttpClient::new("api.example.com", 443)?;
//! let response = client.get("/v1/status", &SimpleHeaders::new())?;
//! println!("{}", response.body_text());
//! # Ok::<(), quarry_transport::wire::simple_http::client::HttpClientError>(())
//! ```

pub mod netcap;
pub mod retries;
pub mod wire;

pub use wire::simple_http::client::{ClientConfig, HttpClient, HttpClientBuilder, HttpClientError};
