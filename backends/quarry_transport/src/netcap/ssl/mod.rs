//! TLS support for outbound connections.

pub mod rustls;

pub use self::rustls::{
    ClientConfig, SecureContext, SecureContextFactory, SecureContextProvider, SESSION_CACHE_SIZE,
};
