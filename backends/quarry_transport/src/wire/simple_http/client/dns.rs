//! Name resolution and the address-resolution cache.
//!
//! WHY: Every connection a pool opens, and every ad-hoc plaintext call, needs
//! the target's addresses. Resolving once per target and sharing the result
//! keeps reconnects cheap.
//!
//! WHAT: [`DnsResolver`] is the pluggable resolution seam. [`ResolutionCache`]
//! wraps any resolver and maps `(host, port, secure)` to one immutable,
//! shared [`ResolvedEndpoints`] set.
//!
//! HOW: Lookups take the read lock first. A miss takes the write lock,
//! re-checks, and only then resolves, so concurrent misses on one key resolve
//! once. Failures are never cached.

use crate::wire::simple_http::client::errors::{DnsError, DnsResult};
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Trait for DNS resolution.
///
/// Allows pluggable DNS resolvers for testing and customization.
pub trait DnsResolver: Send + Sync + Clone {
    /// Resolves a hostname and port to socket addresses.
    ///
    /// # Errors
    ///
    /// Returns `DnsError` if resolution fails.
    fn resolve(&self, host: &str, port: u16) -> DnsResult<Vec<SocketAddr>>;
}

/// Resolver that always answers with one fixed address.
#[derive(Debug, Clone)]
pub struct StaticSocketAddr(SocketAddr);

impl Default for StaticSocketAddr {
    fn default() -> Self {
        Self(SocketAddr::from(([127, 0, 0, 1], 80)))
    }
}

impl StaticSocketAddr {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl DnsResolver for StaticSocketAddr {
    fn resolve(&self, _host: &str, _port: u16) -> DnsResult<Vec<SocketAddr>> {
        Ok(vec![self.0])
    }
}

/// System DNS resolver using `std::net::ToSocketAddrs`.
#[derive(Debug, Clone, Default)]
pub struct SystemDnsResolver;

impl SystemDnsResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DnsResolver for SystemDnsResolver {
    fn resolve(&self, host: &str, port: u16) -> DnsResult<Vec<SocketAddr>> {
        if host.is_empty() {
            return Err(DnsError::InvalidHost(host.to_string()));
        }

        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();

        if addrs.is_empty() {
            return Err(DnsError::NoAddressesFound(host.to_string()));
        }

        Ok(addrs)
    }
}

/// Mock DNS resolver for testing.
///
/// Answers from a configured table, optionally after a fixed delay, and
/// counts how many resolutions it performed.
#[derive(Debug, Clone, Default)]
pub struct MockDnsResolver {
    responses: Arc<Mutex<HashMap<String, DnsResult<Vec<SocketAddr>>>>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockDnsResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures a successful response for a hostname.
    #[must_use]
    pub fn with_response(self, host: &str, addrs: Vec<SocketAddr>) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_string(), Ok(addrs));
        self
    }

    /// Configures an error response for a hostname.
    #[must_use]
    pub fn with_error(self, host: &str, error: DnsError) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_string(), Err(error));
        self
    }

    /// Makes every resolution sleep for `delay` first.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `resolve` calls made so far, across clones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DnsResolver for MockDnsResolver {
    fn resolve(&self, host: &str, _port: u16) -> DnsResult<Vec<SocketAddr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        responses
            .get(host)
            .cloned()
            .unwrap_or_else(|| Err(DnsError::NoAddressesFound(host.to_string())))
    }
}

/// Identity of a resolution target. The same host on another port or with
/// another security mode is a distinct entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl CacheKey {
    pub fn new<S: Into<String>>(host: S, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }
}

/// Immutable address set for one target, shared by every connection to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    host: String,
    port: u16,
    addrs: Vec<SocketAddr>,
}

impl ResolvedEndpoints {
    pub fn new<S: Into<String>>(host: S, port: u16, addrs: Vec<SocketAddr>) -> Self {
        Self {
            host: host.into(),
            port,
            addrs,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }
}

pub type SharedEndpoints = Arc<ResolvedEndpoints>;

/// Read-mostly cache from [`CacheKey`] to [`SharedEndpoints`].
///
/// Entries live as long as the cache. Construct one explicitly and share it
/// through [`ResolutionCache::shared`] wherever several clients should reuse
/// resolutions.
#[derive(Debug)]
pub struct ResolutionCache<R: DnsResolver = SystemDnsResolver> {
    resolver: R,
    entries: RwLock<HashMap<CacheKey, SharedEndpoints>>,
}

impl Default for ResolutionCache<SystemDnsResolver> {
    fn default() -> Self {
        Self::new(SystemDnsResolver)
    }
}

impl<R: DnsResolver> ResolutionCache<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A new cache behind an `Arc`, ready to hand to several clients.
    pub fn shared(resolver: R) -> Arc<Self> {
        Arc::new(Self::new(resolver))
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Endpoints for `(host, port, secure)`, resolving on first use.
    ///
    /// # Errors
    ///
    /// Propagates the resolver's [`DnsError`]. Nothing is cached on failure.
    pub fn get(&self, host: &str, port: u16, secure: bool) -> DnsResult<SharedEndpoints> {
        let key = CacheKey::new(host, port, secure);

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = entries.get(&key) {
                tracing::debug!("Resolution cache hit for {host}:{port} (secure: {secure})");
                return Ok(Arc::clone(hit));
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        // another caller may have resolved while we waited for the write lock
        if let Some(hit) = entries.get(&key) {
            return Ok(Arc::clone(hit));
        }

        let resolved = self.resolve(&key)?;
        entries.insert(key, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Re-resolves `(host, port, secure)` and replaces any cached set
    /// wholesale. Holders of the old set keep it unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the resolver's [`DnsError`]. The old entry is kept on failure.
    pub fn refresh(&self, host: &str, port: u16, secure: bool) -> DnsResult<SharedEndpoints> {
        let key = CacheKey::new(host, port, secure);
        let resolved = self.resolve(&key)?;

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&resolved));

        Ok(resolved)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, key: &CacheKey) -> DnsResult<SharedEndpoints> {
        tracing::debug!("Resolving {}:{}", key.host, key.port);

        let addrs = self.resolver.resolve(&key.host, key.port).map_err(|err| {
            tracing::debug!("Resolution of {} failed: {err}", key.host);
            err
        })?;

        if addrs.is_empty() {
            return Err(DnsError::NoAddressesFound(key.host.clone()));
        }

        Ok(Arc::new(ResolvedEndpoints::new(
            key.host.clone(),
            key.port,
            addrs,
        )))
    }
}
