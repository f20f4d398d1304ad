//! A single logical connection over plain TCP or TLS.
//!
//! `ConnectionHandle` owns exactly one socket for its whole lifetime. It can be
//! moved but never cloned, and it shuts the socket down when dropped no matter
//! how the owning scope exits.

use super::errors::{ConnectError, ConnectResult};
use super::ssl::SecureContext;
use rustls::pki_types::ServerName;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-socket deadlines. `None` means block indefinitely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub write: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Some(DEFAULT_CONNECT_TIMEOUT),
            read: Some(DEFAULT_IO_TIMEOUT),
            write: Some(DEFAULT_IO_TIMEOUT),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            connect: Some(timeout),
            read: Some(timeout),
            write: Some(timeout),
        }
    }
}

/// The kind of connection a transport builds, fixed for its lifetime.
#[derive(Clone, Debug)]
pub enum TransportKind {
    Plaintext,
    Secure {
        /// Host sent as the TLS server-name indication.
        server_name: String,
        context: SecureContext,
    },
}

impl TransportKind {
    #[must_use]
    pub fn secure<S: Into<String>>(server_name: S, context: SecureContext) -> Self {
        Self::Secure {
            server_name: server_name.into(),
            context,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Secure { .. })
    }
}

pub type ClientTlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

pub enum RawStream {
    AsPlain(TcpStream),
    AsClientTls(Box<ClientTlsStream>, String),
}

impl RawStream {
    fn socket(&self) -> &TcpStream {
        match self {
            RawStream::AsPlain(socket) => socket,
            RawStream::AsClientTls(tls, _) => &tls.sock,
        }
    }
}

/// One established connection to a resolved endpoint.
pub struct ConnectionHandle {
    stream: RawStream,
    peer_addr: SocketAddr,
    shut: bool,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("secure", &self.is_secure())
            .field("server_name", &self.server_name())
            .field("peer_addr", &self.peer_addr)
            .field("shut", &self.shut)
            .finish()
    }
}

// -- Constructors

impl ConnectionHandle {
    /// Connects to the first workable address in `addrs`, in order.
    ///
    /// For [`TransportKind::Secure`] the TLS handshake is completed before
    /// returning, with SNI set to the kind's server name.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::NoAddresses`] when `addrs` is empty
    /// - [`ConnectError::TimedOut`] when every address timed out
    /// - [`ConnectError::Exhausted`] when every address failed otherwise
    /// - [`ConnectError::InvalidServerName`] / [`ConnectError::Handshake`] for TLS failures
    pub fn connect(
        kind: &TransportKind,
        addrs: &[SocketAddr],
        timeouts: &Timeouts,
    ) -> ConnectResult<Self> {
        if addrs.is_empty() {
            return Err(ConnectError::NoAddresses);
        }

        let mut timed_out = 0usize;
        let mut last_error = None;

        for addr in addrs {
            let attempt = match timeouts.connect {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };

            match attempt {
                Ok(socket) => {
                    tracing::debug!("TCP connected to {addr}");
                    return Self::establish(kind, socket, *addr, timeouts);
                }
                Err(err) => {
                    tracing::debug!("TCP connect to {addr} failed: {err}");
                    if err.kind() == io::ErrorKind::TimedOut {
                        timed_out += 1;
                    }
                    last_error = Some((*addr, err));
                }
            }
        }

        match last_error {
            Some((addr, _)) if timed_out == addrs.len() => Err(ConnectError::TimedOut(addr)),
            Some((_, last)) => Err(ConnectError::Exhausted {
                attempted: addrs.len(),
                last,
            }),
            None => Err(ConnectError::NoAddresses),
        }
    }

    fn establish(
        kind: &TransportKind,
        socket: TcpStream,
        peer_addr: SocketAddr,
        timeouts: &Timeouts,
    ) -> ConnectResult<Self> {
        socket.set_nodelay(true)?;
        socket.set_read_timeout(timeouts.read)?;
        socket.set_write_timeout(timeouts.write)?;

        let stream = match kind {
            TransportKind::Plaintext => RawStream::AsPlain(socket),
            TransportKind::Secure {
                server_name,
                context,
            } => {
                let tls = Self::handshake(server_name, context, socket)?;
                tracing::debug!("TLS handshake with {server_name} ({peer_addr}) completed");
                RawStream::AsClientTls(Box::new(tls), server_name.clone())
            }
        };

        Ok(Self {
            stream,
            peer_addr,
            shut: false,
        })
    }

    fn handshake(
        server_name: &str,
        context: &SecureContext,
        mut socket: TcpStream,
    ) -> ConnectResult<ClientTlsStream> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ConnectError::InvalidServerName(server_name.to_string()))?;

        let mut conn = rustls::ClientConnection::new(context.clone(), name)
            .map_err(|err| ConnectError::Handshake(err.to_string()))?;

        while conn.is_handshaking() {
            if let Err(err) = conn.complete_io(&mut socket) {
                let _ = socket.shutdown(Shutdown::Both);
                return Err(ConnectError::Handshake(err.to_string()));
            }
        }

        Ok(rustls::StreamOwned::new(conn, socket))
    }
}

// -- Methods

impl ConnectionHandle {
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self.stream, RawStream::AsClientTls(..))
    }

    /// Host used for server-name indication, if this is a TLS connection.
    #[inline]
    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        match &self.stream {
            RawStream::AsPlain(_) => None,
            RawStream::AsClientTls(_, name) => Some(name.as_str()),
        }
    }

    #[inline]
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Best-effort liveness probe.
    ///
    /// Returns `false` once this end has shut down, the socket holds a pending
    /// error, or a non-blocking peek observes the peer's FIN. TLS connections
    /// first consume any records already waiting on the socket (session
    /// tickets, `close_notify`) so those bytes cannot mask a closed peer. A
    /// `true` result does not prove the peer will answer.
    #[must_use]
    pub fn is_open(&mut self) -> bool {
        if self.shut {
            return false;
        }

        if !matches!(self.stream.socket().take_error(), Ok(None)) {
            return false;
        }

        if self.stream.socket().set_nonblocking(true).is_err() {
            return false;
        }

        let open = match &mut self.stream {
            RawStream::AsPlain(socket) => peek_open(socket),
            RawStream::AsClientTls(tls, _) => drain_tls(tls) && peek_open(&tls.sock),
        };

        self.stream.socket().set_nonblocking(false).is_ok() && open
    }

    /// Half-closes both directions and marks the handle unusable.
    ///
    /// TLS connections send `close_notify` first. Never fails: errors from an
    /// already-closed or reset socket are ignored.
    pub fn shutdown(&mut self) {
        if self.shut {
            return;
        }
        self.shut = true;

        match &mut self.stream {
            RawStream::AsPlain(socket) => {
                let _ = socket.shutdown(Shutdown::Both);
            }
            RawStream::AsClientTls(tls, _) => {
                tls.conn.send_close_notify();
                while tls.conn.wants_write() {
                    match tls.conn.write_tls(&mut tls.sock) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                let _ = tls.sock.shutdown(Shutdown::Both);
            }
        }
    }
}

fn peek_open(socket: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match socket.peek(&mut probe) {
        Ok(0) => false,
        Ok(_) => true,
        Err(err) => err.kind() == io::ErrorKind::WouldBlock,
    }
}

/// Feeds pending TLS records to the session until the socket would block.
/// Expects a non-blocking socket. `false` on EOF, `close_notify` or any error.
fn drain_tls(tls: &mut ClientTlsStream) -> bool {
    loop {
        match tls.conn.read_tls(&mut tls.sock) {
            Ok(0) => return false,
            Ok(_) => match tls.conn.process_new_packets() {
                Ok(state) if state.peer_has_closed() => return false,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!("TLS records on idle connection rejected: {err}");
                    return false;
                }
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return true,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => return false,
        }
    }
}

impl Read for ConnectionHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            RawStream::AsPlain(socket) => socket.read(buf),
            RawStream::AsClientTls(tls, _) => tls.read(buf),
        }
    }
}

impl Write for ConnectionHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stream {
            RawStream::AsPlain(socket) => socket.write(buf),
            RawStream::AsClientTls(tls, _) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stream {
            RawStream::AsPlain(socket) => socket.flush(),
            RawStream::AsClientTls(tls, _) => tls.flush(),
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
