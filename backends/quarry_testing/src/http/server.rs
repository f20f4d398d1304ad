//! Test HTTP server implementation.
//!
//! WHY: Pool and retry behavior only shows against a real peer that keeps
//! connections alive, fails on cue, and reports what it saw.
//!
//! WHAT: [`TestHttpServer`] listens on `127.0.0.1`, serves any number of
//! requests per connection through a caller-supplied handler, and counts
//! accepted connections, served requests and peak concurrency.
//!
//! HOW: A non-blocking accept loop polls the running flag. Each connection
//! gets its own thread which polls for the next request the same way, so
//! dropping the server winds everything down within one poll interval.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rustls::{ServerConfig, ServerConnection, StreamOwned};

use crate::tls::TestIdentity;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type Handler = Arc<dyn Fn(&TestRequest) -> TestResponse + Send + Sync>;

/// A request as the fixture received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    pub method: String,
    /// Request target as sent, query included.
    pub path: String,
    pub proto: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TestRequest {
    /// First value of `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What the fixture does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    hang_up: bool,
}

impl TestResponse {
    /// 200 OK with `body`.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, "OK")
            .with_header("Content-Type", "text/plain")
            .with_body(body)
    }

    /// Empty response with a custom status.
    #[must_use]
    pub fn status(code: u16, text: &str) -> Self {
        Self {
            status: code,
            status_text: text.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            hang_up: false,
        }
    }

    #[must_use]
    pub fn redirect(code: u16, location: &str) -> Self {
        Self::status(code, "Redirect").with_header("Location", location)
    }

    /// Closes the connection without writing anything.
    #[must_use]
    pub fn hang_up() -> Self {
        Self {
            hang_up: true,
            ..Self::status(0, "")
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn is_hang_up(&self) -> bool {
        self.hang_up
    }

    fn closes(&self) -> bool {
        self.headers.iter().any(|(key, value)| {
            key.eq_ignore_ascii_case("connection") && value.eq_ignore_ascii_case("close")
        })
    }

    fn render(&self, include_body: bool) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.status_text);
        for (key, value) in &self.headers {
            head.push_str(&format!("{key}: {value}\r\n"));
        }
        if !self
            .headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        if include_body {
            bytes.extend_from_slice(&self.body);
        }
        bytes
    }
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicUsize,
    served: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Connections numbered below this are closed at their next idle poll.
    idle_cutoff: AtomicUsize,
}

enum FixtureStream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl FixtureStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(stream) => stream,
            Self::Tls(stream) => &stream.sock,
        }
    }
}

impl Read for FixtureStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for FixtureStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Keep-alive HTTP/1.1 fixture server, plaintext or TLS.
///
/// ```rust
/// use quarry_testing::http::{TestHttpServer, TestResponse};
///
/// let server = TestHttpServer::start_with(|req| TestResponse::ok(req.path.clone()));
/// assert!(server.url("/x").ends_with("/x"));
/// // Server stops when dropped
/// ```
pub struct TestHttpServer {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    identity: Option<TestIdentity>,
    handle: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for TestHttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHttpServer")
            .field("addr", &self.addr)
            .field("tls", &self.identity.is_some())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl TestHttpServer {
    /// Plaintext server answering every request with `200 ok`.
    #[must_use]
    pub fn start() -> Self {
        Self::start_with(|_| TestResponse::ok("ok"))
    }

    /// Plaintext server driven by `handler`.
    #[must_use]
    pub fn start_with<F>(handler: F) -> Self
    where
        F: Fn(&TestRequest) -> TestResponse + Send + Sync + 'static,
    {
        Self::spawn(Arc::new(handler), None)
    }

    /// TLS server driven by `handler`, presenting a fresh self-signed
    /// `localhost` certificate. See [`TestHttpServer::certificate_pem`].
    #[must_use]
    pub fn start_tls<F>(handler: F) -> Self
    where
        F: Fn(&TestRequest) -> TestResponse + Send + Sync + 'static,
    {
        Self::spawn(Arc::new(handler), Some(TestIdentity::localhost()))
    }

    fn spawn(handler: Handler, identity: Option<TestIdentity>) -> Self {
        let listener =
            TcpListener::bind("127.0.0.1:0").expect("Failed to bind test HTTP server to localhost");
        let addr = listener.local_addr().expect("bound listener has an address");
        listener
            .set_nonblocking(true)
            .expect("Failed to set non-blocking");

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        let tls_config = identity.as_ref().map(TestIdentity::server_config);

        let running_clone = Arc::clone(&running);
        let counters_clone = Arc::clone(&counters);

        let handle = thread::spawn(move || {
            while running_clone.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let seq = counters_clone.accepted.fetch_add(1, Ordering::SeqCst);
                        tracing::debug!("TestHttpServer accepted {peer}");

                        let handler = Arc::clone(&handler);
                        let running = Arc::clone(&running_clone);
                        let counters = Arc::clone(&counters_clone);
                        let tls_config = tls_config.clone();
                        thread::spawn(move || {
                            let served = serve_connection(
                                stream, seq, tls_config, &handler, &running, &counters,
                            );
                            if let Err(err) = served {
                                tracing::debug!("TestHttpServer connection {peer} ended: {err}");
                            }
                        });
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(POLL_INTERVAL);
                    }
                    Err(err) => {
                        tracing::info!("TestHttpServer accept error: {err}");
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            running,
            counters,
            identity,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.identity.is_some()
    }

    /// Full URL for `path` on this server.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        let scheme = if self.is_tls() { "https" } else { "http" };
        format!("{scheme}://localhost:{}{path}", self.port())
    }

    /// PEM of the certificate a TLS server presents.
    ///
    /// # Panics
    ///
    /// When called on a plaintext server.
    #[must_use]
    pub fn certificate_pem(&self) -> String {
        self.identity
            .as_ref()
            .map(TestIdentity::certificate_pem)
            .expect("certificate_pem called on a plaintext TestHttpServer")
    }

    #[must_use]
    pub fn connections_accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Requests handed to the handler, hang-ups included.
    #[must_use]
    pub fn requests_served(&self) -> usize {
        self.counters.served.load(Ordering::SeqCst)
    }

    /// Highest number of requests ever being handled at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    /// Closes every connection accepted so far once it is idle, as a server
    /// reaping keep-alive connections would. TLS connections send
    /// `close_notify` first. Later connections are unaffected.
    pub fn close_idle_connections(&self) {
        self.counters
            .idle_cutoff
            .store(self.connections_accepted(), Ordering::SeqCst);
    }

    /// Waits until at least `count` connections were accepted. Returns whether
    /// that happened within `timeout`.
    pub fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.connections_accepted() < count {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn close_notify(stream: &mut FixtureStream) {
    if let FixtureStream::Tls(stream) = stream {
        stream.conn.send_close_notify();
        let _ = stream.flush();
    }
}

fn serve_connection(
    tcp: TcpStream,
    seq: usize,
    tls_config: Option<Arc<ServerConfig>>,
    handler: &Handler,
    running: &AtomicBool,
    counters: &Counters,
) -> io::Result<()> {
    tcp.set_nonblocking(false)?;
    tcp.set_nodelay(true)?;

    let stream = match tls_config {
        Some(config) => {
            let mut conn = ServerConnection::new(config).map_err(io::Error::other)?;
            let mut tcp = tcp;
            tcp.set_read_timeout(Some(REQUEST_TIMEOUT))?;
            while conn.is_handshaking() {
                conn.complete_io(&mut tcp)?;
            }
            FixtureStream::Tls(Box::new(StreamOwned::new(conn, tcp)))
        }
        None => FixtureStream::Plain(tcp),
    };

    let mut reader = BufReader::new(stream);

    loop {
        reader.get_ref().tcp().set_read_timeout(Some(POLL_INTERVAL))?;
        match reader.fill_buf() {
            Ok([]) => return Ok(()),
            Ok(_) => {}
            Err(err) if is_timeout(&err) => {
                if seq < counters.idle_cutoff.load(Ordering::SeqCst) {
                    tracing::debug!("TestHttpServer closing idle connection {seq}");
                    close_notify(reader.get_mut());
                    return Ok(());
                }
                if running.load(Ordering::SeqCst) {
                    continue;
                }
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        reader.get_ref().tcp().set_read_timeout(Some(REQUEST_TIMEOUT))?;
        let Some(request) = read_request(&mut reader)? else {
            return Ok(());
        };

        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let response = handler(&request);
        counters.served.fetch_add(1, Ordering::SeqCst);

        if response.is_hang_up() {
            counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Ok(());
        }

        let written = {
            let stream = reader.get_mut();
            stream
                .write_all(&response.render(request.method != "HEAD"))
                .and_then(|()| stream.flush())
        };
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        written?;

        let client_closes = request
            .header("connection")
            .is_some_and(|value| value.eq_ignore_ascii_case("close"));
        if response.closes() || client_closes {
            close_notify(reader.get_mut());
            return Ok(());
        }
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Option<TestRequest>> {
    let Some(request_line) = read_line(reader)? else {
        return Ok(None);
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path), Some(proto)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad request line: {request_line:?}"),
        ));
    };

    let mut request = TestRequest {
        method: method.to_string(),
        path: path.to_string(),
        proto: proto.to_string(),
        headers: Vec::new(),
        body: Vec::new(),
    };

    loop {
        let Some(line) = read_line(reader)? else {
            return Err(io::ErrorKind::UnexpectedEof.into());
        };
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            request
                .headers
                .push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    let chunked = request
        .header("transfer-encoding")
        .is_some_and(|value| value.eq_ignore_ascii_case("chunked"));

    if chunked {
        request.body = read_chunked(reader)?;
    } else if let Some(length) = request.header("content-length") {
        let length: usize = length
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad content-length"))?;
        let mut body = vec![0; length];
        reader.read_exact(&mut body)?;
        request.body = body;
    }

    Ok(Some(request))
}

fn read_chunked<R: BufRead>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)?.ok_or(io::ErrorKind::UnexpectedEof)?;
        let size_text = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad chunk size"))?;

        if size == 0 {
            while read_line(reader)?.is_some_and(|trailer| !trailer.is_empty()) {}
            return Ok(body);
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..])?;
        read_line(reader)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(stream: &mut TcpStream, raw: &str) -> String {
        stream.write_all(raw.as_bytes()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut head = String::new();
        let mut length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if let Some(value) = line.strip_prefix("Content-Length: ") {
                length = value.trim().parse().unwrap();
            }
            head.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).unwrap();
        head + &String::from_utf8(body).unwrap()
    }

    /// WHY: Pools depend on the fixture keeping connections alive
    /// WHAT: Two requests on one socket are both answered, one connection counted
    #[test]
    fn test_keep_alive_serves_multiple_requests() {
        let server = TestHttpServer::start_with(|req| TestResponse::ok(req.path.clone()));
        let mut stream = TcpStream::connect(server.socket_addr()).unwrap();

        let first = exchange(&mut stream, "GET /one HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let second = exchange(&mut stream, "GET /two HTTP/1.1\r\nHost: localhost\r\n\r\n");

        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(first.ends_with("/one"));
        assert!(second.ends_with("/two"));
        assert_eq!(server.connections_accepted(), 1);
        assert_eq!(server.requests_served(), 2);
        assert_eq!(server.max_in_flight(), 1);
    }

    /// WHY: Handlers inspect bodies and headers
    /// WHAT: Sized and chunked bodies both reach the handler intact
    #[test]
    fn test_request_bodies_are_decoded() {
        let server = TestHttpServer::start_with(|req| {
            TestResponse::ok(format!("{} {}", req.method, String::from_utf8_lossy(&req.body)))
        });
        let mut stream = TcpStream::connect(server.socket_addr()).unwrap();

        let sized = exchange(
            &mut stream,
            "POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
        );
        assert!(sized.ends_with("POST hello"));

        let chunked = exchange(
            &mut stream,
            "PUT / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2;x=y\r\nde\r\n0\r\n\r\n",
        );
        assert!(chunked.ends_with("PUT abcde"));
    }

    /// WHY: Dead-stream tests need a peer that vanishes mid-exchange
    /// WHAT: A hang-up closes the socket without writing a byte
    #[test]
    fn test_hang_up_closes_without_response() {
        let server = TestHttpServer::start_with(|_| TestResponse::hang_up());
        let mut stream = TcpStream::connect(server.socket_addr()).unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();

        let mut buf = Vec::new();
        let read = stream.read_to_end(&mut buf).unwrap_or(0);
        assert_eq!(read, 0);
        assert_eq!(server.requests_served(), 1);
    }

    /// WHY: Tests synchronize on connection counts
    /// WHAT: `wait_for_connections` reports success and timeout correctly
    #[test]
    fn test_wait_for_connections() {
        let server = TestHttpServer::start();
        let _a = TcpStream::connect(server.socket_addr()).unwrap();
        let _b = TcpStream::connect(server.socket_addr()).unwrap();

        assert!(server.wait_for_connections(2, Duration::from_secs(2)));
        assert!(!server.wait_for_connections(3, Duration::from_millis(50)));
        assert!(!server.is_tls());
    }

    /// WHY: Stale-connection tests need the server to reap idle keep-alives
    /// WHAT: Earlier connections see EOF, a later one is still served
    #[test]
    fn test_close_idle_connections() {
        let server = TestHttpServer::start();
        let mut stale = TcpStream::connect(server.socket_addr()).unwrap();
        assert!(server.wait_for_connections(1, Duration::from_secs(2)));

        server.close_idle_connections();
        stale
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(stale.read(&mut buf).unwrap(), 0);

        let mut fresh = TcpStream::connect(server.socket_addr()).unwrap();
        let reply = exchange(&mut fresh, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    /// WHY: Redirect fixtures carry their target
    /// WHAT: The Location header and an explicit zero length are rendered
    #[test]
    fn test_redirect_rendering() {
        let rendered = TestResponse::redirect(307, "/next").render(true);
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.starts_with("HTTP/1.1 307 Redirect\r\n"));
        assert!(text.contains("Location: /next\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }
}
