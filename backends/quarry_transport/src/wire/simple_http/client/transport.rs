//! One connection plus the request/response exchange over it.

use std::io::{self, BufReader};

use crate::netcap::{ConnectResult, ConnectionHandle, Timeouts, TransportKind};
use crate::retries::DEAD_STREAM_STATUS;
use crate::wire::simple_http::client::ResolvedEndpoints;
use crate::wire::simple_http::{
    read_response, write_request, SimpleMethod, SimpleRequest, SimpleResponse, WireResult,
};

/// Result of one write-then-read exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(SimpleResponse),
    /// The connection failed during the exchange and must be replaced.
    Dead,
}

impl CycleOutcome {
    /// The response status, or [`DEAD_STREAM_STATUS`].
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::Completed(response) => i32::from(response.status()),
            Self::Dead => DEAD_STREAM_STATUS,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(response) if response.is_success())
    }

    #[must_use]
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }

    #[must_use]
    pub fn response(&self) -> Option<&SimpleResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Dead => None,
        }
    }

    #[must_use]
    pub fn into_response(self) -> Option<SimpleResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Dead => None,
        }
    }
}

/// Final outcome of a logical request and how many cycles it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub outcome: CycleOutcome,
    pub attempts: u32,
}

/// Owns one [`ConnectionHandle`]. Keeps no buffered data between calls.
#[derive(Debug)]
pub struct Transport {
    handle: ConnectionHandle,
}

impl Transport {
    /// Connects to the first workable address of `endpoints`.
    ///
    /// # Errors
    ///
    /// Returns the [`crate::netcap::ConnectError`] of the failed connect or handshake.
    pub fn connect(
        kind: &TransportKind,
        endpoints: &ResolvedEndpoints,
        timeouts: &Timeouts,
    ) -> ConnectResult<Self> {
        let handle = ConnectionHandle::connect(kind, endpoints.addrs(), timeouts)?;
        Ok(Self { handle })
    }

    /// Writes one framed request.
    ///
    /// # Errors
    ///
    /// Any I/O error from the stream.
    pub fn write(&mut self, request: &SimpleRequest) -> io::Result<()> {
        write_request(&mut self.handle, request)
    }

    /// Reads one framed response to a request made with `method`.
    ///
    /// # Errors
    ///
    /// Any framing or I/O failure as a [`crate::wire::simple_http::WireError`].
    pub fn read(&mut self, method: &SimpleMethod) -> WireResult<SimpleResponse> {
        let mut reader = BufReader::new(&mut self.handle);
        read_response(&mut reader, method)
    }

    /// Writes `request` and reads its response. Never fails: any I/O or
    /// framing error shuts the connection down and yields
    /// [`CycleOutcome::Dead`].
    pub fn cycle(&mut self, request: &SimpleRequest) -> CycleOutcome {
        if !self.handle.is_open() {
            tracing::debug!("Connection to {} already closed", self.handle.peer_addr());
            return CycleOutcome::Dead;
        }

        if let Err(err) = self.write(request) {
            tracing::warn!("Write to {} failed: {err}", self.handle.peer_addr());
            self.handle.shutdown();
            return CycleOutcome::Dead;
        }

        match self.read(request.method()) {
            Ok(response) => {
                if response.closes_connection() {
                    tracing::debug!("Peer {} closes after this response", self.handle.peer_addr());
                    self.handle.shutdown();
                }
                CycleOutcome::Completed(response)
            }
            Err(err) => {
                tracing::warn!("Read from {} failed: {err}", self.handle.peer_addr());
                self.handle.shutdown();
                CycleOutcome::Dead
            }
        }
    }

    #[must_use]
    pub fn is_open(&mut self) -> bool {
        self.handle.is_open()
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.handle.is_secure()
    }

    pub fn shutdown(&mut self) {
        self.handle.shutdown();
    }

    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}
