//! Fixed-size pool of pre-connected transports to one target.
//!
//! WHY: TLS handshakes dominate the cost of short requests. Keeping N
//! connections open to the same target and handing them out one caller at a
//! time amortizes that cost while bounding concurrency.
//!
//! WHAT: [`TransportPool`] owns N slots. A caller checks out a free slot index,
//! runs its request on that slot's transport, and returns the index. Failed
//! exchanges replace the slot's transport (never repair it) under the control
//! of a [`RetryPolicy`].
//!
//! HOW: The free list is a `Mutex<Vec<usize>>` paired with a `Condvar`. Only
//! the index handoff is serialized. Each slot's transport sits behind its own
//! mutex, which is uncontended because the free list already guarantees one
//! holder per index. Checkout returns a [`SlotGuard`] whose `Drop` returns the
//! index, so release happens exactly once on every exit path, panics included.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::netcap::{ConnectResult, Timeouts, TransportKind};
use crate::retries::{pause, RetryDecider, RetryPolicy};
use crate::wire::simple_http::client::{CycleOutcome, Exchange, SharedEndpoints, Transport};
use crate::wire::simple_http::SimpleRequest;

/// Pool size used when none is configured.
pub const DEFAULT_POOL_SIZE: usize = 5;

pub struct TransportPool {
    kind: TransportKind,
    endpoints: SharedEndpoints,
    timeouts: Timeouts,
    policy: RetryPolicy,
    slots: Vec<Mutex<Transport>>,
    free: Mutex<Vec<usize>>,
    released: Condvar,
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool")
            .field("host", &self.endpoints.host())
            .field("port", &self.endpoints.port())
            .field("secure", &self.is_secure())
            .field("size", &self.size())
            .field("available", &self.available())
            .finish()
    }
}

/// Exclusive hold on one slot index. Returns it to the pool on drop.
pub struct SlotGuard<'a> {
    pool: &'a TransportPool,
    index: usize,
}

impl SlotGuard<'_> {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut free = self.pool.free.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(!free.contains(&self.index), "slot {} released twice", self.index);
        free.push(self.index);
        drop(free);
        self.pool.released.notify_one();
    }
}

impl TransportPool {
    /// Connects all `size` transports before returning. A `size` of zero is
    /// treated as one.
    ///
    /// # Errors
    ///
    /// The first connect or handshake failure aborts pool creation.
    pub fn connect(
        size: usize,
        kind: TransportKind,
        endpoints: SharedEndpoints,
        policy: RetryPolicy,
        timeouts: Timeouts,
    ) -> ConnectResult<Self> {
        let size = size.max(1);

        let mut slots = Vec::with_capacity(size);
        for index in 0..size {
            let transport = Transport::connect(&kind, &endpoints, &timeouts).map_err(|err| {
                tracing::error!(
                    "Pool slot {index} for {}:{} failed to connect: {err}",
                    endpoints.host(),
                    endpoints.port()
                );
                err
            })?;
            slots.push(Mutex::new(transport));
        }

        tracing::debug!(
            "Pool of {size} connected to {}:{} (secure: {})",
            endpoints.host(),
            endpoints.port(),
            kind.is_secure()
        );

        Ok(Self {
            kind,
            endpoints,
            timeouts,
            policy,
            slots,
            free: Mutex::new((0..size).rev().collect()),
            released: Condvar::new(),
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots not currently checked out.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.kind.is_secure()
    }

    #[must_use]
    pub fn endpoints(&self) -> &SharedEndpoints {
        &self.endpoints
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Blocks until a slot is free and takes it.
    pub fn acquire(&self) -> SlotGuard<'_> {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(index) = free.pop() {
                return SlotGuard { pool: self, index };
            }
            free = self
                .released
                .wait(free)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn transport(&self, slot: &SlotGuard<'_>) -> MutexGuard<'_, Transport> {
        self.slots[slot.index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Swaps in a freshly connected transport of the same kind. On failure the
    /// old transport is shut down and left in place, so it reports dead.
    fn replace(&self, index: usize, transport: &mut Transport) -> bool {
        match Transport::connect(&self.kind, &self.endpoints, &self.timeouts) {
            Ok(fresh) => {
                let mut old = std::mem::replace(transport, fresh);
                old.shutdown();
                tracing::info!(
                    "Replaced connection in slot {index} to {}:{}",
                    self.endpoints.host(),
                    self.endpoints.port()
                );
                true
            }
            Err(err) => {
                transport.shutdown();
                tracing::error!("Replacing connection in slot {index} failed: {err}");
                false
            }
        }
    }

    /// Runs `request` on a pooled connection, retrying per the pool's policy.
    ///
    /// Blocks until a slot is free. A slot whose connection is already closed
    /// is replaced before the first attempt. Each retry waits the policy's
    /// jittered backoff and replaces the slot's transport. When attempts run
    /// out, the last outcome is returned as-is.
    #[tracing::instrument(skip(self, request), fields(path = request.target()))]
    pub fn send_and_read(&self, request: &SimpleRequest) -> Exchange {
        let slot = self.acquire();
        let index = slot.index();
        let mut transport = self.transport(&slot);

        if !transport.is_open() {
            tracing::debug!("Slot {index} found closed at checkout");
            self.replace(index, &mut transport);
        }

        let mut state = self.policy.start();
        loop {
            let outcome = transport.cycle(request);
            let status = outcome.status();

            if outcome.is_success() || !self.policy.should_retry(status) {
                return Exchange {
                    outcome,
                    attempts: state.attempts_used(),
                };
            }

            let Some(next) = self.policy.decide(state.clone()) else {
                tracing::error!(
                    "Giving up on slot {index} after {} attempt(s), last status {status}",
                    state.attempts_used()
                );
                if let CycleOutcome::Dead = outcome {
                    self.replace(index, &mut transport);
                }
                return Exchange {
                    outcome,
                    attempts: state.attempts_used(),
                };
            };

            let wait = next.wait.unwrap_or_default();
            tracing::warn!(
                wait_ms = wait.as_millis(),
                "Slot {index} got status {status} on attempt {}, retrying in {wait:?}",
                state.attempts_used()
            );
            pause(wait);
            self.replace(index, &mut transport);
            state = next;
        }
    }
}

#[cfg(test)]
impl TransportPool {
    fn shutdown_slot(&self, index: usize) {
        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
    }

    fn slot_state(&self, index: usize) -> (bool, bool) {
        let mut transport = self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        (transport.is_open(), transport.is_secure())
    }
}
