//! Request/response correlation.
//!
//! Every outbound request carries a numeric id; the unit echoes it in the
//! matching response. [`CorrelationTable`] hands out ids and parks one
//! `oneshot` sender per in-flight request. The dispatch loop resolves
//! entries without ever waiting on a caller, and each caller waits only
//! on its own receiver.
//!
//! ```rust,ignore
//! let id = table.allocate_id();
//! let pending = table.register(id)?;
//! transport.send(codec::encode(Endpoint::UiInfo, None, id)?).await?;
//! let payload = pending.wait(DEFAULT_TIMEOUT).await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

use crate::error::Error;

/// Default round-trip deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for slow bulk fetches such as `moments/get`.
pub const MAINTENANCE_TIMEOUT: Duration = Duration::from_secs(60);

/// First id handed out after a successful login. Handshake ids of the
/// same connection are always below it.
pub const APPLICATION_ID_BASE: u64 = 16;

/// What a waiter eventually receives.
pub type Outcome = Result<Value, Error>;

struct PendingEntry {
    tx: oneshot::Sender<Outcome>,
    ticket: u64,
    created: Instant,
}

/// Table of in-flight requests keyed by correlation id.
pub struct CorrelationTable {
    next_id: AtomicU64,
    next_ticket: AtomicU64,
    epoch: AtomicU64,
    pending: DashMap<u64, PendingEntry>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            next_ticket: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            pending: DashMap::new(),
        }
    }

    /// Next request id. Strictly increasing within a connection epoch.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Start numbering for a fresh physical connection. Returns the new epoch.
    pub fn begin_epoch(&self) -> u64 {
        self.next_id.store(1, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current connection epoch (0 before the first connection).
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Move application ids to [`APPLICATION_ID_BASE`] after login.
    ///
    /// Never moves backwards, so ids stay monotonic within the epoch.
    pub fn rebase_after_login(&self) {
        self.next_id.fetch_max(APPLICATION_ID_BASE, Ordering::SeqCst);
    }

    /// Park a waiter for `id`.
    ///
    /// Fails if the id is already pending. Dropping the returned handle
    /// removes the registration again.
    pub fn register(&self, id: u64) -> Result<PendingResponse<'_>, Error> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(id) {
            Entry::Occupied(_) => {
                return Err(Error::ProtocolViolation {
                    message: format!("request id {id} is already pending"),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    tx,
                    ticket,
                    created: Instant::now(),
                });
            }
        }

        Ok(PendingResponse {
            table: self,
            id,
            ticket,
            rx,
        })
    }

    /// Register `id` and wait for its outcome.
    pub async fn await_response(&self, id: u64, timeout: Duration) -> Outcome {
        self.register(id)?.wait(timeout).await
    }

    /// Hand an outcome to the waiter for `id`.
    ///
    /// Returns `false` when nobody is waiting (never allocated, already
    /// timed out, or abandoned); that is not an error.
    pub fn resolve(&self, id: u64, outcome: Outcome) -> bool {
        let Some((_, entry)) = self.pending.remove(&id) else {
            trace!(id, "response for unknown or abandoned request id");
            return false;
        };
        trace!(
            id,
            elapsed_ms = u64::try_from(entry.created.elapsed().as_millis()).unwrap_or(u64::MAX),
            "resolving request"
        );
        entry.tx.send(outcome).is_ok()
    }

    /// Fail every pending request. Returns how many were failed.
    pub fn fail_all(&self, make_error: impl Fn() -> Error) -> usize {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry.tx.send(Err(make_error()));
                failed += 1;
            }
        }
        failed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }
}

/// A registered waiter. Await it with [`wait`](Self::wait).
pub struct PendingResponse<'a> {
    table: &'a CorrelationTable,
    id: u64,
    ticket: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingResponse<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the outcome, at most `timeout`.
    ///
    /// A sender dropped without an outcome means the table went away
    /// with the connection, reported as `ConnectionLost`.
    pub async fn wait(mut self, timeout: Duration) -> Outcome {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                trace!(id = self.id, "request timed out");
                Err(Error::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        // Only our own registration: the id may have been reused by a
        // newer epoch after a bulk failure.
        let ticket = self.ticket;
        self.table
            .pending
            .remove_if(&self.id, |_, entry| entry.ticket == ticket);
    }
}

// ── Tests ────────────────────────────────────────────────────────────
