use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chunkyard_protocol::UploadStatus;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{RangeDescriptor, TransferError, UploadSession};

type Slot = Arc<AsyncMutex<Option<SessionEntry>>>;

/// Live progress record. Only reachable through a [`SessionGuard`].
struct SessionEntry {
    /// Distinguishes this session from a later one under the same identifier.
    generation: u64,
    bytes_received: u64,
    total_size: Option<u64>,
    /// Highest range end confirmed so far.
    highest_end: Option<u64>,
    /// Chunk writes started but not yet recorded.
    in_flight: Arc<AtomicUsize>,
    started_at: Instant,
    updated_at: Instant,
}

impl SessionEntry {
    fn new(generation: u64, total_size: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            generation,
            bytes_received: 0,
            total_size,
            highest_end: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            started_at: now,
            updated_at: now,
        }
    }

    fn to_session(&self, identifier: &str, state: UploadStatus) -> UploadSession {
        UploadSession {
            identifier: identifier.to_string(),
            bytes_received: self.bytes_received,
            total_size: self.total_size,
            state,
        }
    }
}

/// Storage work requested by [`SessionGuard::get_or_create_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// First chunk for the identifier: create the destination file.
    Create { total: Option<u64> },
    /// A transfer that started with an unknown total has just declared it.
    Extend { total: u64 },
}

/// One chunk write in progress, from [`SessionGuard::begin_write`] until
/// [`SessionGuard::finish_write`].
///
/// Dropping the ticket without finishing (failed or cancelled write)
/// releases it, so the session no longer counts the write as pending.
#[must_use = "an unfinished ticket keeps the session from being finalized"]
pub struct WriteTicket {
    generation: u64,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Process-wide map from file identifier to transfer progress.
///
/// Every identifier gets its own async lock slot. The outer map is only
/// locked long enough to find or insert a slot, so operations on different
/// identifiers never wait on each other. Progress lives in memory only and is
/// lost when the process exits.
#[derive(Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    active: AtomicUsize,
    generations: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires exclusive access to `identifier`, creating its slot if needed.
    pub async fn lock(&self, identifier: &str) -> SessionGuard<'_> {
        let slot = {
            let mut slots = self.slots();
            Arc::clone(slots.entry(identifier.to_string()).or_default())
        };
        SessionGuard {
            registry: self,
            identifier: identifier.to_string(),
            entry: slot.lock_owned().await,
        }
    }

    /// Like [`lock`](Self::lock), but returns `None` instead of creating a slot.
    pub async fn lock_existing(&self, identifier: &str) -> Option<SessionGuard<'_>> {
        let slot = self.slots().get(identifier).cloned()?;
        Some(SessionGuard {
            registry: self,
            identifier: identifier.to_string(),
            entry: slot.lock_owned().await,
        })
    }

    /// Returns the session for `identifier`, creating it with `declared_total`
    /// when absent. See [`SessionGuard::get_or_create_with`].
    pub async fn get_or_create(
        &self,
        identifier: &str,
        declared_total: Option<u64>,
    ) -> Result<UploadSession, TransferError> {
        self.lock(identifier)
            .await
            .get_or_create_with(declared_total, |_| async { Ok(()) })
            .await
    }

    /// Atomically adds `n` received bytes to the session.
    pub async fn record_bytes(
        &self,
        identifier: &str,
        n: u64,
    ) -> Result<UploadSession, TransferError> {
        match self.lock_existing(identifier).await {
            Some(mut guard) => guard.record_bytes(n),
            None => Err(TransferError::SessionVanished(identifier.to_string())),
        }
    }

    /// Removes the session. Returns `None` if it was already gone.
    pub async fn complete(&self, identifier: &str) -> Option<UploadSession> {
        self.lock_existing(identifier).await?.complete()
    }

    /// Returns a copy of the session, if a transfer is in progress.
    pub async fn snapshot(&self, identifier: &str) -> Option<UploadSession> {
        self.lock_existing(identifier).await?.session()
    }

    /// Number of transfers in progress.
    pub fn len(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive access to one identifier's session.
///
/// Get-or-create, record and complete are all methods on the guard, so they
/// are linearizable per identifier. Dropping the guard releases the slot and
/// prunes it from the map once the session is gone and nobody else waits on it.
pub struct SessionGuard<'a> {
    registry: &'a SessionRegistry,
    identifier: String,
    entry: OwnedMutexGuard<Option<SessionEntry>>,
}

impl SessionGuard<'_> {
    /// Returns a copy of the session, if one exists.
    pub fn session(&self) -> Option<UploadSession> {
        self.entry
            .as_ref()
            .map(|e| e.to_session(&self.identifier, UploadStatus::InProgress))
    }

    /// Returns the existing session or creates one.
    ///
    /// `allocate` runs inside the critical section before any state is
    /// stored: with [`Allocation::Create`] for a new session, or with
    /// [`Allocation::Extend`] when an unknown total is declared for the first
    /// time. If it fails, the registry is left untouched. A known total that
    /// differs from the one already recorded is rejected, and so is a newly
    /// declared total that bytes already confirmed reach past.
    pub async fn get_or_create_with<F, Fut>(
        &mut self,
        declared_total: Option<u64>,
        allocate: F,
    ) -> Result<UploadSession, TransferError>
    where
        F: FnOnce(Allocation) -> Fut,
        Fut: Future<Output = Result<(), TransferError>>,
    {
        match self.entry.as_mut() {
            None => {
                allocate(Allocation::Create {
                    total: declared_total,
                })
                .await?;
                let generation = self.registry.generations.fetch_add(1, Ordering::AcqRel);
                *self.entry = Some(SessionEntry::new(generation, declared_total));
                self.registry.active.fetch_add(1, Ordering::AcqRel);
                tracing::info!(
                    identifier = %self.identifier,
                    total = ?declared_total,
                    "upload session created"
                );
            }
            Some(entry) => match (entry.total_size, declared_total) {
                (Some(known), Some(declared)) if known != declared => {
                    return Err(TransferError::TotalSizeMismatch { known, declared });
                }
                (None, Some(declared)) => {
                    if let Some(end) = entry.highest_end
                        && end >= declared
                    {
                        return Err(TransferError::InvalidRangeBounds {
                            start: 0,
                            end,
                            total: Some(declared),
                        });
                    }
                    allocate(Allocation::Extend { total: declared }).await?;
                    entry.total_size = Some(declared);
                    entry.updated_at = Instant::now();
                    tracing::info!(
                        identifier = %self.identifier,
                        total = declared,
                        "upload total size learned"
                    );
                }
                _ => {}
            },
        }

        self.session()
            .ok_or_else(|| TransferError::SessionVanished(self.identifier.clone()))
    }

    /// Registers a chunk write that is about to start.
    pub fn begin_write(&mut self) -> Result<WriteTicket, TransferError> {
        let entry = self
            .entry
            .as_ref()
            .ok_or_else(|| TransferError::SessionVanished(self.identifier.clone()))?;
        entry.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(WriteTicket {
            generation: entry.generation,
            in_flight: Arc::clone(&entry.in_flight),
        })
    }

    /// Number of chunk writes started but not yet finished or abandoned.
    pub fn writes_in_flight(&self) -> usize {
        self.entry
            .as_ref()
            .map_or(0, |e| e.in_flight.load(Ordering::Acquire))
    }

    /// Records `n` bytes written for `range` under `ticket`.
    ///
    /// Fails with [`TransferError::SessionEnded`] when the session the ticket
    /// was issued for has been completed (or replaced) in the meantime, and
    /// with [`TransferError::InvalidRangeBounds`] when a total learned during
    /// the write no longer covers `range`. Neither counts the bytes.
    pub fn finish_write(
        &mut self,
        ticket: WriteTicket,
        range: &RangeDescriptor,
        n: u64,
    ) -> Result<UploadSession, TransferError> {
        let entry = match self.entry.as_mut() {
            Some(entry) if entry.generation == ticket.generation => entry,
            _ => return Err(TransferError::SessionEnded(self.identifier.clone())),
        };
        drop(ticket);

        if let Some(total) = entry.total_size
            && range.end >= total
        {
            return Err(TransferError::InvalidRangeBounds {
                start: range.start,
                end: range.end,
                total: Some(total),
            });
        }

        entry.bytes_received = entry.bytes_received.saturating_add(n);
        entry.highest_end = entry.highest_end.max(Some(range.end));
        entry.updated_at = Instant::now();
        Ok(entry.to_session(&self.identifier, UploadStatus::InProgress))
    }

    /// Adds `n` confirmed bytes to the session.
    pub fn record_bytes(&mut self, n: u64) -> Result<UploadSession, TransferError> {
        let entry = self
            .entry
            .as_mut()
            .ok_or_else(|| TransferError::SessionVanished(self.identifier.clone()))?;
        entry.bytes_received = entry.bytes_received.saturating_add(n);
        entry.updated_at = Instant::now();
        Ok(entry.to_session(&self.identifier, UploadStatus::InProgress))
    }

    /// Removes the session and returns its final state.
    ///
    /// Idempotent: returns `None` if the session was already removed. Writes
    /// still in flight for the removed session fail with
    /// [`TransferError::SessionEnded`] when they finish.
    pub fn complete(&mut self) -> Option<UploadSession> {
        let entry = self.entry.take()?;
        self.registry.active.fetch_sub(1, Ordering::AcqRel);
        tracing::info!(
            identifier = %self.identifier,
            bytes = entry.bytes_received,
            pending_writes = entry.in_flight.load(Ordering::Acquire),
            elapsed_ms = entry.started_at.elapsed().as_millis() as u64,
            idle_ms = entry.updated_at.elapsed().as_millis() as u64,
            "upload session completed"
        );
        Some(entry.to_session(&self.identifier, UploadStatus::Complete))
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.entry.is_some() {
            return;
        }
        let mut slots = self.registry.slots();
        let ours = OwnedMutexGuard::mutex(&self.entry);
        // Two references: the map's and this guard's. Anyone else holding the
        // slot will prune it when they finish.
        let unshared = slots
            .get(&self.identifier)
            .is_some_and(|slot| Arc::ptr_eq(slot, ours) && Arc::strong_count(slot) == 2);
        if unshared {
            slots.remove(&self.identifier);
        }
    }
}
