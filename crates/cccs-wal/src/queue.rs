// SPDX-License-Identifier: MIT OR Apache-2.0
//! The WAL queue proper: append, mark, drain, persistence, recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, warn};

/// Maximum serialized payload size accepted by [`WalQueue::append`].
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Queue length past which a cleanup pass discards old dead letters.
const MAX_ENTRIES_BEFORE_CLEANUP: usize = 10_000;

/// How many of the newest dead-letter entries a cleanup pass keeps.
const DEAD_LETTER_KEEP: usize = 1_000;

// ---------------------------------------------------------------------------
// Entry model
// ---------------------------------------------------------------------------

/// Delivery state of a WAL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Not yet delivered.
    Pending,
    /// Delivered to the sink.
    Acked,
    /// Durably journaled but awaiting an upstream retry (e.g. indexing).
    PendingSync,
    /// Delivery attempt failed; observable via a dead-letter notice.
    DeadLetter,
}

/// What kind of work a WAL entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// A receipt batch awaiting shipment.
    Receipt,
    /// A budget audit record.
    Budget,
    /// A policy snapshot audit record.
    PolicySnapshot,
    /// A deferred identity-service call.
    IdentityCall,
    /// A deferred budget-service call.
    BudgetCall,
}

impl EntryType {
    /// Stable `snake_case` tag for this entry type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receipt => "receipt",
            Self::Budget => "budget",
            Self::PolicySnapshot => "policy_snapshot",
            Self::IdentityCall => "identity_call",
            Self::BudgetCall => "budget_call",
        }
    }
}

/// One durable queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Strictly increasing per-queue sequence number.
    pub sequence: u64,
    /// The entry payload; copied on append and on drain.
    pub payload: Value,
    /// Current delivery state.
    pub state: EntryState,
    /// What kind of work this entry represents.
    pub entry_type: EntryType,
}

/// Synthetic descriptor emitted when a drain attempt dead-letters an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterNotice {
    /// Sequence of the entry that failed delivery.
    pub wal_sequence: u64,
    /// Entry type of the failed entry.
    pub entry_type: EntryType,
    /// Stringified delivery error.
    pub error: String,
    /// The failed entry's payload.
    pub payload: Value,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
}

/// Errors from WAL operations.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// The payload could not be serialized to JSON.
    #[error("payload is not JSON-serializable: {reason}")]
    Unserializable {
        /// Serializer detail.
        reason: String,
    },
    /// The serialized payload exceeds [`MAX_PAYLOAD_BYTES`].
    #[error("payload size {size} exceeds maximum {max} bytes")]
    PayloadTooLarge {
        /// Serialized size in bytes.
        size: usize,
        /// The enforced maximum.
        max: usize,
    },
    /// Persisting the log failed.
    #[error("failed to persist WAL")]
    Io(#[from] std::io::Error),
}

/// Sink invoked for each pending entry during a drain pass.
///
/// Receives the entry type and a copy of the payload; an `Err` dead-letters
/// the entry.
pub type DrainSink<'a> = &'a mut dyn FnMut(EntryType, Value) -> anyhow::Result<()>;

// ---------------------------------------------------------------------------
// WalQueue
// ---------------------------------------------------------------------------

struct Inner {
    entries: VecDeque<WalEntry>,
    sequence: u64,
}

/// Append-only, fsync-committed JSON-lines queue.
///
/// All mutations serialize behind one per-queue mutex. Persistence writes
/// the full entry set to a sibling temp file, fsyncs it, renames it over
/// the live path, and fsyncs the containing directory, so a partial write
/// can never shadow the last good log.
pub struct WalQueue {
    path: PathBuf,
    max_entries: usize,
    dead_letter_keep: usize,
    inner: Mutex<Inner>,
}

impl WalQueue {
    /// Open (or create) a WAL at `path` with the default capacity limits.
    ///
    /// An existing log is replayed; if any line fails to parse the queue
    /// starts fresh and empty — no partial ordering is retained from a
    /// corrupt file.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] when the parent directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WalError> {
        Self::with_limits(path, MAX_ENTRIES_BEFORE_CLEANUP, DEAD_LETTER_KEEP)
    }

    /// Open a WAL with explicit capacity limits (exposed for operators and
    /// tests; production uses [`WalQueue::open`]).
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] when the parent directory cannot be created.
    pub fn with_limits(
        path: impl Into<PathBuf>,
        max_entries: usize,
        dead_letter_keep: usize,
    ) -> Result<Self, WalError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let inner = if path.exists() {
            Self::load(&path)
        } else {
            Inner {
                entries: VecDeque::new(),
                sequence: 0,
            }
        };
        Ok(Self {
            path,
            max_entries,
            dead_letter_keep,
            inner: Mutex::new(inner),
        })
    }

    fn load(path: &Path) -> Inner {
        let fresh = Inner {
            entries: VecDeque::new(),
            sequence: 0,
        };
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "wal_load_failed");
                return fresh;
            }
        };
        let mut entries = VecDeque::new();
        let mut sequence = 0u64;
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "wal_load_failed");
                    return fresh;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEntry>(&line) {
                Ok(entry) => {
                    sequence = sequence.max(entry.sequence);
                    entries.push_back(entry);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "wal_corrupt_line");
                    return fresh;
                }
            }
        }
        Inner { entries, sequence }
    }

    /// Path of the on-disk log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries currently held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("wal lock poisoned").entries.len()
    }

    /// Whether the queue holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an entry, assigning the next sequence number.
    ///
    /// The payload is copied before storage; callers never observe later
    /// mutation. When the queue length exceeds its limit, old dead-letter
    /// entries beyond the newest [`DEAD_LETTER_KEEP`] are discarded.
    /// Pending entries are never dropped.
    ///
    /// # Errors
    ///
    /// Rejects payloads over [`MAX_PAYLOAD_BYTES`] and propagates
    /// persistence failures.
    pub fn append(&self, payload: &Value, entry_type: EntryType) -> Result<WalEntry, WalError> {
        let serialized =
            serde_json::to_string(payload).map_err(|e| WalError::Unserializable {
                reason: e.to_string(),
            })?;
        let size = serialized.len();
        if size > MAX_PAYLOAD_BYTES {
            return Err(WalError::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let mut inner = self.inner.lock().expect("wal lock poisoned");
        inner.sequence += 1;
        let entry = WalEntry {
            sequence: inner.sequence,
            payload: payload.clone(),
            state: EntryState::Pending,
            entry_type,
        };
        inner.entries.push_back(entry.clone());
        if inner.entries.len() > self.max_entries {
            self.cleanup_locked(&mut inner);
        }
        self.persist_locked(&inner)?;
        Ok(entry)
    }

    /// Append a budget audit record.
    ///
    /// # Errors
    ///
    /// Same as [`WalQueue::append`].
    pub fn append_budget_snapshot(&self, budget_data: &Value) -> Result<WalEntry, WalError> {
        self.append(budget_data, EntryType::Budget)
    }

    /// Append a policy snapshot audit record.
    ///
    /// # Errors
    ///
    /// Same as [`WalQueue::append`].
    pub fn append_policy_snapshot(&self, policy_data: &Value) -> Result<WalEntry, WalError> {
        self.append(policy_data, EntryType::PolicySnapshot)
    }

    /// Update the state of the entry with the given sequence, if present.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub fn mark(&self, sequence: u64, state: EntryState) -> Result<(), WalError> {
        let mut inner = self.inner.lock().expect("wal lock poisoned");
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.sequence == sequence) {
            entry.state = state;
        }
        self.persist_locked(&inner)
    }

    /// Drain every pending entry to `sink`.
    ///
    /// On success an entry becomes `acked`; on sink failure it becomes
    /// `dead_letter` and, if an emitter is given, a [`DeadLetterNotice`] is
    /// delivered for it. The log is persisted after each entry, so a crash
    /// mid-drain loses at most the acked marker, never the entry. After the
    /// pass, acked entries leave the in-memory queue; pending and
    /// dead-letter entries remain.
    ///
    /// The sink runs under the queue monitor; the emitter fires after the
    /// monitor is released, so it may append new entries (dead-letter
    /// receipts) without deadlocking.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub fn drain(
        &self,
        sink: DrainSink<'_>,
        mut emitter: Option<&mut dyn FnMut(&DeadLetterNotice)>,
    ) -> Result<Vec<WalEntry>, WalError> {
        let mut drained = Vec::new();
        let mut notices = Vec::new();
        {
            let mut inner = self.inner.lock().expect("wal lock poisoned");
            let pending: Vec<u64> = inner
                .entries
                .iter()
                .filter(|e| e.state == EntryState::Pending)
                .map(|e| e.sequence)
                .collect();

            for sequence in pending {
                let (entry_type, payload) = {
                    let entry = inner
                        .entries
                        .iter()
                        .find(|e| e.sequence == sequence)
                        .expect("pending entry vanished mid-drain");
                    (entry.entry_type, entry.payload.clone())
                };
                let outcome = sink(entry_type, payload);
                let entry = inner
                    .entries
                    .iter_mut()
                    .find(|e| e.sequence == sequence)
                    .expect("pending entry vanished mid-drain");
                match outcome {
                    Ok(()) => {
                        entry.state = EntryState::Acked;
                        drained.push(entry.clone());
                    }
                    Err(e) => {
                        entry.state = EntryState::DeadLetter;
                        error!(sequence, error = %e, "wal_drain_dead_letter");
                        notices.push(DeadLetterNotice {
                            wal_sequence: entry.sequence,
                            entry_type: entry.entry_type,
                            error: e.to_string(),
                            payload: entry.payload.clone(),
                            timestamp: Utc::now(),
                        });
                    }
                }
                self.persist_locked(&inner)?;
            }

            inner.entries.retain(|e| e.state != EntryState::Acked);
            self.cleanup_locked(&mut inner);
            self.persist_locked(&inner)?;
        }

        if let Some(emit) = emitter.as_deref_mut() {
            for notice in &notices {
                emit(notice);
            }
        }
        Ok(drained)
    }

    /// Entries currently marked `pending_sync`.
    #[must_use]
    pub fn pending_sync_entries(&self) -> Vec<WalEntry> {
        self.entries_in_state(EntryState::PendingSync)
    }

    /// Entries currently marked `dead_letter`.
    #[must_use]
    pub fn dead_letter_entries(&self) -> Vec<WalEntry> {
        self.entries_in_state(EntryState::DeadLetter)
    }

    fn entries_in_state(&self, state: EntryState) -> Vec<WalEntry> {
        self.inner
            .lock()
            .expect("wal lock poisoned")
            .entries
            .iter()
            .filter(|e| e.state == state)
            .cloned()
            .collect()
    }

    /// Discard dead-letter entries beyond the newest `dead_letter_keep`.
    fn cleanup_locked(&self, inner: &mut Inner) {
        let dead: Vec<u64> = inner
            .entries
            .iter()
            .filter(|e| e.state == EntryState::DeadLetter)
            .map(|e| e.sequence)
            .collect();
        if dead.len() <= self.dead_letter_keep {
            return;
        }
        let mut by_newest = dead;
        by_newest.sort_unstable_by(|a, b| b.cmp(a));
        let evict: std::collections::HashSet<u64> =
            by_newest[self.dead_letter_keep..].iter().copied().collect();
        inner
            .entries
            .retain(|e| e.state != EntryState::DeadLetter || !evict.contains(&e.sequence));
    }

    /// Atomically persist the full entry set: temp file, fsync, rename,
    /// directory fsync.
    fn persist_locked(&self, inner: &Inner) -> Result<(), WalError> {
        let tmp = self.temp_path();
        let result = (|| -> Result<(), WalError> {
            {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp)?;
                for entry in &inner.entries {
                    let line = serde_json::to_string(entry).map_err(|e| {
                        WalError::Unserializable {
                            reason: e.to_string(),
                        }
                    })?;
                    file.write_all(line.as_bytes())?;
                    file.write_all(b"\n")?;
                }
                file.flush()?;
                file.sync_all()?;
            }
            fs::rename(&tmp, &self.path)?;
            #[cfg(unix)]
            if let Some(parent) = self.path.parent() {
                File::open(parent)?.sync_all()?;
            }
            Ok(())
        })();
        if result.is_err() && tmp.exists() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
