// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable write-ahead log queue and offline courier.
//!
//! The [`WalQueue`] is an append-only, fsync-committed JSON-lines log backed
//! by an in-memory queue. It provides at-least-once delivery for receipts
//! and deferred upstream calls: entries are appended as `pending`, drained
//! to a sink, and marked `acked`, `pending_sync`, or `dead_letter`. The
//! on-disk log is the source of truth on restart.
//!
//! The [`OfflineCourier`] is a thin wrapper that batches receipts into the
//! WAL and reports acked sequences on drain.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod courier;
mod queue;

pub use courier::{CourierTicket, OfflineCourier};
pub use queue::{
    DeadLetterNotice, DrainSink, EntryState, EntryType, WalEntry, WalError, WalQueue,
    MAX_PAYLOAD_BYTES,
};
