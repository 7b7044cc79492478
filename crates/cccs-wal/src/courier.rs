// SPDX-License-Identifier: MIT OR Apache-2.0
//! The offline courier: batches receipts into the WAL for asynchronous
//! shipping.

use crate::queue::{DeadLetterNotice, DrainSink, EntryType, WalError, WalQueue};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Handle returned by [`OfflineCourier::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourierTicket {
    /// Batch id generated for this receipt.
    pub courier_batch_id: String,
    /// WAL sequence the receipt was appended under.
    pub sequence: u64,
}

/// Thin wrapper over the WAL that batches receipts with fresh batch ids.
#[derive(Clone)]
pub struct OfflineCourier {
    wal: Arc<WalQueue>,
}

impl OfflineCourier {
    /// Create a courier over the given WAL.
    #[must_use]
    pub fn new(wal: Arc<WalQueue>) -> Self {
        Self { wal }
    }

    /// The underlying WAL (shared with the services that queue deferred
    /// calls and audit records).
    #[must_use]
    pub fn wal(&self) -> &Arc<WalQueue> {
        &self.wal
    }

    /// Enqueue a receipt for asynchronous delivery.
    ///
    /// The receipt is wrapped as `{"batch_id": …, "payload": receipt}` and
    /// appended as a `receipt` entry.
    ///
    /// # Errors
    ///
    /// Propagates WAL append failures (size cap, persistence).
    pub fn enqueue(&self, receipt: &Value) -> Result<CourierTicket, WalError> {
        let batch_id = Uuid::new_v4().to_string();
        let entry = self.wal.append(
            &json!({"batch_id": batch_id, "payload": receipt}),
            EntryType::Receipt,
        )?;
        Ok(CourierTicket {
            courier_batch_id: batch_id,
            sequence: entry.sequence,
        })
    }

    /// Drain pending WAL entries to `sink`, reporting acked sequences.
    ///
    /// # Errors
    ///
    /// Propagates WAL persistence failures.
    pub fn drain(
        &self,
        sink: DrainSink<'_>,
        emitter: Option<&mut dyn FnMut(&DeadLetterNotice)>,
    ) -> Result<Vec<u64>, WalError> {
        let drained = self.wal.drain(sink, emitter)?;
        Ok(drained.into_iter().map(|e| e.sequence).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EntryState;
    use serde_json::json;
    use tempfile::tempdir;

    fn courier(dir: &tempfile::TempDir) -> OfflineCourier {
        let wal = Arc::new(WalQueue::open(dir.path().join("courier.wal")).unwrap());
        OfflineCourier::new(wal)
    }

    #[test]
    fn enqueue_wraps_receipt_with_batch_id() {
        let dir = tempdir().unwrap();
        let courier = courier(&dir);
        let ticket = courier.enqueue(&json!({"receipt_id": "r1"})).unwrap();
        assert_eq!(ticket.sequence, 1);
        assert!(!ticket.courier_batch_id.is_empty());

        let mut captured = None;
        courier
            .drain(
                &mut |entry_type, payload| {
                    captured = Some((entry_type, payload));
                    Ok(())
                },
                None,
            )
            .unwrap();
        let (entry_type, payload) = captured.unwrap();
        assert_eq!(entry_type, EntryType::Receipt);
        assert_eq!(payload["batch_id"], json!(ticket.courier_batch_id));
        assert_eq!(payload["payload"], json!({"receipt_id": "r1"}));
    }

    #[test]
    fn drain_reports_acked_sequences_in_order() {
        let dir = tempdir().unwrap();
        let courier = courier(&dir);
        let a = courier.enqueue(&json!({"n": 1})).unwrap();
        let b = courier.enqueue(&json!({"n": 2})).unwrap();
        let acked = courier.drain(&mut |_, _| Ok(()), None).unwrap();
        assert_eq!(acked, vec![a.sequence, b.sequence]);
    }

    #[test]
    fn failed_delivery_keeps_entry_as_dead_letter() {
        let dir = tempdir().unwrap();
        let courier = courier(&dir);
        courier.enqueue(&json!({"n": 1})).unwrap();
        let acked = courier.drain(&mut |_, _| Err(anyhow::anyhow!("offline")), None).unwrap();
        assert!(acked.is_empty());
        let dead = courier.wal().dead_letter_entries();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].state, EntryState::DeadLetter);
    }
}
