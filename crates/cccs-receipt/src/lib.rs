// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt construction, signing, and durable journaling.
//!
//! [`ReceiptService::write_receipt`] assembles the canonical envelope,
//! fires `before_sign` hooks, requests a remote signature, validates the
//! schema, fires `before_flush` hooks, appends one JSON line to the
//! fsync'd journal, and hands a copy to the offline courier. Indexing is
//! best-effort: an indexer failure marks the courier entry `pending_sync`
//! and never fails the write — durability is already guaranteed by the
//! journal fsync.
//!
//! Hook ordering invariant: every `before_sign` hook runs before the
//! signature is computed (signatures therefore cover the mutated
//! envelope); every `before_flush` hook runs after signing but before the
//! journal write. Hooks must not perform I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use cccs_adapters::{HttpConfig, IndexerAdapter, SigningAdapter, SigningAdapterConfig};
use cccs_core::{JsonMap, ReceiptRecord, TraceContext};
use cccs_error::{CccsError, ErrorKind};
use cccs_wal::{EntryState, OfflineCourier};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;
use uuid::Uuid;

/// Maximum serialized receipt size.
const MAX_RECEIPT_BYTES: usize = 10 * 1024 * 1024;

/// High-water mark for the in-memory receipt-id dedup set.
const SEEN_IDS_MAX: usize = 100_000;

/// How many ids survive a dedup-set trim.
const SEEN_IDS_KEEP: usize = 50_000;

/// Keys every receipt envelope must carry.
const REQUIRED_FIELDS: [&str; 12] = [
    "receipt_id",
    "gate_id",
    "policy_version_ids",
    "snapshot_hash",
    "timestamp_utc",
    "timestamp_monotonic_ms",
    "inputs",
    "decision",
    "result",
    "actor",
    "degraded",
    "signature",
];

/// Decision statuses accepted by the schema check.
const ALLOWED_DECISIONS: [&str; 4] = ["pass", "warn", "soft_block", "hard_block"];

/// An envelope-mutating hook fired during receipt construction.
pub type Hook = Box<dyn Fn(&mut JsonMap) + Send + Sync>;

/// Clock used for receipt timestamps; injectable for tests.
pub type ClockFn = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Receipt service configuration.
#[derive(Debug, Clone)]
pub struct ReceiptConfig {
    /// Gate the receipts are issued for.
    pub gate_id: String,
    /// Path of the append-only JSONL journal.
    pub storage_path: PathBuf,
    /// Signing / KMS adapter settings.
    pub signing: SigningAdapterConfig,
    /// Receipt indexer settings; indexing is skipped when absent.
    pub indexer: Option<HttpConfig>,
}

/// Caller-supplied material for one receipt.
#[derive(Debug, Clone, Default)]
pub struct ReceiptDraft {
    /// The gated action's inputs.
    pub inputs: JsonMap,
    /// Result block (`status`, `rationale`, `badges`, …).
    pub result: JsonMap,
    /// Resolved actor block fields.
    pub actor: JsonMap,
    /// Policy metadata (`policy_version_ids`, `policy_snapshot_hash`).
    pub policy_metadata: JsonMap,
    /// Trace context to embed, if a span is open.
    pub trace: Option<TraceContext>,
    /// Free-form annotations.
    pub annotations: Option<JsonMap>,
    /// Whether the runtime was serving degraded.
    pub degraded: bool,
}

struct SeenIds {
    set: HashSet<String>,
    order: VecDeque<String>,
}

/// Composes canonical receipts and writes them to the fsync'd journal.
pub struct ReceiptService {
    config: ReceiptConfig,
    courier: OfflineCourier,
    signing: SigningAdapter,
    indexer: Option<IndexerAdapter>,
    handle: tokio::runtime::Handle,
    clock: ClockFn,
    before_sign: Mutex<Vec<Hook>>,
    before_flush: Mutex<Vec<Hook>>,
    seen_ids: Mutex<SeenIds>,
    fsync_offset: AtomicU64,
    journal_lock: Mutex<()>,
}

impl ReceiptService {
    /// Build the service with the wall clock.
    ///
    /// # Errors
    ///
    /// Fails when an adapter cannot be constructed or the journal's parent
    /// directory cannot be created.
    pub fn new(
        config: ReceiptConfig,
        courier: OfflineCourier,
        handle: tokio::runtime::Handle,
    ) -> Result<Self, CccsError> {
        Self::with_clock(config, courier, handle, Box::new(Utc::now))
    }

    /// Build the service with an injected clock.
    ///
    /// # Errors
    ///
    /// Same as [`ReceiptService::new`].
    pub fn with_clock(
        config: ReceiptConfig,
        courier: OfflineCourier,
        handle: tokio::runtime::Handle,
        clock: ClockFn,
    ) -> Result<Self, CccsError> {
        if let Some(parent) = config.storage_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CccsError::new(ErrorKind::Unknown, "failed to create receipt storage directory")
                    .with_source(e)
            })?;
        }
        let signing = SigningAdapter::new(config.signing.clone())?;
        let indexer = config
            .indexer
            .clone()
            .map(IndexerAdapter::new)
            .transpose()?;
        Ok(Self {
            config,
            courier,
            signing,
            indexer,
            handle,
            clock,
            before_sign: Mutex::new(Vec::new()),
            before_flush: Mutex::new(Vec::new()),
            seen_ids: Mutex::new(SeenIds {
                set: HashSet::new(),
                order: VecDeque::new(),
            }),
            fsync_offset: AtomicU64::new(0),
            journal_lock: Mutex::new(()),
        })
    }

    /// Register a hook that runs before the envelope is signed.
    pub fn register_before_sign(&self, hook: Hook) {
        self.before_sign.lock().expect("hook lock poisoned").push(hook);
    }

    /// Register a hook that runs after signing, before the journal write.
    pub fn register_before_flush(&self, hook: Hook) {
        self.before_flush.lock().expect("hook lock poisoned").push(hook);
    }

    /// Construct, sign, validate, journal, and enqueue one receipt.
    ///
    /// All caller-visible data are copied into the envelope; mutating the
    /// draft's sources after this call cannot change what was persisted.
    ///
    /// # Errors
    ///
    /// Fails with `receipt_schema_error` when the envelope is missing
    /// required fields, carries an invalid decision status, or exceeds the
    /// size cap; signing and journal failures propagate as their own
    /// kinds. Indexer failures never fail the call.
    pub fn write_receipt(&self, draft: ReceiptDraft) -> Result<ReceiptRecord, CccsError> {
        let receipt_id = self.fresh_receipt_id();
        let timestamp = (self.clock)();

        let mut envelope = JsonMap::new();
        envelope.insert("receipt_id".into(), json!(receipt_id));
        envelope.insert("gate_id".into(), json!(self.config.gate_id));
        envelope.insert(
            "policy_version_ids".into(),
            draft
                .policy_metadata
                .get("policy_version_ids")
                .cloned()
                .unwrap_or_else(|| json!([])),
        );
        envelope.insert(
            "snapshot_hash".into(),
            draft
                .policy_metadata
                .get("policy_snapshot_hash")
                .cloned()
                .unwrap_or(Value::Null),
        );
        envelope.insert("timestamp_utc".into(), json!(timestamp.to_rfc3339()));
        envelope.insert(
            "timestamp_monotonic_ms".into(),
            json!(timestamp.timestamp_millis()),
        );
        envelope.insert("inputs".into(), Value::Object(draft.inputs.clone()));
        envelope.insert(
            "decision".into(),
            json!({
                "status": draft.result.get("status").cloned().unwrap_or(Value::Null),
                "rationale": draft.result.get("rationale").cloned().unwrap_or(Value::Null),
                "badges": draft.result.get("badges").cloned().unwrap_or_else(|| json!([])),
            }),
        );
        envelope.insert("result".into(), Value::Object(draft.result.clone()));
        envelope.insert("actor".into(), Value::Object(draft.actor.clone()));
        envelope.insert("degraded".into(), json!(draft.degraded));
        envelope.insert(
            "annotations".into(),
            Value::Object(draft.annotations.clone().unwrap_or_default()),
        );
        if let Some(trace) = &draft.trace {
            envelope.insert(
                "trace".into(),
                json!({
                    "trace_id": trace.trace_id,
                    "span_id": trace.span_id,
                    "parent_span_id": trace.parent_span_id,
                    "name": trace.name,
                }),
            );
        }

        {
            let hooks = self.before_sign.lock().expect("hook lock poisoned");
            for hook in hooks.iter() {
                hook(&mut envelope);
            }
        }

        let signature = self
            .handle
            .block_on(self.signing.sign_receipt(&Value::Object(envelope.clone()), None))?;
        envelope.insert("signature".into(), json!(signature));

        validate_envelope(&envelope)?;

        {
            let hooks = self.before_flush.lock().expect("hook lock poisoned");
            for hook in hooks.iter() {
                hook(&mut envelope);
            }
        }

        let receipt = Value::Object(envelope);
        let line = serde_json::to_string(&receipt).map_err(|e| {
            CccsError::new(ErrorKind::ReceiptSchema, "receipt not serializable").with_source(e)
        })?;
        if line.len() > MAX_RECEIPT_BYTES {
            return Err(CccsError::new(
                ErrorKind::ReceiptSchema,
                format!(
                    "Receipt size {} exceeds maximum {} bytes",
                    line.len(),
                    MAX_RECEIPT_BYTES
                ),
            ));
        }

        let fsync_offset = self.journal_append(&line)?;

        let ticket = self.courier.enqueue(&receipt).map_err(|e| {
            CccsError::new(ErrorKind::Unknown, "failed to enqueue receipt on courier")
                .with_source(e)
        })?;

        if let Some(indexer) = &self.indexer {
            let indexed = self.handle.block_on(indexer.index_receipt(&receipt));
            if let Err(e) = indexed {
                error!(receipt_id = %receipt_id, error = %e, "receipt_indexing_failed");
                if let Err(mark_err) = self
                    .courier
                    .wal()
                    .mark(ticket.sequence, EntryState::PendingSync)
                {
                    error!(sequence = ticket.sequence, error = %mark_err, "pending_sync_mark_failed");
                }
            }
        }

        Ok(ReceiptRecord {
            receipt_id,
            courier_batch_id: ticket.courier_batch_id,
            fsync_offset,
        })
    }

    /// Whether the signing upstream is reachable.
    #[must_use]
    pub fn signing_health_check(&self) -> bool {
        self.handle.block_on(self.signing.health_check())
    }

    /// Whether the indexer is reachable; vacuously true when none is
    /// configured.
    #[must_use]
    pub fn indexer_health_check(&self) -> bool {
        match &self.indexer {
            Some(indexer) => self.handle.block_on(indexer.health_check()),
            None => true,
        }
    }

    /// Whether an indexer is configured.
    #[must_use]
    pub fn has_indexer(&self) -> bool {
        self.indexer.is_some()
    }

    /// Journal fsyncs completed so far.
    #[must_use]
    pub fn fsync_offset(&self) -> u64 {
        self.fsync_offset.load(Ordering::SeqCst)
    }

    fn fresh_receipt_id(&self) -> String {
        let mut seen = self.seen_ids.lock().expect("seen ids poisoned");
        let mut id = Uuid::new_v4().to_string();
        while seen.set.contains(&id) {
            id = Uuid::new_v4().to_string();
        }
        seen.set.insert(id.clone());
        seen.order.push_back(id.clone());
        if seen.order.len() > SEEN_IDS_MAX {
            while seen.order.len() > SEEN_IDS_KEEP {
                if let Some(oldest) = seen.order.pop_front() {
                    seen.set.remove(&oldest);
                }
            }
        }
        id
    }

    fn journal_append(&self, line: &str) -> Result<u64, CccsError> {
        let _guard = self.journal_lock.lock().expect("journal lock poisoned");
        let io_err = |e: std::io::Error| {
            CccsError::new(ErrorKind::Unknown, "failed to write receipt journal").with_source(e)
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.storage_path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        file.flush().map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        Ok(self.fsync_offset.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

fn validate_envelope(envelope: &JsonMap) -> Result<(), CccsError> {
    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !envelope.contains_key(**field))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(CccsError::new(
            ErrorKind::ReceiptSchema,
            format!("Missing receipt fields: {missing:?}"),
        ));
    }
    let status = envelope
        .get("decision")
        .and_then(|d| d.get("status"))
        .and_then(Value::as_str);
    match status {
        Some(s) if ALLOWED_DECISIONS.contains(&s) => Ok(()),
        _ => Err(CccsError::new(
            ErrorKind::ReceiptSchema,
            "Invalid decision.status",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_complete_envelope() {
        let mut envelope = JsonMap::new();
        for field in REQUIRED_FIELDS {
            envelope.insert(field.to_string(), Value::Null);
        }
        envelope.insert("decision".into(), json!({"status": "pass"}));
        assert!(validate_envelope(&envelope).is_ok());
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let mut envelope = JsonMap::new();
        envelope.insert("receipt_id".into(), json!("r1"));
        let err = validate_envelope(&envelope).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReceiptSchema);
        assert!(err.message().contains("gate_id"));
    }

    #[test]
    fn validate_rejects_unknown_decision_status() {
        let mut envelope = JsonMap::new();
        for field in REQUIRED_FIELDS {
            envelope.insert(field.to_string(), Value::Null);
        }
        envelope.insert("decision".into(), json!({"status": "maybe"}));
        let err = validate_envelope(&envelope).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReceiptSchema);
    }

    #[test]
    fn validate_accepts_every_canonical_status() {
        for status in ALLOWED_DECISIONS {
            let mut envelope = JsonMap::new();
            for field in REQUIRED_FIELDS {
                envelope.insert(field.to_string(), Value::Null);
            }
            envelope.insert("decision".into(), json!({"status": status}));
            assert!(validate_envelope(&envelope).is_ok(), "status {status}");
        }
    }
}
