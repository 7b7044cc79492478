// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed data structures shared across CCCS services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A string-keyed JSON object.
///
/// `serde_json`'s map is `BTreeMap`-backed, so serializing one of these
/// always produces sorted keys — a property the canonical-JSON hashing in
/// this crate relies on.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Immutable snapshot of the caller, required to resolve an actor block.
///
/// The identity resolver rejects contexts whose tenant, device, session, or
/// user id is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Tenant identifier.
    pub tenant_id: String,
    /// Device identifier.
    pub device_id: String,
    /// Session identifier.
    pub session_id: String,
    /// User identifier.
    pub user_id: String,
    /// Free-form actor classification tag (e.g. `"human"`, `"service"`).
    pub actor_type: String,
    /// Wall-clock timestamp captured by the caller.
    pub runtime_clock: DateTime<Utc>,
    /// Arbitrary extra context; copied, never interpreted.
    #[serde(default)]
    pub extras: JsonMap,
}

/// Resolved actor identity plus provenance metadata, cached per
/// `(tenant, user, device)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorBlock {
    /// Stable actor identifier returned by the identity service.
    pub actor_id: String,
    /// Actor classification tag carried over from the context.
    pub actor_type: String,
    /// Session the block was resolved under.
    pub session_id: String,
    /// Upstream provenance signature.
    pub provenance_signature: String,
    /// Identity normalization version.
    pub normalization_version: String,
    /// Advisory warnings attached by the resolver.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Salt version used for provenance derivation.
    #[serde(default)]
    pub salt_version: String,
    /// Monotonic provenance counter; defeats downgrade/replay of stale blocks.
    #[serde(default)]
    pub monotonic_counter: u64,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// A single policy rule inside a snapshot.
///
/// `conditions` maps input keys to matchers: either a literal to compare
/// equal, or an object `{"op": "eq"|"lte"|"gte"|"in"|"not_in", "value": …}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule identifier, unique within its snapshot.
    pub rule_id: String,
    /// Priority in `[0, 10000]`; higher priorities are consulted first.
    pub priority: i64,
    /// Input conditions; an empty map matches every input.
    #[serde(default)]
    pub conditions: JsonMap,
    /// Decision label emitted when the rule matches.
    pub decision: String,
    /// Human-readable rationale for the decision.
    pub rationale: String,
}

/// An immutable, signed bundle of policy rules for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Module the snapshot governs.
    pub module_id: String,
    /// Snapshot version string.
    pub version: String,
    /// Rules sorted by priority descending.
    pub rules: Vec<PolicyRule>,
    /// Hex HMAC-SHA256 signature over the canonical snapshot payload.
    pub signature: String,
    /// `sha256:`-prefixed hash of the canonical snapshot payload.
    pub snapshot_hash: String,
}

/// Outcome of an offline policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Decision label from the matching rule, or `"deny"` when none matched.
    pub decision: String,
    /// Rationale from the matching rule, or `"no_rule_matched"`.
    pub rationale: String,
    /// Versions of the snapshots consulted for this decision.
    pub policy_version_ids: Vec<String>,
    /// Hash of the snapshot consulted for this decision.
    pub policy_snapshot_hash: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// The three configuration layers, in precedence order local > tenant >
/// product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigLayers {
    /// Host-local settings; highest precedence.
    #[serde(default)]
    pub local: JsonMap,
    /// Tenant-scoped settings.
    #[serde(default)]
    pub tenant: JsonMap,
    /// Product-wide defaults; lowest precedence.
    #[serde(default)]
    pub product: JsonMap,
}

/// A merged configuration lookup result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigResult {
    /// The resolved value, or `None` when no layer carries the key.
    pub value: Option<serde_json::Value>,
    /// Layers the value came from, in lookup order.
    pub source_layers: Vec<String>,
    /// `sha256:`-prefixed hash of all three layers, fixed at construction.
    pub config_snapshot_hash: String,
    /// Advisory warnings (`config_gap` when the key is absent everywhere).
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Budget / receipt / trace
// ---------------------------------------------------------------------------

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetDecision {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Machine-readable reason tag.
    pub reason: String,
    /// Budget remaining after the charge.
    pub remaining: f64,
}

/// Handle returned after a receipt is durably written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    /// Unique receipt identifier.
    pub receipt_id: String,
    /// Courier batch the receipt was enqueued under.
    pub courier_batch_id: String,
    /// Number of journal fsyncs completed by this service so far.
    pub fsync_offset: u64,
}

/// Trace/span identifiers embedded into receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace identifier shared by all spans of one flow.
    pub trace_id: String,
    /// This span's identifier.
    pub span_id: String,
    /// Parent span, when nested.
    pub parent_span_id: Option<String>,
    /// Span name.
    pub name: String,
    /// Span start time.
    pub start_time: DateTime<Utc>,
    /// Span end time; set when the span guard is dropped.
    pub end_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_context() -> ActorContext {
        ActorContext {
            tenant_id: "t1".into(),
            device_id: "d1".into(),
            session_id: "s1".into(),
            user_id: "u1".into(),
            actor_type: "human".into(),
            runtime_clock: Utc::now(),
            extras: JsonMap::new(),
        }
    }

    #[test]
    fn actor_context_serde_roundtrip() {
        let ctx = sample_context();
        let text = serde_json::to_string(&ctx).unwrap();
        let back: ActorContext = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn actor_block_defaults_on_missing_optional_fields() {
        let block: ActorBlock = serde_json::from_value(json!({
            "actor_id": "a1",
            "actor_type": "human",
            "session_id": "s1",
            "provenance_signature": "sig",
            "normalization_version": "v1"
        }))
        .unwrap();
        assert!(block.warnings.is_empty());
        assert_eq!(block.salt_version, "");
        assert_eq!(block.monotonic_counter, 0);
    }

    #[test]
    fn policy_rule_conditions_default_empty() {
        let rule: PolicyRule = serde_json::from_value(json!({
            "rule_id": "r1",
            "priority": 10,
            "decision": "allow",
            "rationale": "why"
        }))
        .unwrap();
        assert!(rule.conditions.is_empty());
    }

    #[test]
    fn config_layers_default_is_empty() {
        let layers = ConfigLayers::default();
        assert!(layers.local.is_empty());
        assert!(layers.tenant.is_empty());
        assert!(layers.product.is_empty());
    }
}
