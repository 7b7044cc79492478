// SPDX-License-Identifier: MIT OR Apache-2.0
//! Offline policy evaluation for CCCS.
//!
//! Snapshots arrive as `{payload, signature}` pairs and are validated
//! against a set of symmetric trust anchors without any network access.
//! Evaluation walks the snapshot's rules highest-priority first; the first
//! matching rule wins, and results are cached per `(module, inputs)`.
//!
//! `policy_unavailable` from this crate always means "no snapshot loaded
//! for the module or signature invalid" — never a network failure.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod rules;

use cccs_core::{JsonMap, PolicyDecision, PolicyRule, PolicySnapshot, canonical_json, sha256_hex, snapshot_hash};
use cccs_error::{CccsError, ErrorKind};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

pub use rules::rule_matches;

type HmacSha256 = Hmac<Sha256>;

/// Index bucket holding rules that match every input.
const NO_CONDITIONS_BUCKET: &str = "__no_conditions__";

/// Bound on the evaluation cache; oldest entries are evicted first.
const EVALUATION_CACHE_MAX: usize = 1_000;

/// Valid rule priority range, inclusive.
const PRIORITY_RANGE: std::ops::RangeInclusive<i64> = 0..=10_000;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Offline policy validation configuration.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Symmetric trust anchors; at least one is required.
    pub signing_secrets: Vec<Vec<u8>>,
    /// Record the negotiated rule version on first evaluation per module.
    pub rule_version_negotiation_enabled: bool,
}

impl PolicyConfig {
    /// Build a config from raw secrets with negotiation enabled.
    #[must_use]
    pub fn new(signing_secrets: Vec<Vec<u8>>) -> Self {
        Self {
            signing_secrets,
            rule_version_negotiation_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ModuleState {
    snapshot: PolicySnapshot,
    /// condition key → indices into `snapshot.rules`.
    index: HashMap<String, Vec<usize>>,
}

#[derive(Debug)]
struct State {
    modules: BTreeMap<String, ModuleState>,
    negotiated_versions: BTreeMap<String, String>,
    cache: HashMap<String, PolicyDecision>,
    cache_order: VecDeque<String>,
}

/// Loads signed snapshots and evaluates policies entirely offline.
#[derive(Debug)]
pub struct PolicyRuntime {
    config: PolicyConfig,
    state: Mutex<State>,
}

impl PolicyRuntime {
    /// Create a runtime over the given trust anchors.
    ///
    /// # Errors
    ///
    /// Fails with `policy_unavailable` when no signing secret is supplied —
    /// an unverifiable snapshot must never be accepted.
    pub fn new(config: PolicyConfig) -> Result<Self, CccsError> {
        if config.signing_secrets.is_empty() {
            return Err(CccsError::new(
                ErrorKind::PolicyUnavailable,
                "signing_secrets must not be empty",
            ));
        }
        Ok(Self {
            config,
            state: Mutex::new(State {
                modules: BTreeMap::new(),
                negotiated_versions: BTreeMap::new(),
                cache: HashMap::new(),
                cache_order: VecDeque::new(),
            }),
        })
    }

    /// Validate and store a snapshot using the offline trust anchors.
    ///
    /// Rules are parsed (priorities must be integers in `[0, 10000]`),
    /// sorted by priority descending, and indexed by condition key. The
    /// evaluation cache is cleared on every reload.
    ///
    /// # Errors
    ///
    /// Fails with `policy_unavailable` when the signature does not verify
    /// against any trust anchor or the payload is malformed.
    pub fn load_snapshot(
        &self,
        payload: &Value,
        signature: &str,
    ) -> Result<PolicySnapshot, CccsError> {
        if !self.is_signature_valid(payload, signature) {
            return Err(CccsError::new(
                ErrorKind::PolicyUnavailable,
                "Policy snapshot signature invalid (offline validation)",
            ));
        }

        let module_id = payload
            .get("module_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CccsError::new(ErrorKind::PolicyUnavailable, "snapshot missing module_id")
            })?
            .to_string();
        let version = match payload.get("version") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(CccsError::new(
                    ErrorKind::PolicyUnavailable,
                    "snapshot missing version",
                ));
            }
        };

        let mut rules = Vec::new();
        for rule_data in payload
            .get("rules")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            rules.push(parse_rule(rule_data)?);
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let hash = snapshot_hash(payload).map_err(|e| {
            CccsError::new(ErrorKind::PolicyUnavailable, "snapshot not serializable")
                .with_source(e)
        })?;
        let snapshot = PolicySnapshot {
            module_id: module_id.clone(),
            version,
            rules,
            signature: signature.to_string(),
            snapshot_hash: hash,
        };

        let index = build_rule_index(&snapshot.rules);
        let mut state = self.state.lock().expect("policy state poisoned");
        state.modules.insert(
            module_id.clone(),
            ModuleState {
                snapshot: snapshot.clone(),
                index,
            },
        );
        state.cache.clear();
        state.cache_order.clear();
        debug!(module_id = %module_id, rules = snapshot.rules.len(), "policy_snapshot_loaded");
        Ok(snapshot)
    }

    /// The loaded snapshot for `module_id`, if any.
    #[must_use]
    pub fn snapshot(&self, module_id: &str) -> Option<PolicySnapshot> {
        let state = self.state.lock().expect("policy state poisoned");
        state.modules.get(module_id).map(|m| m.snapshot.clone())
    }

    /// Evaluate `inputs` against the loaded snapshot for `module_id`.
    ///
    /// Pure with respect to the loaded snapshot: repeated calls with the
    /// same inputs return the identical decision (and hit the cache).
    ///
    /// # Errors
    ///
    /// Fails with `policy_unavailable` when no snapshot is loaded for the
    /// module.
    pub fn evaluate(&self, module_id: &str, inputs: &JsonMap) -> Result<PolicyDecision, CccsError> {
        let inputs = inputs.clone();
        let mut state = self.state.lock().expect("policy state poisoned");
        if !state.modules.contains_key(module_id) {
            return Err(CccsError::new(
                ErrorKind::PolicyUnavailable,
                "Policy snapshot unavailable",
            ));
        }

        if self.config.rule_version_negotiation_enabled
            && !state.negotiated_versions.contains_key(module_id)
        {
            let version = state.modules[module_id].snapshot.version.clone();
            state
                .negotiated_versions
                .insert(module_id.to_string(), version);
        }

        let cache_key = evaluation_cache_key(module_id, &inputs);
        if let Some(hit) = state.cache.get(&cache_key) {
            return Ok(hit.clone());
        }

        let module = &state.modules[module_id];
        let decision = match find_matching_rule(module, &inputs) {
            Some(rule) => PolicyDecision {
                decision: rule.decision.clone(),
                rationale: rule.rationale.clone(),
                policy_version_ids: vec![module.snapshot.version.clone()],
                policy_snapshot_hash: module.snapshot.snapshot_hash.clone(),
            },
            None => PolicyDecision {
                decision: "deny".to_string(),
                rationale: "no_rule_matched".to_string(),
                policy_version_ids: vec![module.snapshot.version.clone()],
                policy_snapshot_hash: module.snapshot.snapshot_hash.clone(),
            },
        };

        if state.cache.len() >= EVALUATION_CACHE_MAX {
            if let Some(oldest) = state.cache_order.pop_front() {
                state.cache.remove(&oldest);
            }
        }
        state.cache.insert(cache_key.clone(), decision.clone());
        state.cache_order.push_back(cache_key);
        Ok(decision)
    }

    /// The rule version recorded for `module_id` on first evaluation.
    #[must_use]
    pub fn negotiated_version(&self, module_id: &str) -> Option<String> {
        let state = self.state.lock().expect("policy state poisoned");
        state.negotiated_versions.get(module_id).cloned()
    }

    /// Offline evaluation always reports healthy.
    #[must_use]
    pub fn health_check(&self) -> bool {
        true
    }

    /// Constant-time offline signature validation.
    ///
    /// Every expectation is computed before any comparison, so total work
    /// does not depend on which trust anchor (if any) matched.
    fn is_signature_valid(&self, payload: &Value, signature: &str) -> bool {
        let Ok(serialized) = canonical_json(payload) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(signature) else {
            return false;
        };
        let macs: Vec<HmacSha256> = self
            .config
            .signing_secrets
            .iter()
            .map(|secret| {
                let mut mac =
                    HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
                mac.update(serialized.as_bytes());
                mac
            })
            .collect();
        let mut any_valid = false;
        for mac in macs {
            any_valid |= mac.verify_slice(&sig_bytes).is_ok();
        }
        any_valid
    }
}

/// Derive the evaluation cache key: `module:sha256(canonical(inputs))`.
fn evaluation_cache_key(module_id: &str, inputs: &JsonMap) -> String {
    let serialized = canonical_json(inputs).unwrap_or_default();
    format!("{module_id}:{}", sha256_hex(serialized.as_bytes()))
}

fn parse_rule(rule_data: &Value) -> Result<PolicyRule, CccsError> {
    let obj = rule_data.as_object().ok_or_else(|| {
        CccsError::new(ErrorKind::PolicyUnavailable, "policy rule must be an object")
    })?;
    let rule_id = obj
        .get("rule_id")
        .and_then(Value::as_str)
        .ok_or_else(|| CccsError::new(ErrorKind::PolicyUnavailable, "policy rule missing rule_id"))?
        .to_string();
    let priority = match obj.get("priority") {
        None => 100,
        Some(v) => v.as_i64().ok_or_else(|| {
            CccsError::new(
                ErrorKind::PolicyUnavailable,
                format!("Invalid rule priority: {v}"),
            )
        })?,
    };
    if !PRIORITY_RANGE.contains(&priority) {
        return Err(CccsError::new(
            ErrorKind::PolicyUnavailable,
            format!("Rule priority {priority} out of valid range [0, 10000]"),
        ));
    }
    let conditions = match obj.get("conditions") {
        None | Some(Value::Null) => JsonMap::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(CccsError::new(
                ErrorKind::PolicyUnavailable,
                format!("rule {rule_id} has non-object conditions: {other}"),
            ));
        }
    };
    Ok(PolicyRule {
        rule_id,
        priority,
        conditions,
        decision: obj
            .get("decision")
            .and_then(Value::as_str)
            .unwrap_or("deny")
            .to_string(),
        rationale: obj
            .get("rationale")
            .and_then(Value::as_str)
            .unwrap_or("unspecified")
            .to_string(),
    })
}

/// Inverted index: condition key → rule positions, plus a bucket for rules
/// with no conditions (which match every input).
fn build_rule_index(rules: &[PolicyRule]) -> HashMap<String, Vec<usize>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (pos, rule) in rules.iter().enumerate() {
        if rule.conditions.is_empty() {
            index.entry(NO_CONDITIONS_BUCKET.to_string()).or_default().push(pos);
        } else {
            for key in rule.conditions.keys() {
                index.entry(key.clone()).or_default().push(pos);
            }
        }
    }
    index
}

fn find_matching_rule<'a>(module: &'a ModuleState, inputs: &JsonMap) -> Option<&'a PolicyRule> {
    let rules = &module.snapshot.rules;
    let mut candidates: Vec<usize> = Vec::new();
    for key in inputs.keys() {
        if let Some(positions) = module.index.get(key) {
            candidates.extend_from_slice(positions);
        }
    }
    if let Some(positions) = module.index.get(NO_CONDITIONS_BUCKET) {
        candidates.extend_from_slice(positions);
    }
    candidates.sort_unstable();
    candidates.dedup();
    // Rules are stored sorted by priority descending, so position order is
    // already priority order.
    if candidates.is_empty() {
        return rules.iter().find(|rule| rule_matches(rule, inputs));
    }
    candidates
        .into_iter()
        .map(|pos| &rules[pos])
        .find(|rule| rule_matches(rule, inputs))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
