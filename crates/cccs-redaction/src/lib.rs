// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rule-driven payload redaction.
//!
//! Rules name a dotted field path and a strategy (`remove` or `mask`).
//! Redaction always operates on a copy; the source payload is never
//! mutated. A rule version is negotiated from the caller's policy hint and,
//! under strict matching, redaction fails closed with `redaction_blocked`
//! when no rule carries the negotiated version.

#![deny(unsafe_code)]

use cccs_core::JsonMap;
use cccs_error::{CccsError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Fallback mask when a `mask` rule does not configure one.
const DEFAULT_MASK: &str = "***";

/// Rule version assumed when negotiation is disabled or no hint is given.
const DEFAULT_RULE_VERSION: &str = "v1";

/// What to do with a matched field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Drop the field entirely.
    Remove,
    /// Replace the field's value with the mask string.
    Mask,
}

/// One redaction rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionRule {
    /// Dotted path of the field to redact (e.g. `"user.email"`).
    pub field_path: String,
    /// Removal or masking.
    pub strategy: Strategy,
    /// Mask replacement; defaults to `"***"`.
    #[serde(default)]
    pub mask_value: Option<String>,
    /// Version tag this rule belongs to.
    pub rule_version: String,
}

impl RedactionRule {
    /// A `remove` rule for `field_path` under the default rule version.
    #[must_use]
    pub fn remove(field_path: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            strategy: Strategy::Remove,
            mask_value: None,
            rule_version: DEFAULT_RULE_VERSION.to_string(),
        }
    }

    /// A `mask` rule for `field_path` under the default rule version.
    #[must_use]
    pub fn mask(field_path: impl Into<String>, mask_value: Option<String>) -> Self {
        Self {
            field_path: field_path.into(),
            strategy: Strategy::Mask,
            mask_value,
            rule_version: DEFAULT_RULE_VERSION.to_string(),
        }
    }

    /// The same rule tagged with a different version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.rule_version = version.into();
        self
    }
}

/// Redaction service configuration.
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    /// The rule set; must not be empty.
    pub rules: Vec<RedactionRule>,
    /// Negotiate a rule version from the caller's policy hint.
    pub rule_version_negotiation_enabled: bool,
    /// Fail closed when no rule carries the negotiated version.
    pub require_rule_version_match: bool,
}

impl RedactionConfig {
    /// Config over `rules` with negotiation and strict matching on.
    #[must_use]
    pub fn new(rules: Vec<RedactionRule>) -> Self {
        Self {
            rules,
            rule_version_negotiation_enabled: true,
            require_rule_version_match: true,
        }
    }
}

/// Result of a redaction pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactionOutcome {
    /// The redacted copy of the payload.
    pub redacted_payload: JsonMap,
    /// Dotted paths that were removed or masked.
    pub removed_fields: Vec<String>,
    /// The rule version that was applied.
    pub rule_version: String,
}

/// Applies configured redaction rules without mutating originals.
#[derive(Debug)]
pub struct RedactionService {
    config: RedactionConfig,
    negotiated_versions: Mutex<BTreeMap<String, String>>,
}

impl RedactionService {
    /// Build the service.
    ///
    /// # Errors
    ///
    /// Fails with `redaction_blocked` when the rule set is empty — a
    /// substrate with no rules must not emit payloads at all.
    pub fn new(config: RedactionConfig) -> Result<Self, CccsError> {
        if config.rules.is_empty() {
            return Err(CccsError::new(
                ErrorKind::RedactionBlocked,
                "No redaction rules available",
            ));
        }
        Ok(Self {
            config,
            negotiated_versions: Mutex::new(BTreeMap::new()),
        })
    }

    /// Redact `payload` under the rule version negotiated from
    /// `policy_hint`, returning a detached copy.
    ///
    /// # Errors
    ///
    /// Fails with `redaction_blocked` when strict matching finds no rule
    /// for the negotiated version.
    pub fn apply_redaction(
        &self,
        payload: &JsonMap,
        policy_hint: Option<&str>,
    ) -> Result<RedactionOutcome, CccsError> {
        let rule_version = self.negotiate_rule_version(policy_hint);
        let rules = self.rules_for_version(&rule_version)?;

        let mut stripped = payload.clone();
        let mut removed_fields = Vec::new();
        for rule in rules {
            if apply_rule(&mut stripped, rule) {
                removed_fields.push(rule.field_path.clone());
            }
        }

        Ok(RedactionOutcome {
            redacted_payload: stripped,
            removed_fields,
            rule_version,
        })
    }

    fn negotiate_rule_version(&self, policy_hint: Option<&str>) -> String {
        if !self.config.rule_version_negotiation_enabled {
            return DEFAULT_RULE_VERSION.to_string();
        }
        let Some(hint) = policy_hint.filter(|h| !h.is_empty()) else {
            return DEFAULT_RULE_VERSION.to_string();
        };
        let mut negotiated = self
            .negotiated_versions
            .lock()
            .expect("redaction state poisoned");
        negotiated
            .entry(hint.to_string())
            .or_insert_with(|| hint.to_string())
            .clone()
    }

    fn rules_for_version(&self, rule_version: &str) -> Result<Vec<&RedactionRule>, CccsError> {
        if !self.config.require_rule_version_match {
            return Ok(self.config.rules.iter().collect());
        }
        let matching: Vec<&RedactionRule> = self
            .config
            .rules
            .iter()
            .filter(|r| r.rule_version == rule_version)
            .collect();
        if matching.is_empty() {
            return Err(CccsError::new(
                ErrorKind::RedactionBlocked,
                format!("No redaction rules available for version {rule_version}"),
            ));
        }
        Ok(matching)
    }
}

/// Walk the rule's dotted path on `target` and redact the leaf. Returns
/// whether a field was touched.
fn apply_rule(target: &mut JsonMap, rule: &RedactionRule) -> bool {
    let parts: Vec<&str> = rule.field_path.split('.').collect();
    let (leaf, parents) = parts.split_last().expect("split always yields a last part");

    let mut current = target;
    for part in parents {
        match current.get_mut(*part) {
            Some(Value::Object(next)) => current = next,
            _ => return false,
        }
    }
    if !current.contains_key(*leaf) {
        return false;
    }
    match rule.strategy {
        Strategy::Remove => {
            current.remove(*leaf);
        }
        Strategy::Mask => {
            let mask = rule.mask_value.as_deref().unwrap_or(DEFAULT_MASK);
            current.insert((*leaf).to_string(), Value::String(mask.to_string()));
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    fn service(rules: Vec<RedactionRule>) -> RedactionService {
        RedactionService::new(RedactionConfig::new(rules)).unwrap()
    }

    #[test]
    fn empty_rule_set_is_rejected_at_construction() {
        let err = RedactionService::new(RedactionConfig::new(vec![])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RedactionBlocked);
    }

    #[test]
    fn remove_drops_top_level_field() {
        let svc = service(vec![RedactionRule::remove("secret")]);
        let input = payload(json!({"secret": "x", "visible": "ok"}));
        let outcome = svc.apply_redaction(&input, None).unwrap();
        assert_eq!(outcome.redacted_payload, payload(json!({"visible": "ok"})));
        assert_eq!(outcome.removed_fields, vec!["secret"]);
        assert_eq!(outcome.rule_version, "v1");
    }

    #[test]
    fn mask_replaces_value() {
        let svc = service(vec![RedactionRule::mask("token", Some("[redacted]".into()))]);
        let input = payload(json!({"token": "abc123"}));
        let outcome = svc.apply_redaction(&input, None).unwrap();
        assert_eq!(outcome.redacted_payload["token"], json!("[redacted]"));
        assert_eq!(outcome.removed_fields, vec!["token"]);
    }

    #[test]
    fn mask_defaults_to_stars() {
        let svc = service(vec![RedactionRule::mask("token", None)]);
        let input = payload(json!({"token": "abc123"}));
        let outcome = svc.apply_redaction(&input, None).unwrap();
        assert_eq!(outcome.redacted_payload["token"], json!("***"));
    }

    #[test]
    fn dotted_path_reaches_nested_fields() {
        let svc = service(vec![RedactionRule::remove("user.contact.email")]);
        let input = payload(json!({
            "user": {"contact": {"email": "a@b.c", "phone": "123"}, "name": "n"}
        }));
        let outcome = svc.apply_redaction(&input, None).unwrap();
        assert_eq!(
            outcome.redacted_payload,
            payload(json!({"user": {"contact": {"phone": "123"}, "name": "n"}}))
        );
        assert_eq!(outcome.removed_fields, vec!["user.contact.email"]);
    }

    #[test]
    fn absent_paths_are_ignored() {
        let svc = service(vec![
            RedactionRule::remove("missing"),
            RedactionRule::remove("user.missing.deep"),
        ]);
        let input = payload(json!({"user": {"name": "n"}}));
        let outcome = svc.apply_redaction(&input, None).unwrap();
        assert_eq!(outcome.redacted_payload, input);
        assert!(outcome.removed_fields.is_empty());
    }

    #[test]
    fn source_payload_is_never_mutated() {
        let svc = service(vec![RedactionRule::remove("secret")]);
        let input = payload(json!({"secret": "x", "visible": "ok"}));
        let before = input.clone();
        let _ = svc.apply_redaction(&input, None).unwrap();
        assert_eq!(input, before);
    }

    #[test]
    fn redaction_only_touches_configured_paths() {
        let svc = service(vec![RedactionRule::remove("a")]);
        let input = payload(json!({"a": 1, "b": {"c": 2}, "d": [1, 2, 3]}));
        let outcome = svc.apply_redaction(&input, None).unwrap();
        assert_eq!(
            outcome.redacted_payload,
            payload(json!({"b": {"c": 2}, "d": [1, 2, 3]}))
        );
    }

    #[test]
    fn hint_negotiates_rule_version() {
        let svc = service(vec![RedactionRule::remove("secret").with_version("rules-v2")]);
        let input = payload(json!({"secret": "x"}));
        let outcome = svc.apply_redaction(&input, Some("rules-v2")).unwrap();
        assert_eq!(outcome.rule_version, "rules-v2");
        assert!(outcome.removed_fields.contains(&"secret".to_string()));
    }

    #[test]
    fn strict_match_fails_closed_on_version_drift() {
        let svc = service(vec![RedactionRule::remove("secret")]); // v1 rules only
        let input = payload(json!({"secret": "x"}));
        let err = svc.apply_redaction(&input, Some("rules-v9")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RedactionBlocked);
        assert!(err.message().contains("rules-v9"));
    }

    #[test]
    fn relaxed_match_applies_all_rules() {
        let mut config = RedactionConfig::new(vec![
            RedactionRule::remove("a"),
            RedactionRule::remove("b").with_version("rules-v2"),
        ]);
        config.require_rule_version_match = false;
        let svc = RedactionService::new(config).unwrap();
        let input = payload(json!({"a": 1, "b": 2, "c": 3}));
        let outcome = svc.apply_redaction(&input, Some("rules-v2")).unwrap();
        assert_eq!(outcome.redacted_payload, payload(json!({"c": 3})));
    }

    #[test]
    fn negotiation_disabled_pins_default_version() {
        let mut config = RedactionConfig::new(vec![RedactionRule::remove("secret")]);
        config.rule_version_negotiation_enabled = false;
        let svc = RedactionService::new(config).unwrap();
        let input = payload(json!({"secret": "x"}));
        let outcome = svc.apply_redaction(&input, Some("rules-v9")).unwrap();
        assert_eq!(outcome.rule_version, "v1");
        assert!(outcome.removed_fields.contains(&"secret".to_string()));
    }
}
