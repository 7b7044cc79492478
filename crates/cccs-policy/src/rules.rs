// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rule condition matching.
//!
//! A condition maps an input key to a matcher. A matcher is either a bare
//! literal (compared for equality) or an object
//! `{"op": "eq"|"lte"|"gte"|"in"|"not_in", "value": …}`; a missing `op`
//! means `eq`. Ordering comparisons are defined for numbers and strings;
//! anything else fails the comparison (and therefore the rule).

use cccs_core::{JsonMap, PolicyRule};
use serde_json::Value;
use std::cmp::Ordering;

/// Whether `rule` matches `inputs`: every condition must hold. A rule with
/// no conditions matches any input.
#[must_use]
pub fn rule_matches(rule: &PolicyRule, inputs: &JsonMap) -> bool {
    rule.conditions.iter().all(|(key, expected)| {
        let value = inputs.get(key).unwrap_or(&Value::Null);
        matcher_holds(value, expected)
    })
}

fn matcher_holds(value: &Value, expected: &Value) -> bool {
    let Value::Object(matcher) = expected else {
        return value == expected;
    };
    let op = matcher.get("op").and_then(Value::as_str).unwrap_or("eq");
    let operand = matcher.get("value").unwrap_or(&Value::Null);
    match op {
        "eq" => value == operand,
        "lte" => matches!(
            json_partial_cmp(value, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        "gte" => matches!(
            json_partial_cmp(value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "in" => member_of(value, operand) == Some(true),
        "not_in" => member_of(value, operand) == Some(false),
        // Unknown operators fail closed.
        _ => false,
    }
}

/// Partial ordering over JSON scalars: numbers with numbers, strings with
/// strings. Mixed or non-scalar operands are unordered.
fn json_partial_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Membership of `value` in `operand`: array containment, or substring
/// when both are strings. `None` when membership is undefined.
fn member_of(value: &Value, operand: &Value) -> Option<bool> {
    match operand {
        Value::Array(items) => Some(items.contains(value)),
        Value::String(haystack) => value.as_str().map(|needle| haystack.contains(needle)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(conditions: Value) -> PolicyRule {
        PolicyRule {
            rule_id: "r".into(),
            priority: 1,
            conditions: conditions.as_object().cloned().unwrap_or_default(),
            decision: "allow".into(),
            rationale: "test".into(),
        }
    }

    fn inputs(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn bare_literal_means_equality() {
        let r = rule(json!({"tier": "gold"}));
        assert!(rule_matches(&r, &inputs(json!({"tier": "gold"}))));
        assert!(!rule_matches(&r, &inputs(json!({"tier": "silver"}))));
    }

    #[test]
    fn missing_input_key_fails_non_null_literal() {
        let r = rule(json!({"tier": "gold"}));
        assert!(!rule_matches(&r, &inputs(json!({}))));
    }

    #[test]
    fn no_conditions_matches_anything() {
        let r = rule(json!({}));
        assert!(rule_matches(&r, &inputs(json!({"anything": 42}))));
        assert!(rule_matches(&r, &inputs(json!({}))));
    }

    #[test]
    fn explicit_eq_operator() {
        let r = rule(json!({"count": {"op": "eq", "value": 3}}));
        assert!(rule_matches(&r, &inputs(json!({"count": 3}))));
        assert!(!rule_matches(&r, &inputs(json!({"count": 4}))));
    }

    #[test]
    fn lte_and_gte_on_numbers() {
        let lte = rule(json!({"cost": {"op": "lte", "value": 10}}));
        assert!(rule_matches(&lte, &inputs(json!({"cost": 10}))));
        assert!(rule_matches(&lte, &inputs(json!({"cost": 9.5}))));
        assert!(!rule_matches(&lte, &inputs(json!({"cost": 11}))));

        let gte = rule(json!({"cost": {"op": "gte", "value": 10}}));
        assert!(rule_matches(&gte, &inputs(json!({"cost": 10}))));
        assert!(!rule_matches(&gte, &inputs(json!({"cost": 9}))));
    }

    #[test]
    fn ordering_on_strings() {
        let r = rule(json!({"name": {"op": "lte", "value": "m"}}));
        assert!(rule_matches(&r, &inputs(json!({"name": "alpha"}))));
        assert!(!rule_matches(&r, &inputs(json!({"name": "zulu"}))));
    }

    #[test]
    fn ordering_against_missing_input_fails() {
        let r = rule(json!({"cost": {"op": "lte", "value": 10}}));
        assert!(!rule_matches(&r, &inputs(json!({}))));
    }

    #[test]
    fn in_and_not_in_arrays() {
        let within = rule(json!({"region": {"op": "in", "value": ["eu", "us"]}}));
        assert!(rule_matches(&within, &inputs(json!({"region": "eu"}))));
        assert!(!rule_matches(&within, &inputs(json!({"region": "apac"}))));

        let without = rule(json!({"region": {"op": "not_in", "value": ["eu", "us"]}}));
        assert!(rule_matches(&without, &inputs(json!({"region": "apac"}))));
        assert!(!rule_matches(&without, &inputs(json!({"region": "us"}))));
    }

    #[test]
    fn unknown_operator_fails_closed() {
        let r = rule(json!({"k": {"op": "regex", "value": ".*"}}));
        assert!(!rule_matches(&r, &inputs(json!({"k": "anything"}))));
    }

    #[test]
    fn multiple_conditions_all_must_hold() {
        let r = rule(json!({
            "tier": "gold",
            "cost": {"op": "lte", "value": 100}
        }));
        assert!(rule_matches(&r, &inputs(json!({"tier": "gold", "cost": 50}))));
        assert!(!rule_matches(&r, &inputs(json!({"tier": "gold", "cost": 500}))));
        assert!(!rule_matches(&r, &inputs(json!({"tier": "silver", "cost": 50}))));
    }
}
