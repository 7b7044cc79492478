// SPDX-License-Identifier: MIT OR Apache-2.0
//! Policy publisher facade adapter.
//!
//! The core evaluates policy offline; these endpoints exist for operators
//! and for deployments that delegate evaluation upstream.

use crate::http::{HttpConfig, build_client, sanitize_error_message};
use cccs_core::PolicyDecision;
use cccs_error::{CccsError, ErrorKind};
use serde_json::{Value, json};
use tracing::error;

/// Facade over the policy publisher's `/policy/<version>` endpoints.
pub struct PolicyAdapter {
    config: HttpConfig,
    client: reqwest::Client,
}

impl PolicyAdapter {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: HttpConfig) -> Result<Self, CccsError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    /// Evaluate a policy upstream via `POST /policy/<version>/evaluate`.
    ///
    /// # Errors
    ///
    /// Fails with `policy_unavailable` when the publisher rejects the
    /// request or is unreachable.
    pub async fn evaluate_policy(
        &self,
        module_id: &str,
        inputs: &Value,
        snapshot_hash: Option<&str>,
    ) -> Result<PolicyDecision, CccsError> {
        let mut payload = json!({"module_id": module_id, "inputs": inputs});
        if let Some(hash) = snapshot_hash {
            payload["snapshot_hash"] = json!(hash);
        }
        let result = self.post("evaluate", &payload).await?;
        Ok(PolicyDecision {
            decision: result
                .get("decision")
                .and_then(Value::as_str)
                .unwrap_or("deny")
                .to_string(),
            rationale: result
                .get("rationale")
                .and_then(Value::as_str)
                .unwrap_or("no_rule_matched")
                .to_string(),
            policy_version_ids: result
                .get("policy_version_ids")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            policy_snapshot_hash: result
                .get("policy_snapshot_hash")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Validate a snapshot signature upstream via
    /// `POST /policy/<version>/validate-signature`.
    ///
    /// # Errors
    ///
    /// Fails with `policy_unavailable` when the publisher is unreachable.
    pub async fn validate_signature(
        &self,
        payload: &Value,
        signature: &str,
        public_key_id: Option<&str>,
    ) -> Result<bool, CccsError> {
        let body = json!({
            "payload": payload,
            "signature": signature,
            "public_key_id": public_key_id,
        });
        let result = self.post("validate-signature", &body).await?;
        Ok(result.get("valid").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Negotiate the rule version in force for a module via
    /// `POST /policy/<version>/negotiate-version`.
    ///
    /// # Errors
    ///
    /// Fails with `policy_unavailable` when negotiation cannot complete.
    pub async fn negotiate_rule_version(
        &self,
        module_id: &str,
        requested_version: Option<&str>,
    ) -> Result<String, CccsError> {
        let mut body = json!({"module_id": module_id});
        if let Some(version) = requested_version {
            body["requested_version"] = json!(version);
        }
        let result = self.post("negotiate-version", &body).await?;
        Ok(result
            .get("rule_version")
            .and_then(Value::as_str)
            .unwrap_or("v1")
            .to_string())
    }

    /// `GET /policy/<version>/health`; false on any failure.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.config.url("policy", "health"))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, CccsError> {
        let response = self
            .client
            .post(self.config.url("policy", endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint, error = %e, "policy_request_failed");
                CccsError::new(ErrorKind::PolicyUnavailable, "policy publisher unavailable")
                    .with_source(e)
            })?;
        let status = response.status();
        if !status.is_success() {
            let detail = sanitize_error_message(&response.text().await.unwrap_or_default());
            error!(endpoint, status = %status, detail = %detail, "policy_call_failed");
            return Err(CccsError::new(
                ErrorKind::PolicyUnavailable,
                format!("policy call failed: {status}"),
            ));
        }
        response.json().await.map_err(|e| {
            CccsError::new(ErrorKind::PolicyUnavailable, "policy returned invalid JSON")
                .with_source(e)
        })
    }
}
