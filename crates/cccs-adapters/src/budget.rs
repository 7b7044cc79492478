// SPDX-License-Identifier: MIT OR Apache-2.0
//! Budget / rate-limit facade adapter.

use crate::http::{HttpConfig, build_client, sanitize_error_message};
use cccs_core::BudgetDecision;
use cccs_error::{CccsError, ErrorKind};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{error, warn};

/// Budget adapter configuration.
#[derive(Debug, Clone)]
pub struct BudgetAdapterConfig {
    /// Connection settings.
    pub http: HttpConfig,
    /// Treat upstream unavailability as a denial.
    pub default_deny_on_unavailable: bool,
}

impl BudgetAdapterConfig {
    /// Config for `base_url` with deny-by-default on.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpConfig::new(base_url),
            default_deny_on_unavailable: true,
        }
    }
}

/// Facade over the budget service's `/budget/<version>` and
/// `/rate-limit/<version>` endpoints.
pub struct BudgetAdapter {
    config: BudgetAdapterConfig,
    client: reqwest::Client,
}

impl BudgetAdapter {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: BudgetAdapterConfig) -> Result<Self, CccsError> {
        let client = build_client(&config.http)?;
        Ok(Self { config, client })
    }

    /// Check a budget via `POST /budget/<version>/check`.
    ///
    /// # Errors
    ///
    /// Fails with `budget_exceeded` when the upstream denies (429/403 or an
    /// explicit `allowed: false`), and — under deny-by-default — when the
    /// upstream is unavailable at all.
    pub async fn check_budget(
        &self,
        action_id: &str,
        cost: f64,
        tenant_id: Option<&str>,
    ) -> Result<BudgetDecision, CccsError> {
        let mut payload = json!({"action_id": action_id, "cost": cost});
        if let Some(tenant) = tenant_id {
            payload["tenant_id"] = json!(tenant);
        }

        let response = self
            .client
            .post(self.config.http.url("budget", "check"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.unavailable("budget request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = sanitize_error_message(&response.text().await.unwrap_or_default());
            return Err(self.status_error(action_id, status, &detail));
        }

        let result: Value = response.json().await.map_err(|e| {
            CccsError::new(ErrorKind::BudgetExceeded, "budget returned invalid JSON")
                .with_source(e)
        })?;
        if !result.get("allowed").and_then(Value::as_bool).unwrap_or(false) {
            let reason = result
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(CccsError::new(
                ErrorKind::BudgetExceeded,
                format!("Budget exceeded for {action_id}: {reason}"),
            ));
        }
        Ok(BudgetDecision {
            allowed: true,
            reason: result
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("budget_available")
                .to_string(),
            remaining: result.get("remaining").and_then(Value::as_f64).unwrap_or(0.0),
        })
    }

    /// Check a rate-limit policy via `POST /rate-limit/<version>/check`.
    ///
    /// # Errors
    ///
    /// Fails with `budget_exceeded` on 429, explicit denial, or — under
    /// deny-by-default — upstream unavailability.
    pub async fn check_rate_limit(
        &self,
        policy_id: &str,
        tenant_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Value, CccsError> {
        let mut payload = json!({"policy_id": policy_id});
        if let Some(tenant) = tenant_id {
            payload["tenant_id"] = json!(tenant);
        }
        if let Some(user) = user_id {
            payload["user_id"] = json!(user);
        }

        let response = self
            .client
            .post(self.config.http.url("rate-limit", "check"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.unavailable("rate-limit request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = sanitize_error_message(&response.text().await.unwrap_or_default());
            return Err(self.status_error(policy_id, status, &detail));
        }
        response.json().await.map_err(|e| {
            CccsError::new(ErrorKind::BudgetExceeded, "rate-limit returned invalid JSON")
                .with_source(e)
        })
    }

    /// Push a budget snapshot upstream for audit via
    /// `POST /budget/<version>/snapshot`; returns the snapshot id.
    ///
    /// # Errors
    ///
    /// Fails with `budget_exceeded` when the snapshot cannot be persisted.
    pub async fn persist_budget_snapshot(
        &self,
        budget_data: &Value,
        tenant_id: Option<&str>,
    ) -> Result<String, CccsError> {
        let mut payload = json!({"budget_data": budget_data});
        if let Some(tenant) = tenant_id {
            payload["tenant_id"] = json!(tenant);
        }
        let response = self
            .client
            .post(self.config.http.url("budget", "snapshot"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "budget_snapshot_failed");
                CccsError::new(ErrorKind::BudgetExceeded, "failed to persist budget snapshot")
                    .with_source(e)
            })?;
        let result: Value = response.json().await.map_err(|e| {
            CccsError::new(ErrorKind::BudgetExceeded, "budget returned invalid JSON")
                .with_source(e)
        })?;
        Ok(result
            .get("snapshot_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// `GET /budget/<version>/health`; false on any failure.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.config.http.url("budget", "health"))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn status_error(&self, subject: &str, status: StatusCode, detail: &str) -> CccsError {
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            warn!(subject, status = %status, "budget_denied");
            return CccsError::new(
                ErrorKind::BudgetExceeded,
                format!("Budget exceeded: {detail}"),
            );
        }
        error!(subject, status = %status, detail, "budget_check_failed");
        if self.config.default_deny_on_unavailable {
            CccsError::new(
                ErrorKind::BudgetExceeded,
                "budget service unavailable, denying by default",
            )
        } else {
            CccsError::new(
                ErrorKind::BudgetExceeded,
                format!("Budget check failed: {status}"),
            )
        }
    }

    fn unavailable(&self, what: &str, e: reqwest::Error) -> CccsError {
        error!(error = %e, "budget_request_failed");
        if self.config.default_deny_on_unavailable {
            CccsError::new(
                ErrorKind::BudgetExceeded,
                "budget service unavailable, denying by default",
            )
            .with_source(e)
        } else {
            CccsError::new(ErrorKind::BudgetExceeded, what.to_string()).with_source(e)
        }
    }
}
