// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identity / IAM facade adapter.
//!
//! Verifies identities and fetches actor provenance. Every call carries a
//! fresh `X-Request-ID` correlation id, and upstream error text is
//! sanitized before it reaches logs.

use crate::http::{HttpConfig, build_client, sanitize_error_message};
use cccs_core::{ActorBlock, ActorContext};
use cccs_error::{CccsError, ErrorKind};
use serde_json::{Value, json};
use tracing::error;
use uuid::Uuid;

/// Facade over the identity service's `/iam/<version>` endpoints.
pub struct IdentityAdapter {
    config: HttpConfig,
    client: reqwest::Client,
}

impl IdentityAdapter {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: HttpConfig) -> Result<Self, CccsError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    /// Verify an identity via `POST /iam/<version>/verify`.
    ///
    /// # Errors
    ///
    /// Fails with `actor_unavailable` when the service rejects the context
    /// or is unreachable.
    pub async fn verify_identity(
        &self,
        context: &ActorContext,
        token: Option<&str>,
    ) -> Result<Value, CccsError> {
        let request_id = Uuid::new_v4().to_string();
        let mut payload = json!({
            "tenant_id": context.tenant_id,
            "user_id": context.user_id,
            "device_id": context.device_id,
            "session_id": context.session_id,
            "actor_type": context.actor_type,
        });
        if let Some(token) = token {
            payload["token"] = json!(token);
        }

        let response = self
            .client
            .post(self.config.url("iam", "verify"))
            .header("X-Request-ID", &request_id)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(request_id = %request_id, error = %e, "identity_request_failed");
                CccsError::new(ErrorKind::ActorUnavailable, "identity service unavailable")
                    .with_source(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = sanitize_error_message(&response.text().await.unwrap_or_default());
            error!(request_id = %request_id, status = %status, detail = %detail, "identity_verify_failed");
            return Err(CccsError::new(
                ErrorKind::ActorUnavailable,
                format!("identity verification failed: {status}"),
            ));
        }
        response.json().await.map_err(|e| {
            CccsError::new(ErrorKind::ActorUnavailable, "identity returned invalid JSON")
                .with_source(e)
        })
    }

    /// Fetch provenance metadata via `POST /iam/<version>/decision` with
    /// `action = get_provenance`.
    ///
    /// # Errors
    ///
    /// Fails with `actor_unavailable` when the service is unreachable or
    /// rejects the request.
    pub async fn get_actor_provenance(&self, context: &ActorContext) -> Result<Value, CccsError> {
        let request_id = Uuid::new_v4().to_string();
        let payload = json!({
            "tenant_id": context.tenant_id,
            "user_id": context.user_id,
            "device_id": context.device_id,
            "session_id": context.session_id,
            "action": "get_provenance",
            "resource": "actor_metadata",
        });

        let response = self
            .client
            .post(self.config.url("iam", "decision"))
            .header("X-Request-ID", &request_id)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(request_id = %request_id, error = %e, "identity_request_failed");
                CccsError::new(ErrorKind::ActorUnavailable, "identity service unavailable")
                    .with_source(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = sanitize_error_message(&response.text().await.unwrap_or_default());
            error!(request_id = %request_id, status = %status, detail = %detail, "identity_provenance_failed");
            return Err(CccsError::new(
                ErrorKind::ActorUnavailable,
                format!("identity provenance failed: {status}"),
            ));
        }
        response.json().await.map_err(|e| {
            CccsError::new(ErrorKind::ActorUnavailable, "identity returned invalid JSON")
                .with_source(e)
        })
    }

    /// Resolve a full actor block: identity verification plus provenance.
    ///
    /// # Errors
    ///
    /// Fails with `actor_unavailable` when either upstream call fails or no
    /// actor id is returned.
    pub async fn resolve_actor(&self, context: &ActorContext) -> Result<ActorBlock, CccsError> {
        let verify = self.verify_identity(context, None).await?;
        let provenance = self.get_actor_provenance(context).await?;

        let actor_id = verify
            .get("actor_id")
            .or_else(|| verify.get("user_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CccsError::new(
                    ErrorKind::ActorUnavailable,
                    "identity service did not return actor_id",
                )
            })?
            .to_string();

        Ok(ActorBlock {
            actor_id,
            actor_type: context.actor_type.clone(),
            session_id: context.session_id.clone(),
            provenance_signature: provenance
                .get("provenance_signature")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            normalization_version: provenance
                .get("normalization_version")
                .and_then(Value::as_str)
                .unwrap_or("v1")
                .to_string(),
            warnings: provenance
                .get("warnings")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            salt_version: provenance
                .get("salt_version")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            monotonic_counter: provenance
                .get("monotonic_counter")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }

    /// `GET /iam/<version>/health`; false on any failure.
    pub async fn health_check(&self) -> bool {
        match self.client.get(self.config.url("iam", "health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
