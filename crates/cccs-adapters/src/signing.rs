// SPDX-License-Identifier: MIT OR Apache-2.0
//! Signing / KMS facade adapter (Ed25519, HSM-backed upstream).

use crate::http::{HttpConfig, build_client, sanitize_error_message};
use cccs_error::{CccsError, ErrorKind};
use serde_json::{Value, json};
use tracing::error;

/// Signing adapter configuration.
#[derive(Debug, Clone)]
pub struct SigningAdapterConfig {
    /// Connection settings.
    pub http: HttpConfig,
    /// HSM key identifier used when a call does not name one.
    pub key_id: String,
}

impl SigningAdapterConfig {
    /// Config for `base_url` signing with `key_id`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, key_id: impl Into<String>) -> Self {
        Self {
            http: HttpConfig::new(base_url),
            key_id: key_id.into(),
        }
    }
}

/// Facade over the KMS `/kms/<version>` endpoints.
pub struct SigningAdapter {
    config: SigningAdapterConfig,
    client: reqwest::Client,
}

impl SigningAdapter {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: SigningAdapterConfig) -> Result<Self, CccsError> {
        let client = build_client(&config.http)?;
        Ok(Self { config, client })
    }

    /// Sign a receipt envelope via `POST /kms/<version>/sign`.
    ///
    /// # Errors
    ///
    /// Fails when the KMS rejects the request or is unreachable.
    pub async fn sign_receipt(
        &self,
        receipt_payload: &Value,
        key_id: Option<&str>,
    ) -> Result<String, CccsError> {
        let key_id = key_id.unwrap_or(&self.config.key_id);
        if key_id.is_empty() {
            return Err(CccsError::new(
                ErrorKind::Unknown,
                "key id required for signing",
            ));
        }
        let response = self
            .client
            .post(self.config.http.url("kms", "sign"))
            .json(&json!({
                "payload": receipt_payload,
                "key_id": key_id,
                "algorithm": "Ed25519",
            }))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "kms_request_failed");
                CccsError::new(ErrorKind::Unknown, "signing service unavailable").with_source(e)
            })?;
        let status = response.status();
        if !status.is_success() {
            let detail = sanitize_error_message(&response.text().await.unwrap_or_default());
            error!(status = %status, detail = %detail, "kms_sign_failed");
            return Err(CccsError::new(
                ErrorKind::Unknown,
                format!("signing failed: {status}"),
            ));
        }
        let result: Value = response.json().await.map_err(|e| {
            CccsError::new(ErrorKind::Unknown, "signing returned invalid JSON").with_source(e)
        })?;
        Ok(result
            .get("signature")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Verify an Ed25519 signature via `POST /kms/<version>/verify`.
    ///
    /// Returns `false` on verification failure and on any transport error.
    pub async fn verify_signature(
        &self,
        payload: &Value,
        signature: &str,
        key_id: Option<&str>,
    ) -> bool {
        let key_id = key_id.unwrap_or(&self.config.key_id);
        let response = self
            .client
            .post(self.config.http.url("kms", "verify"))
            .json(&json!({
                "payload": payload,
                "signature": signature,
                "key_id": key_id,
                "algorithm": "Ed25519",
            }))
            .send()
            .await;
        let Ok(response) = response else {
            return false;
        };
        if !response.status().is_success() {
            return false;
        }
        match response.json::<Value>().await {
            Ok(result) => result.get("valid").and_then(Value::as_bool).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// `GET /kms/<version>/health`; false on any failure.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.config.http.url("kms", "health"))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
