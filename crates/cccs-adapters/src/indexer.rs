// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt indexer facade adapter (evidence & audit ledger).

use crate::http::{HttpConfig, build_client, sanitize_error_message};
use cccs_error::{CccsError, ErrorKind};
use serde_json::{Value, json};
use tracing::error;

/// Facade over the indexer's `/evidence/<version>` endpoints.
pub struct IndexerAdapter {
    config: HttpConfig,
    client: reqwest::Client,
}

impl IndexerAdapter {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: HttpConfig) -> Result<Self, CccsError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    /// Index a single receipt via `POST /evidence/<version>/receipts`.
    ///
    /// # Errors
    ///
    /// Fails when the indexer rejects the receipt or is unreachable.
    pub async fn index_receipt(&self, receipt: &Value) -> Result<Value, CccsError> {
        self.post("receipts", receipt).await
    }

    /// Index a batch of receipts via `POST /evidence/<version>/batches`.
    ///
    /// # Errors
    ///
    /// Fails when the indexer rejects the batch or is unreachable.
    pub async fn index_batch(
        &self,
        receipts: &[Value],
        batch_id: Option<&str>,
    ) -> Result<Value, CccsError> {
        let mut payload = json!({"receipts": receipts});
        if let Some(batch_id) = batch_id {
            payload["batch_id"] = json!(batch_id);
        }
        self.post("batches", &payload).await
    }

    /// Request a Merkle inclusion proof via
    /// `POST /evidence/<version>/merkle-proof`.
    ///
    /// # Errors
    ///
    /// Fails when the proof cannot be generated.
    pub async fn merkle_proof(
        &self,
        receipt_id: &str,
        batch_id: Option<&str>,
    ) -> Result<Value, CccsError> {
        let mut payload = json!({"receipt_id": receipt_id});
        if let Some(batch_id) = batch_id {
            payload["batch_id"] = json!(batch_id);
        }
        self.post("merkle-proof", &payload).await
    }

    /// `GET /evidence/<version>/health`; false on any failure.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.config.url("evidence", "health"))
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
            .post(self.config.url("evidence", endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint, error = %e, "indexer_request_failed");
                CccsError::new(ErrorKind::Unknown, "receipt indexer unavailable").with_source(e)
            })?;
        let status = response.status();
        if !status.is_success() {
            let detail = sanitize_error_message(&response.text().await.unwrap_or_default());
            error!(endpoint, status = %status, detail = %detail, "indexer_call_failed");
            return Err(CccsError::new(
                ErrorKind::Unknown,
                format!("indexing failed: {status}"),
            ));
        }
        response.json().await.map_err(|e| {
            CccsError::new(ErrorKind::Unknown, "indexer returned invalid JSON").with_source(e)
        })
    }
}
