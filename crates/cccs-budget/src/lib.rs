// SPDX-License-Identifier: MIT OR Apache-2.0
//! Budget guard honouring the zero-synchronous-network requirement.
//!
//! Request-path checks decrement a cached `action_id → remaining` map
//! under the guard's lock. Cache misses queue a budget refresh into the
//! WAL; whether the miss denies immediately is governed by
//! `default_deny_on_unavailable`. The authoritative state lives upstream —
//! the local cache is optimistic and reconciled by the background drain.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use cccs_adapters::{BudgetAdapter, BudgetAdapterConfig};
use cccs_core::BudgetDecision;
use cccs_error::{CccsError, ErrorKind};
use cccs_wal::{EntryType, WalQueue};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Callback fired whenever a budget check denies.
pub type BudgetExceededCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;

/// Budget guard configuration.
#[derive(Clone)]
pub struct BudgetConfig {
    /// Connection settings (including `default_deny_on_unavailable`).
    pub adapter: BudgetAdapterConfig,
    /// Invoked with `(action_id, cost)` on every denial.
    pub on_budget_exceeded: Option<BudgetExceededCallback>,
}

impl BudgetConfig {
    /// Config for `base_url` with deny-by-default on and no callback.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            adapter: BudgetAdapterConfig::new(base_url),
            on_budget_exceeded: None,
        }
    }
}

/// Token-bucket guard over cached budget state.
pub struct BudgetGuard {
    config: BudgetConfig,
    adapter: BudgetAdapter,
    wal: Arc<WalQueue>,
    handle: tokio::runtime::Handle,
    cache: Mutex<HashMap<String, f64>>,
}

impl BudgetGuard {
    /// Build the guard over a shared WAL and runtime handle.
    ///
    /// # Errors
    ///
    /// Fails when the budget adapter cannot be constructed.
    pub fn new(
        config: BudgetConfig,
        wal: Arc<WalQueue>,
        handle: tokio::runtime::Handle,
    ) -> Result<Self, CccsError> {
        let adapter = BudgetAdapter::new(config.adapter.clone())?;
        Ok(Self {
            config,
            adapter,
            wal,
            handle,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Charge `cost` against the cached budget for `action_id`.
    ///
    /// With `use_cache` (degraded / not-ready mode) a cache miss queues a
    /// refresh and denies per `default_deny_on_unavailable`; without it the
    /// adapter is consulted and the cache populated.
    ///
    /// # Errors
    ///
    /// Fails with `budget_exceeded` when the cached remainder is
    /// insufficient, the upstream denies, or deny-by-default fires.
    pub fn check_budget(
        &self,
        action_id: &str,
        cost: f64,
        tenant_id: Option<&str>,
        use_cache: bool,
    ) -> Result<BudgetDecision, CccsError> {
        {
            let mut cache = self.cache.lock().expect("budget cache poisoned");
            if let Some(remaining) = cache.get(action_id).copied() {
                if cost > remaining {
                    drop(cache);
                    self.fire_exceeded(action_id, cost);
                    return Err(CccsError::new(
                        ErrorKind::BudgetExceeded,
                        format!("Budget exceeded for {action_id}: {cost} > {remaining}"),
                    ));
                }
                let new_remaining = remaining - cost;
                cache.insert(action_id.to_string(), new_remaining);
                return Ok(BudgetDecision {
                    allowed: true,
                    reason: "budget_available_cached".to_string(),
                    remaining: new_remaining,
                });
            }
        }

        if use_cache {
            self.queue_budget_call(action_id, cost, tenant_id);
            if self.config.adapter.default_deny_on_unavailable {
                self.fire_exceeded(action_id, cost);
                return Err(CccsError::new(
                    ErrorKind::BudgetExceeded,
                    "Budget unavailable; refresh queued",
                ));
            }
            return Err(CccsError::new(
                ErrorKind::BudgetExceeded,
                "Budget check queued for refresh",
            ));
        }

        self.fetch_and_cache(action_id, cost, tenant_id)
    }

    /// Seed the cached remainder for an action (operators, tests, warm
    /// starts).
    pub fn prime_budget(&self, action_id: &str, remaining: f64) {
        let mut cache = self.cache.lock().expect("budget cache poisoned");
        cache.insert(action_id.to_string(), remaining);
    }

    /// The cached remainder for an action, if any.
    #[must_use]
    pub fn cached_remaining(&self, action_id: &str) -> Option<f64> {
        let cache = self.cache.lock().expect("budget cache poisoned");
        cache.get(action_id).copied()
    }

    /// Replay a queued budget call during WAL drain.
    ///
    /// Refresh failures are swallowed; under deny-by-default the stale
    /// cache entry is evicted so the next request denies.
    pub fn process_wal_entry(&self, payload: &Value) {
        let Some(action_id) = payload.get("action_id").and_then(Value::as_str) else {
            return;
        };
        let cost = payload.get("cost").and_then(Value::as_f64).unwrap_or(0.0);
        let tenant_id = payload.get("tenant_id").and_then(Value::as_str);
        if let Err(e) = self.fetch_and_cache(action_id, cost, tenant_id) {
            warn!(action_id, error = %e, "budget_refresh_failed");
            if self.config.adapter.default_deny_on_unavailable {
                let mut cache = self.cache.lock().expect("budget cache poisoned");
                cache.remove(action_id);
            }
        }
    }

    /// Push a budget snapshot upstream for audit; returns the snapshot id.
    ///
    /// # Errors
    ///
    /// Fails with `budget_exceeded` when the snapshot cannot be persisted.
    pub fn persist_budget_snapshot(
        &self,
        budget_data: &Value,
        tenant_id: Option<&str>,
    ) -> Result<String, CccsError> {
        let budget_data = budget_data.clone();
        self.handle
            .block_on(self.adapter.persist_budget_snapshot(&budget_data, tenant_id))
    }

    /// Whether the budget upstream is reachable.
    #[must_use]
    pub fn health_check(&self) -> bool {
        self.handle.block_on(self.adapter.health_check())
    }

    fn fetch_and_cache(
        &self,
        action_id: &str,
        cost: f64,
        tenant_id: Option<&str>,
    ) -> Result<BudgetDecision, CccsError> {
        let decision = match self
            .handle
            .block_on(self.adapter.check_budget(action_id, cost, tenant_id))
        {
            Ok(decision) => decision,
            Err(e) => {
                if e.kind() == ErrorKind::BudgetExceeded {
                    self.fire_exceeded(action_id, cost);
                }
                return Err(e);
            }
        };
        if decision.allowed {
            let mut cache = self.cache.lock().expect("budget cache poisoned");
            cache.insert(action_id.to_string(), decision.remaining);
        }
        Ok(decision)
    }

    fn queue_budget_call(&self, action_id: &str, cost: f64, tenant_id: Option<&str>) {
        let payload = json!({
            "action": "check_budget",
            "action_id": action_id,
            "cost": cost,
            "tenant_id": tenant_id,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.wal.append(&payload, EntryType::BudgetCall) {
            warn!(action_id, error = %e, "budget_call_queue_failed");
        }
    }

    fn fire_exceeded(&self, action_id: &str, cost: f64) {
        if let Some(callback) = &self.config.on_budget_exceeded {
            callback(action_id, cost);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
