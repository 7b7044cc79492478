// SPDX-License-Identifier: MIT OR Apache-2.0
//! Actor resolution honouring the zero-synchronous-network requirement.
//!
//! The request path reads from a `(tenant, user, device)` cache only;
//! identity calls are queued into the WAL and replayed by the background
//! drain once connectivity returns. Cache-bypass resolution (used by the
//! drain and by dependency-healthy deployments) blocks on the adapter via
//! the shared runtime handle.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use cccs_adapters::{HttpConfig, IdentityAdapter};
use cccs_core::{ActorBlock, ActorContext};
use cccs_error::{CccsError, ErrorKind};
use cccs_wal::{EntryType, WalQueue};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Identity service configuration.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Connection settings for the identity adapter.
    pub adapter: HttpConfig,
    /// Silently drop failed WAL replays instead of re-raising.
    pub fallback_enabled: bool,
}

impl IdentityConfig {
    /// Config for `base_url` with fallback off.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            adapter: HttpConfig::new(base_url),
            fallback_enabled: false,
        }
    }
}

/// Resolves actors from cache, deferring network refreshes to the WAL.
pub struct IdentityService {
    config: IdentityConfig,
    adapter: IdentityAdapter,
    wal: Arc<WalQueue>,
    handle: tokio::runtime::Handle,
    cache: Mutex<HashMap<String, ActorBlock>>,
}

impl IdentityService {
    /// Build the service over a shared WAL and runtime handle.
    ///
    /// # Errors
    ///
    /// Fails when the identity adapter cannot be constructed.
    pub fn new(
        config: IdentityConfig,
        wal: Arc<WalQueue>,
        handle: tokio::runtime::Handle,
    ) -> Result<Self, CccsError> {
        let adapter = IdentityAdapter::new(config.adapter.clone())?;
        Ok(Self {
            config,
            adapter,
            wal,
            handle,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve an actor block for `context`.
    ///
    /// With `use_cache` (degraded / not-ready mode) a cache miss queues an
    /// identity refresh into the WAL and fails with `actor_unavailable`;
    /// without it the adapter is called and the cache populated. A cache
    /// hit whose session id differs from the context queues a
    /// re-resolution without blocking the request.
    ///
    /// # Errors
    ///
    /// Fails with `actor_unavailable` on an invalid context, a cache-only
    /// miss, or an adapter failure.
    pub fn resolve_actor(
        &self,
        context: &ActorContext,
        use_cache: bool,
    ) -> Result<ActorBlock, CccsError> {
        let context = context.clone();
        validate_context(&context)?;

        let key = cache_key(&context);
        {
            let cache = self.cache.lock().expect("identity cache poisoned");
            if let Some(cached) = cache.get(&key) {
                if cached.session_id != context.session_id {
                    self.queue_identity_call(&context, "update_session");
                }
                return Ok(cached.clone());
            }
        }

        if use_cache {
            self.queue_identity_call(&context, "resolve_actor");
            return Err(CccsError::new(
                ErrorKind::ActorUnavailable,
                "Actor not cached; identity refresh queued",
            ));
        }

        self.resolve_online(&context)
    }

    /// Warm the cache with a resolved block (operators, tests, and edge
    /// nodes that pre-seed from a previous session).
    pub fn prime_actor(&self, context: &ActorContext, block: ActorBlock) {
        let mut cache = self.cache.lock().expect("identity cache poisoned");
        cache.insert(cache_key(context), block);
    }

    /// Replay a queued identity call during WAL drain.
    ///
    /// Payloads with missing context fields are skipped. With fallback
    /// enabled, adapter failures are dropped silently.
    ///
    /// # Errors
    ///
    /// Fails with `actor_unavailable` when the refresh fails and fallback
    /// is disabled.
    pub fn process_wal_entry(&self, payload: &Value) -> Result<(), CccsError> {
        let empty = json!({});
        let data = payload.get("context").unwrap_or(&empty);
        let required = |field: &str| data.get(field).and_then(Value::as_str).map(str::to_string);
        let (Some(tenant_id), Some(device_id), Some(session_id), Some(user_id)) = (
            required("tenant_id"),
            required("device_id"),
            required("session_id"),
            required("user_id"),
        ) else {
            return Ok(());
        };
        let context = ActorContext {
            tenant_id,
            device_id,
            session_id,
            user_id,
            actor_type: data
                .get("actor_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            runtime_clock: Utc::now(),
            extras: Default::default(),
        };

        match self.resolve_online(&context) {
            Ok(_) => Ok(()),
            Err(_) if self.config.fallback_enabled => Ok(()),
            Err(e) => Err(CccsError::new(
                ErrorKind::ActorUnavailable,
                format!("identity refresh failed: {e}"),
            )),
        }
    }

    /// Whether the identity upstream is reachable.
    #[must_use]
    pub fn health_check(&self) -> bool {
        self.handle.block_on(self.adapter.health_check())
    }

    /// Adapter call outside the request path; populates the cache.
    fn resolve_online(&self, context: &ActorContext) -> Result<ActorBlock, CccsError> {
        let actor = self.handle.block_on(self.adapter.resolve_actor(context))?;
        let mut cache = self.cache.lock().expect("identity cache poisoned");
        cache.insert(cache_key(context), actor.clone());
        Ok(actor)
    }

    fn queue_identity_call(&self, context: &ActorContext, action: &str) {
        let payload = json!({
            "action": action,
            "context": {
                "tenant_id": context.tenant_id,
                "user_id": context.user_id,
                "device_id": context.device_id,
                "session_id": context.session_id,
                "actor_type": context.actor_type,
            },
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.wal.append(&payload, EntryType::IdentityCall) {
            warn!(action, error = %e, "identity_call_queue_failed");
        }
    }
}

fn cache_key(context: &ActorContext) -> String {
    format!(
        "{}:{}:{}",
        context.tenant_id, context.user_id, context.device_id
    )
}

fn validate_context(context: &ActorContext) -> Result<(), CccsError> {
    let missing: Vec<&str> = [
        ("tenant_id", &context.tenant_id),
        ("device_id", &context.device_id),
        ("session_id", &context.session_id),
        ("user_id", &context.user_id),
    ]
    .iter()
    .filter(|(_, value)| value.is_empty())
    .map(|(field, _)| *field)
    .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CccsError::new(
            ErrorKind::ActorUnavailable,
            format!("Missing actor context fields: {missing:?}"),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn context(session: &str) -> ActorContext {
        ActorContext {
            tenant_id: "t1".into(),
            device_id: "d1".into(),
            session_id: session.into(),
            user_id: "u1".into(),
            actor_type: "human".into(),
            runtime_clock: Utc::now(),
            extras: Default::default(),
        }
    }

    fn block(session: &str) -> ActorBlock {
        ActorBlock {
            actor_id: "actor-1".into(),
            actor_type: "human".into(),
            session_id: session.into(),
            provenance_signature: "sig".into(),
            normalization_version: "v1".into(),
            warnings: vec![],
            salt_version: "s1".into(),
            monotonic_counter: 7,
        }
    }

    fn service(dir: &tempfile::TempDir, rt: &tokio::runtime::Runtime) -> (IdentityService, Arc<WalQueue>) {
        let wal = Arc::new(WalQueue::open(dir.path().join("identity.wal")).unwrap());
        let svc = IdentityService::new(
            IdentityConfig::new("http://127.0.0.1:9"),
            Arc::clone(&wal),
            rt.handle().clone(),
        )
        .unwrap();
        (svc, wal)
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn invalid_context_is_rejected() {
        let rt = runtime();
        let dir = tempdir().unwrap();
        let (svc, wal) = service(&dir, &rt);
        let mut ctx = context("s1");
        ctx.user_id.clear();
        let err = svc.resolve_actor(&ctx, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActorUnavailable);
        assert!(err.message().contains("user_id"));
        assert!(wal.is_empty());
    }

    #[test]
    fn cache_miss_queues_refresh_and_fails() {
        let rt = runtime();
        let dir = tempdir().unwrap();
        let (svc, wal) = service(&dir, &rt);
        let err = svc.resolve_actor(&context("s1"), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActorUnavailable);
        assert!(err.message().contains("queued"));

        assert_eq!(wal.len(), 1);
        let mut queued = Vec::new();
        wal.drain(
            &mut |entry_type, payload| {
                queued.push((entry_type, payload));
                Ok(())
            },
            None,
        )
        .unwrap();
        let (entry_type, payload) = &queued[0];
        assert_eq!(*entry_type, EntryType::IdentityCall);
        assert_eq!(payload["action"], json!("resolve_actor"));
        assert_eq!(payload["context"]["tenant_id"], json!("t1"));
    }

    #[test]
    fn cache_hit_serves_without_queueing() {
        let rt = runtime();
        let dir = tempdir().unwrap();
        let (svc, wal) = service(&dir, &rt);
        svc.prime_actor(&context("s1"), block("s1"));
        let actor = svc.resolve_actor(&context("s1"), true).unwrap();
        assert_eq!(actor.actor_id, "actor-1");
        assert!(wal.is_empty());
    }

    #[test]
    fn session_change_queues_update_but_serves_cached() {
        let rt = runtime();
        let dir = tempdir().unwrap();
        let (svc, wal) = service(&dir, &rt);
        svc.prime_actor(&context("s1"), block("s1"));
        let actor = svc.resolve_actor(&context("s2"), true).unwrap();
        assert_eq!(actor.session_id, "s1");
        assert_eq!(wal.len(), 1);
        let entries = wal.dead_letter_entries();
        assert!(entries.is_empty());
        let mut action = None;
        wal.drain(
            &mut |_, payload| {
                action = payload.get("action").cloned();
                Ok(())
            },
            None,
        )
        .unwrap();
        assert_eq!(action, Some(json!("update_session")));
    }

    #[test]
    fn wal_entry_with_missing_context_is_skipped() {
        let rt = runtime();
        let dir = tempdir().unwrap();
        let (svc, _) = service(&dir, &rt);
        assert!(svc.process_wal_entry(&json!({"action": "resolve_actor"})).is_ok());
        assert!(
            svc.process_wal_entry(&json!({"context": {"tenant_id": "t1"}}))
                .is_ok()
        );
    }

    #[test]
    fn failed_replay_respects_fallback_flag() {
        let rt = runtime();
        let dir = tempdir().unwrap();
        // Unreachable adapter: port 9 is the discard port.
        let wal = Arc::new(WalQueue::open(dir.path().join("identity.wal")).unwrap());
        let mut config = IdentityConfig::new("http://127.0.0.1:9");
        config.fallback_enabled = true;
        let lenient = IdentityService::new(config, Arc::clone(&wal), rt.handle().clone()).unwrap();
        let payload = json!({"context": {
            "tenant_id": "t1", "device_id": "d1", "session_id": "s1", "user_id": "u1"
        }});
        assert!(lenient.process_wal_entry(&payload).is_ok());

        let strict = IdentityService::new(
            IdentityConfig::new("http://127.0.0.1:9"),
            Arc::clone(&wal),
            rt.handle().clone(),
        )
        .unwrap();
        let err = strict.process_wal_entry(&payload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActorUnavailable);
    }

    #[test]
    fn wal_states_untouched_by_validation_failures() {
        let rt = runtime();
        let dir = tempdir().unwrap();
        let (svc, wal) = service(&dir, &rt);
        let mut ctx = context("s1");
        ctx.tenant_id.clear();
        let _ = svc.resolve_actor(&ctx, true);
        assert!(wal.pending_sync_entries().is_empty());
        assert_eq!(wal.len(), 0);
        assert!(matches!(
            wal.dead_letter_entries().first().map(|e| e.state),
            None
        ));
    }
}
