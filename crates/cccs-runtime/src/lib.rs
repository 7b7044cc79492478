// SPDX-License-Identifier: MIT OR Apache-2.0
//! The CCCS orchestrator.
//!
//! [`CccsRuntime`] wires the substrate's services over one shared WAL and
//! exposes the primary operation, [`CccsRuntime::execute_flow`], which
//! sequences six stages — actor resolution, config merge, offline policy
//! evaluation, budget check, receipt issuance, redaction — with zero
//! synchronous outbound network calls. Every subsystem serves from cache
//! or queues a refresh to the WAL; a background drain worker performs the
//! deferred network work.
//!
//! Lifecycle: `bootstrap` polls dependency health (backend mode requires
//! all dependencies; edge mode may serve degraded), version negotiation
//! follows bootstrap, and `shutdown` is idempotent, runs on drop, and is
//! triggered for every live instance by SIGINT/SIGTERM.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod shared;
mod worker;

use cccs_budget::{BudgetConfig, BudgetGuard};
use cccs_config::ConfigService;
use cccs_core::{
    ActorBlock, ActorContext, ApiVersion, BudgetDecision, ConfigLayers, ConfigResult, JsonMap,
    PolicyDecision, ReceiptRecord,
};
use cccs_error::{CanonicalError, CccsError, ErrorKind, ErrorTaxonomy, TaxonomyEntry};
use cccs_identity::{IdentityConfig, IdentityService};
use cccs_policy::{PolicyConfig, PolicyRuntime};
use cccs_receipt::{ReceiptConfig, ReceiptDraft, ReceiptService};
use cccs_redaction::{RedactionConfig, RedactionOutcome, RedactionService};
use cccs_telemetry::ObservabilityService;
use cccs_wal::{DeadLetterNotice, EntryType, OfflineCourier, WalEntry, WalQueue};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub use cccs_budget::BudgetExceededCallback;
pub use cccs_error::Severity;
pub use cccs_redaction::{RedactionRule, Strategy};

use worker::StopSignal;

/// Default overall bootstrap timeout.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between bootstrap health polls.
const BOOTSTRAP_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// How long the drain worker parks when the queue is empty.
const DRAIN_IDLE_WAIT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Deployment mode of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Degradation permitted; the request path requires cached data.
    Edge,
    /// All dependencies required; bootstrap fails when any is missing.
    Backend,
}

impl FromStr for Mode {
    type Err = CccsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edge" => Ok(Self::Edge),
            "backend" => Ok(Self::Backend),
            other => Err(CccsError::new(
                ErrorKind::Unknown,
                format!("mode must be 'edge' or 'backend', got '{other}'"),
            )),
        }
    }
}

/// Full runtime configuration.
pub struct CccsConfig {
    /// Deployment mode.
    pub mode: Mode,
    /// Runtime semver advertised during negotiation.
    pub version: String,
    /// Identity service settings.
    pub identity: IdentityConfig,
    /// Offline policy evaluator settings.
    pub policy: PolicyConfig,
    /// The three configuration layers.
    pub config_layers: ConfigLayers,
    /// Receipt service settings.
    pub receipt: ReceiptConfig,
    /// Redaction settings.
    pub redaction: RedactionConfig,
    /// Budget guard settings.
    pub budget: BudgetConfig,
    /// Error taxonomy mapping; empty means the defaults.
    pub taxonomy: Vec<(ErrorKind, TaxonomyEntry)>,
}

/// External sink receiving drained receipts.
pub type ReceiptSink = Arc<dyn Fn(Value) -> anyhow::Result<()> + Send + Sync>;

/// Inputs to one gated action.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// Policy module consulted for this action.
    pub module_id: String,
    /// Policy evaluation inputs (may carry `config_overrides`).
    pub inputs: JsonMap,
    /// Budget action identifier.
    pub action_id: String,
    /// Budget cost of the action.
    pub cost: f64,
    /// Configuration key to merge.
    pub config_key: String,
    /// Payload to redact.
    pub payload: JsonMap,
    /// Redaction rule-version hint.
    pub redaction_hint: String,
    /// The caller's actor context.
    pub actor_context: ActorContext,
}

/// Results of all six stages.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    /// Resolved actor block.
    pub actor: ActorBlock,
    /// Merged configuration value.
    pub config: ConfigResult,
    /// Policy decision.
    pub policy: PolicyDecision,
    /// Budget decision.
    pub budget: BudgetDecision,
    /// Durable receipt handle.
    pub receipt: ReceiptRecord,
    /// Redacted payload.
    pub redaction: RedactionOutcome,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// The services and state shared between the host API, the drain worker,
/// and the process-wide registry.
pub(crate) struct RuntimeInner {
    mode: Mode,
    version: ApiVersion,
    wal: Arc<WalQueue>,
    identity: IdentityService,
    config_service: ConfigService,
    policy: PolicyRuntime,
    budget: BudgetGuard,
    observability: ObservabilityService,
    courier: OfflineCourier,
    receipts: ReceiptService,
    redaction: RedactionService,
    taxonomy: ErrorTaxonomy,
    receipt_sink: Option<ReceiptSink>,
    dependencies_ready: AtomicBool,
    shutdown_called: AtomicBool,
    stop: StopSignal,
    drain_lock: std::sync::Mutex<()>,
    worker: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// Per-process runtime mediating gated actions.
pub struct CccsRuntime {
    inner: Arc<RuntimeInner>,
}

impl CccsRuntime {
    /// Construct the runtime and start its background drain worker.
    ///
    /// Services initialize in a fixed order over one WAL-backed queue:
    /// identity, config, policy, budget, observability, courier, receipts,
    /// redaction, taxonomy. The WAL path defaults to the receipt storage
    /// path with a `.wal` extension.
    ///
    /// # Errors
    ///
    /// Fails when the version string is not semver, any adapter cannot be
    /// constructed, the policy trust anchors are empty, the redaction rule
    /// set is empty, or the WAL cannot be opened.
    pub fn new(
        config: CccsConfig,
        wal_path: Option<PathBuf>,
        receipt_sink: Option<ReceiptSink>,
    ) -> Result<Self, CccsError> {
        let version = ApiVersion::parse(&config.version).map_err(|e| {
            CccsError::new(ErrorKind::Unknown, format!("invalid runtime version: {e}"))
        })?;
        let handle = shared::shared_runtime().handle().clone();

        let wal_path = wal_path.unwrap_or_else(|| config.receipt.storage_path.with_extension("wal"));
        let wal = Arc::new(WalQueue::open(wal_path).map_err(|e| {
            CccsError::new(ErrorKind::Unknown, "failed to open WAL").with_source(e)
        })?);

        let identity = IdentityService::new(config.identity, Arc::clone(&wal), handle.clone())?;
        let config_service = ConfigService::new(config.config_layers);
        let policy = PolicyRuntime::new(config.policy)?;
        let budget = BudgetGuard::new(config.budget, Arc::clone(&wal), handle.clone())?;
        let observability = ObservabilityService::new();
        let courier = OfflineCourier::new(Arc::clone(&wal));
        let receipts = ReceiptService::new(config.receipt, courier.clone(), handle)?;
        let redaction = RedactionService::new(config.redaction)?;
        let taxonomy = if config.taxonomy.is_empty() {
            ErrorTaxonomy::with_defaults()
        } else {
            ErrorTaxonomy::new(config.taxonomy)
        };

        let inner = Arc::new(RuntimeInner {
            mode: config.mode,
            version,
            wal,
            identity,
            config_service,
            policy,
            budget,
            observability,
            courier,
            receipts,
            redaction,
            taxonomy,
            receipt_sink,
            dependencies_ready: AtomicBool::new(false),
            shutdown_called: AtomicBool::new(false),
            stop: StopSignal::new(),
            drain_lock: std::sync::Mutex::new(()),
            worker: std::sync::Mutex::new(None),
        });

        let for_worker = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("cccs-wal-drain".to_string())
            .spawn(move || for_worker.run_drain_worker())
            .map_err(|e| {
                CccsError::new(ErrorKind::Unknown, "failed to spawn drain worker").with_source(e)
            })?;
        *inner.worker.lock().expect("worker handle poisoned") = Some(handle);

        shared::register_instance(&inner);
        shared::install_signal_handlers();
        Ok(Self { inner })
    }

    /// Validate dependencies per mode, then negotiate versions.
    ///
    /// With a supplied health map, the map is authoritative. Without one,
    /// adapter health endpoints are polled every 30 s (interruptibly)
    /// until all dependencies are healthy or five minutes elapse.
    ///
    /// # Errors
    ///
    /// In backend mode, missing dependencies fail with
    /// `policy_unavailable` wrapping `bootstrap_timeout`. Edge mode never
    /// fails bootstrap; it starts degraded instead.
    pub fn bootstrap(&self, dependency_health: Option<&BTreeMap<String, bool>>) -> Result<(), CccsError> {
        self.bootstrap_with(dependency_health, BOOTSTRAP_TIMEOUT, BOOTSTRAP_POLL_INTERVAL)
    }

    /// [`CccsRuntime::bootstrap`] with explicit timeout and poll interval.
    ///
    /// # Errors
    ///
    /// Same as [`CccsRuntime::bootstrap`].
    pub fn bootstrap_with(
        &self,
        dependency_health: Option<&BTreeMap<String, bool>>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), CccsError> {
        if let Some(health) = dependency_health {
            self.inner.handle_dependency_health(health)?;
            self.inner.perform_version_negotiation();
            return Ok(());
        }

        let start = Instant::now();
        loop {
            let health = self.inner.check_dependencies();
            let missing = self.inner.missing_dependencies(&health);
            if missing.is_empty() {
                self.inner.dependencies_ready.store(true, Ordering::SeqCst);
                self.inner.perform_version_negotiation();
                return Ok(());
            }
            if self.inner.mode == Mode::Edge {
                self.inner.dependencies_ready.store(false, Ordering::SeqCst);
                info!(missing = ?missing, "edge_bootstrap_degraded");
                self.inner.perform_version_negotiation();
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(bootstrap_error(&missing));
            }
            self.inner.stop.wait_timeout(poll_interval);
            if self.inner.shutdown_called.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    /// Negotiate the API version with a peer.
    ///
    /// # Errors
    ///
    /// Fails with `version_mismatch` when the peer's version cannot be
    /// parsed or is incompatible (major differs, or the peer requires a
    /// newer minor/patch than this runtime carries).
    pub fn negotiate_version(&self, requested_version: &str) -> Result<String, CccsError> {
        let requested = ApiVersion::parse(requested_version).map_err(|e| {
            CccsError::new(ErrorKind::VersionMismatch, format!("{e}"))
        })?;
        if !self.inner.version.is_compatible_with(&requested) {
            return Err(CccsError::new(
                ErrorKind::VersionMismatch,
                format!(
                    "Incompatible versions: runtime {} vs requested {}",
                    self.inner.version, requested
                ),
            ));
        }
        Ok(self.inner.version.to_string())
    }

    /// Load a signed policy snapshot (bootstrap or admin reload).
    ///
    /// # Errors
    ///
    /// Fails with `policy_unavailable` when the signature does not verify
    /// or the payload is malformed.
    pub fn load_policy_snapshot(&self, payload: &Value, signature: &str) -> Result<(), CccsError> {
        self.inner.policy.load_snapshot(payload, signature)?;
        Ok(())
    }

    /// Execute the six-stage flow for one gated action.
    ///
    /// Zero synchronous outbound network calls happen on this path: when
    /// dependencies are not ready every subsystem is forced to cache-only
    /// mode, and refreshes are queued to the WAL for the background drain.
    ///
    /// # Errors
    ///
    /// Canonical errors only: `actor_unavailable`, `policy_unavailable`,
    /// `budget_exceeded` (after emitting the dedicated receipt),
    /// `receipt_schema_error`, or `redaction_blocked`. No partial success
    /// leaks — a failure before the receipt stage emits no receipt.
    pub fn execute_flow(&self, request: &FlowRequest) -> Result<FlowOutcome, CccsError> {
        let inner = &self.inner;
        let use_cache = !inner.dependencies_ready.load(Ordering::SeqCst);

        // 1. Resolve actor; cache-only unless dependencies are ready.
        let actor = match inner.identity.resolve_actor(&request.actor_context, use_cache) {
            Ok(actor) => actor,
            Err(e) if e.kind() == ErrorKind::ActorUnavailable => return Err(e),
            Err(e) => return Err(inner.wrap_stage_error(ErrorKind::ActorUnavailable, "Identity resolution failed", e)),
        };

        // 2. Merge config with per-call overrides.
        let overrides = request
            .inputs
            .get("config_overrides")
            .and_then(Value::as_object);
        let config = inner
            .config_service
            .get_config(&request.config_key, None, overrides);

        // 3. Evaluate policy offline.
        let policy_decision = match inner.policy.evaluate(&request.module_id, &request.inputs) {
            Ok(decision) => decision,
            Err(e) if e.kind() == ErrorKind::PolicyUnavailable => return Err(e),
            Err(e) => return Err(inner.wrap_stage_error(ErrorKind::PolicyUnavailable, "Policy evaluation failed", e)),
        };

        // 4. Policy snapshot audit record.
        if let Some(snapshot) = inner.policy.snapshot(&request.module_id) {
            inner
                .wal
                .append_policy_snapshot(&json!({
                    "module_id": request.module_id,
                    "snapshot_hash": policy_decision.policy_snapshot_hash,
                    "version": snapshot.version,
                    "timestamp": Utc::now().to_rfc3339(),
                }))
                .map_err(|e| {
                    CccsError::new(ErrorKind::Unknown, "failed to append policy audit record")
                        .with_source(e)
                })?;
        }

        // 5. Budget check; a denial emits its receipt before propagating.
        let budget = match inner.budget.check_budget(
            &request.action_id,
            request.cost,
            Some(&request.actor_context.tenant_id),
            use_cache,
        ) {
            Ok(budget) => budget,
            Err(e) if e.kind() == ErrorKind::BudgetExceeded => {
                inner.emit_budget_exceeded_receipt(request, &actor, &policy_decision);
                return Err(e);
            }
            Err(e) => return Err(inner.wrap_stage_error(ErrorKind::BudgetExceeded, "Budget check failed", e)),
        };
        inner
            .wal
            .append_budget_snapshot(&json!({
                "action_id": request.action_id,
                "cost": request.cost,
                "remaining": budget.remaining,
                "timestamp": Utc::now().to_rfc3339(),
            }))
            .map_err(|e| {
                CccsError::new(ErrorKind::Unknown, "failed to append budget audit record")
                    .with_source(e)
            })?;

        // 6. Issue the receipt inside an observability span.
        let receipt = {
            let span = inner
                .observability
                .start_span(&format!("cccs:{}", request.action_id), None);
            inner.receipts.write_receipt(ReceiptDraft {
                inputs: request.inputs.clone(),
                result: result_map(
                    canonicalize_decision(&policy_decision.decision),
                    &policy_decision.rationale,
                    json!(["cccs"]),
                ),
                actor: actor_map(&actor),
                policy_metadata: policy_metadata_map(&policy_decision),
                trace: Some(span.context().clone()),
                annotations: Some(
                    json!({"config_source": config.source_layers})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                ),
                degraded: use_cache,
            })?
        };

        // 7. Redact the payload.
        let redaction = inner
            .redaction
            .apply_redaction(&request.payload, Some(&request.redaction_hint))?;

        Ok(FlowOutcome {
            actor,
            config,
            policy: policy_decision,
            budget,
            receipt,
            redaction,
        })
    }

    /// Drain the courier once, returning acked sequences.
    ///
    /// # Errors
    ///
    /// Propagates WAL persistence failures.
    pub fn drain_courier(&self) -> Result<Vec<u64>, CccsError> {
        self.inner.drain_once().map_err(|e| {
            CccsError::new(ErrorKind::Unknown, "courier drain failed").with_source(e)
        })
    }

    /// Normalize any substrate error through the taxonomy.
    #[must_use]
    pub fn normalize_error(&self, error: &CccsError) -> CanonicalError {
        self.inner.taxonomy.normalize_error(error)
    }

    /// Register a hook fired before receipt signing.
    pub fn register_before_sign(&self, hook: cccs_receipt::Hook) {
        self.inner.receipts.register_before_sign(hook);
    }

    /// Register a hook fired after signing, before the journal write.
    pub fn register_before_flush(&self, hook: cccs_receipt::Hook) {
        self.inner.receipts.register_before_flush(hook);
    }

    /// Warm the identity cache (edge nodes, operators, tests).
    pub fn prime_actor(&self, context: &ActorContext, block: ActorBlock) {
        self.inner.identity.prime_actor(context, block);
    }

    /// Seed the cached budget remainder for an action.
    pub fn prime_budget(&self, action_id: &str, remaining: f64) {
        self.inner.budget.prime_budget(action_id, remaining);
    }

    /// Whether bootstrap saw every dependency healthy.
    #[must_use]
    pub fn dependencies_ready(&self) -> bool {
        self.inner.dependencies_ready.load(Ordering::SeqCst)
    }

    /// WAL entries awaiting an upstream retry.
    #[must_use]
    pub fn pending_sync_entries(&self) -> Vec<WalEntry> {
        self.inner.wal.pending_sync_entries()
    }

    /// WAL entries whose delivery dead-lettered.
    #[must_use]
    pub fn dead_letter_entries(&self) -> Vec<WalEntry> {
        self.inner.wal.dead_letter_entries()
    }

    /// Stop the drain worker, join it, and deregister the instance.
    /// Idempotent; also runs on drop and on SIGINT/SIGTERM.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for CccsRuntime {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl RuntimeInner {
    fn wrap_stage_error(&self, kind: ErrorKind, stage: &str, error: CccsError) -> CccsError {
        let canonical = self.taxonomy.normalize_error(&error);
        error!(stage, error = %error, debug_id = %canonical.debug_id, "flow_stage_failed");
        CccsError::new(
            kind,
            format!(
                "{stage}: {} - {}",
                canonical.canonical_code, canonical.user_message
            ),
        )
        .with_source(error)
    }

    /// Dispatch one drained WAL entry by type.
    fn dispatch_wal_entry(&self, entry_type: EntryType, payload: Value) -> anyhow::Result<()> {
        match entry_type {
            EntryType::IdentityCall => self
                .identity
                .process_wal_entry(&payload)
                .map_err(anyhow::Error::new),
            EntryType::BudgetCall => {
                self.budget.process_wal_entry(&payload);
                Ok(())
            }
            EntryType::Receipt => match &self.receipt_sink {
                Some(sink) => {
                    let receipt = payload.get("payload").cloned().unwrap_or(payload);
                    sink(receipt)
                }
                // No external sink configured: durably journaled already,
                // so the batch is simply marked delivered.
                None => Ok(()),
            },
            EntryType::Budget | EntryType::PolicySnapshot => Ok(()),
        }
    }

    fn drain_once(&self) -> Result<Vec<u64>, cccs_wal::WalError> {
        let _guard = self.drain_lock.lock().expect("drain lock poisoned");
        let mut sink =
            |entry_type: EntryType, payload: Value| self.dispatch_wal_entry(entry_type, payload);
        let mut emitter = |notice: &DeadLetterNotice| self.emit_dead_letter_receipt(notice);
        self.courier.drain(&mut sink, Some(&mut emitter))
    }

    fn run_drain_worker(self: Arc<Self>) {
        debug!("drain_worker_started");
        while !self.stop.is_set() {
            match self.drain_once() {
                Ok(drained) => {
                    if drained.is_empty() {
                        self.stop.wait_timeout(DRAIN_IDLE_WAIT);
                    }
                }
                Err(e) => {
                    error!(error = %e, "drain_worker_error");
                    self.emit_worker_failure_receipt(&e);
                    self.stop.wait_timeout(DRAIN_IDLE_WAIT);
                }
            }
        }
        debug!("drain_worker_stopped");
    }

    /// Emit a `budget_exceeded` receipt before the denial propagates.
    /// Best-effort: a receipt failure is logged, never masks the denial.
    fn emit_budget_exceeded_receipt(
        &self,
        request: &FlowRequest,
        actor: &ActorBlock,
        policy_decision: &PolicyDecision,
    ) {
        let draft = ReceiptDraft {
            inputs: request.inputs.clone(),
            result: result_map(
                "hard_block",
                &format!(
                    "Budget exceeded for {}: cost {}",
                    request.action_id, request.cost
                ),
                json!(["cccs", "budget_exceeded"]),
            ),
            actor: actor_map(actor),
            policy_metadata: policy_metadata_map(policy_decision),
            trace: None,
            annotations: json!({
                "action_id": request.action_id,
                "cost": request.cost,
                "receipt_type": "budget_exceeded",
            })
            .as_object()
            .cloned(),
            degraded: !self.dependencies_ready.load(Ordering::SeqCst),
        };
        if let Err(e) = self.receipts.write_receipt(draft) {
            error!(error = %e, "budget_exceeded_receipt_failed");
        }
    }

    /// Emit a dead-letter receipt for a WAL entry whose delivery failed.
    fn emit_dead_letter_receipt(&self, notice: &DeadLetterNotice) {
        let inputs = match &notice.payload {
            Value::Object(map) => map.clone(),
            other => json!({"payload": other}).as_object().cloned().unwrap_or_default(),
        };
        let draft = ReceiptDraft {
            inputs,
            result: result_map(
                "hard_block",
                &format!("WAL drain failed: {}", notice.error),
                json!(["cccs", "dead_letter"]),
            ),
            actor: JsonMap::new(),
            policy_metadata: JsonMap::new(),
            trace: None,
            annotations: json!({
                "receipt_type": "dead_letter",
                "wal_sequence": notice.wal_sequence,
                "entry_type": notice.entry_type.as_str(),
                "error": notice.error,
            })
            .as_object()
            .cloned(),
            degraded: true,
        };
        if let Err(e) = self.receipts.write_receipt(draft) {
            error!(error = %e, "dead_letter_receipt_failed");
        }
    }

    /// Emit a dead-letter receipt for a drain-pass failure itself.
    fn emit_worker_failure_receipt(&self, error: &cccs_wal::WalError) {
        let draft = ReceiptDraft {
            inputs: JsonMap::new(),
            result: result_map(
                "hard_block",
                &format!("WAL drain failed: {error}"),
                json!(["cccs", "dead_letter"]),
            ),
            actor: JsonMap::new(),
            policy_metadata: JsonMap::new(),
            trace: None,
            annotations: json!({
                "receipt_type": "dead_letter",
                "entry_type": "drain_worker_error",
                "error": error.to_string(),
            })
            .as_object()
            .cloned(),
            degraded: true,
        };
        if let Err(e) = self.receipts.write_receipt(draft) {
            error!(error = %e, "worker_failure_receipt_failed");
        }
    }

    fn handle_dependency_health(&self, health: &BTreeMap<String, bool>) -> Result<(), CccsError> {
        let missing = self.missing_dependencies(health);
        if !missing.is_empty() && self.mode == Mode::Backend {
            return Err(bootstrap_error(&missing));
        }
        self.dependencies_ready
            .store(missing.is_empty(), Ordering::SeqCst);
        Ok(())
    }

    fn missing_dependencies(&self, health: &BTreeMap<String, bool>) -> Vec<String> {
        self.dependency_list()
            .into_iter()
            .filter(|dep| !health.get(dep.as_str()).copied().unwrap_or(false))
            .collect()
    }

    fn check_dependencies(&self) -> BTreeMap<String, bool> {
        let mut health = BTreeMap::new();
        health.insert("identity".to_string(), self.identity.health_check());
        health.insert("policy".to_string(), self.policy.health_check());
        health.insert("budget".to_string(), self.budget.health_check());
        health.insert("signing".to_string(), self.receipts.signing_health_check());
        if self.receipts.has_indexer() {
            health.insert("indexer".to_string(), self.receipts.indexer_health_check());
        }
        health
    }

    fn dependency_list(&self) -> Vec<String> {
        let mut deps = vec![
            "identity".to_string(),
            "policy".to_string(),
            "budget".to_string(),
            "signing".to_string(),
        ];
        if self.receipts.has_indexer() {
            deps.push("indexer".to_string());
        }
        deps
    }

    /// Version negotiation hook run after bootstrap settles. Peer-driven
    /// negotiation goes through [`CccsRuntime::negotiate_version`].
    fn perform_version_negotiation(&self) {
        debug!(version = %self.version, "version_negotiation_ready");
    }

    fn shutdown(&self) {
        if self.shutdown_called.swap(true, Ordering::SeqCst) {
            return;
        }
        shared::deregister_instance(self);
        self.stop.set();
        let handle = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("drain_worker_panicked");
            }
        }
        info!("cccs_runtime_shutdown");
    }
}

fn bootstrap_error(missing: &[String]) -> CccsError {
    CccsError::new(ErrorKind::PolicyUnavailable, "Bootstrap failed").with_source(CccsError::new(
        ErrorKind::BootstrapTimeout,
        format!("Dependencies unavailable: {missing:?}"),
    ))
}

/// Canonicalize a policy decision label for the receipt.
fn canonicalize_decision(decision: &str) -> &'static str {
    match decision {
        "allow" | "pass" => "pass",
        "warn" => "warn",
        "soft_block" => "soft_block",
        // Unknown labels fail closed.
        _ => "hard_block",
    }
}

fn result_map(status: &str, rationale: &str, badges: Value) -> JsonMap {
    json!({
        "status": status,
        "rationale": rationale,
        "badges": badges,
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

fn actor_map(actor: &ActorBlock) -> JsonMap {
    json!({
        "actor_id": actor.actor_id,
        "actor_type": actor.actor_type,
        "session_id": actor.session_id,
        "provenance_signature": actor.provenance_signature,
        "salt_version": actor.salt_version,
        "monotonic_counter": actor.monotonic_counter,
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

fn policy_metadata_map(decision: &PolicyDecision) -> JsonMap {
    json!({
        "policy_version_ids": decision.policy_version_ids,
        "policy_snapshot_hash": decision.policy_snapshot_hash,
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_canonicalization_table() {
        assert_eq!(canonicalize_decision("allow"), "pass");
        assert_eq!(canonicalize_decision("pass"), "pass");
        assert_eq!(canonicalize_decision("warn"), "warn");
        assert_eq!(canonicalize_decision("soft_block"), "soft_block");
        assert_eq!(canonicalize_decision("deny"), "hard_block");
        assert_eq!(canonicalize_decision("hard_block"), "hard_block");
        assert_eq!(canonicalize_decision("something_new"), "hard_block");
    }

    #[test]
    fn mode_parses_known_values_only() {
        assert_eq!(Mode::from_str("edge").unwrap(), Mode::Edge);
        assert_eq!(Mode::from_str("backend").unwrap(), Mode::Backend);
        assert!(Mode::from_str("hybrid").is_err());
    }

    #[test]
    fn bootstrap_error_wraps_timeout_cause() {
        let err = bootstrap_error(&["identity".to_string()]);
        assert_eq!(err.kind(), ErrorKind::PolicyUnavailable);
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("identity"));
        assert!(source.to_string().contains("Dependencies unavailable"));
    }
}
