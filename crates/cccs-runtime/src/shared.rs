// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide shared state: the IO runtime, the instance registry, and
//! signal installation.
//!
//! The shared tokio runtime carries all adapter futures and the signal
//! listener; it is initialized lazily and lives for the rest of the
//! process. Runtimes register themselves by weak reference so a collected
//! instance never keeps the signal sweep alive.

use crate::RuntimeInner;
use std::sync::{Mutex, OnceLock, Weak};
use tracing::{info, warn};

/// The process-shared tokio runtime for adapter IO and signal handling.
pub(crate) fn shared_runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("cccs-io")
            .enable_all()
            .build()
            .expect("shared IO runtime construction cannot fail at process start")
    })
}

fn registry() -> &'static Mutex<Vec<Weak<RuntimeInner>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Weak<RuntimeInner>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

pub(crate) fn register_instance(inner: &std::sync::Arc<RuntimeInner>) {
    let mut instances = registry().lock().expect("instance registry poisoned");
    instances.retain(|weak| weak.strong_count() > 0);
    instances.push(std::sync::Arc::downgrade(inner));
}

pub(crate) fn deregister_instance(inner: &RuntimeInner) {
    let mut instances = registry().lock().expect("instance registry poisoned");
    instances.retain(|weak| match weak.upgrade() {
        Some(live) => !std::ptr::eq(live.as_ref(), inner),
        None => false,
    });
}

/// Shut down every live runtime in the process.
pub(crate) fn shutdown_all_instances() {
    let instances: Vec<_> = {
        let mut registry = registry().lock().expect("instance registry poisoned");
        let live: Vec<_> = registry.iter().filter_map(Weak::upgrade).collect();
        registry.clear();
        live
    };
    for instance in instances {
        instance.shutdown();
    }
}

/// Install SIGINT/SIGTERM listeners once per process.
///
/// The listener runs on the shared runtime and sweeps the instance
/// registry on each delivery. Registration goes through tokio's signal
/// driver, which layers on top of previously installed handlers rather
/// than replacing them.
pub(crate) fn install_signal_handlers() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        #[cfg(unix)]
        let _listener = shared_runtime().spawn(async {
            use tokio::signal::unix::{SignalKind, signal};
            let mut interrupt = match signal(SignalKind::interrupt()) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "sigint_hook_failed");
                    return;
                }
            };
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "sigterm_hook_failed");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = interrupt.recv() => info!(signal = "SIGINT", "shutdown_signal"),
                    _ = terminate.recv() => info!(signal = "SIGTERM", "shutdown_signal"),
                }
                shutdown_all_instances();
            }
        });
    });
}
