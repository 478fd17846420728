//! The long-running workers that make up the pipeline, plus the shared
//! scheduling and failure-isolation primitives they are built from.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;

use crate::error::ZabError;

pub mod host_updater;
pub mod hostgroup_updater;
pub mod source_collector;
pub mod source_handler;
pub mod source_merger;
pub mod template_updater;
pub mod zabbix;

/// How often idle workers re-check their deadline and the stop flag.
pub(crate) const TICK: Duration = Duration::from_secs(1);

/// Error budget for workers without per-source configuration.
pub(crate) const DEFAULT_ERROR_WINDOW: Duration = Duration::from_secs(300);
pub(crate) const DEFAULT_ERROR_TOLERANCE: u32 = 5;

/// Process-wide stop flag. Set once, observed by every worker loop at
/// least once per second.
#[derive(Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set.
    pub async fn wait(&self) {
        while !self.is_stopped() {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

/// Health flag a worker flips before exiting abnormally. Shared with the
/// supervisor, which folds it into the health snapshot.
#[derive(Clone)]
pub struct WorkerState {
    ok: Arc<AtomicBool>,
}

impl WorkerState {
    pub fn new() -> Self {
        WorkerState {
            ok: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_ok(&self, ok: bool) {
        self.ok.store(ok, Ordering::SeqCst);
    }

    pub fn is_ok(&self) -> bool {
        self.ok.load(Ordering::SeqCst)
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline scheduler for periodic work: `due()` returns true at most once
/// per interval and re-arms itself.
pub struct Ticker {
    interval: Duration,
    next_update: Option<Instant>,
}

impl Ticker {
    /// Due immediately, then every `interval`.
    pub fn new(interval: Duration) -> Self {
        Ticker {
            interval,
            next_update: None,
        }
    }

    /// First due after `delay`, then every `interval`.
    pub fn with_first_delay(interval: Duration, delay: Duration) -> Self {
        Ticker {
            interval,
            next_update: Some(Instant::now() + delay),
        }
    }

    pub fn due(&mut self) -> bool {
        let now = Instant::now();
        match self.next_update {
            Some(next) if next > now => false,
            _ => {
                self.next_update = Some(now + self.interval);
                true
            }
        }
    }
}

/// Runs a future from plugin code, converting panics into plugin errors so
/// user-provided code crashing mid-flight cannot take down the worker.
pub(crate) async fn guarded<T, F>(name: &str, fut: F) -> Result<T, ZabError>
where
    F: Future<Output = Result<T, ZabError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic in plugin code".to_string());
            Err(ZabError::Plugin {
                name: name.to_string(),
                reason,
            })
        }
    }
}
