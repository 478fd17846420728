use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::{BatchCounters, Store};
use crate::errcount::RollingErrorCounter;
use crate::error::ZabError;
use crate::models::Host;
use crate::modifiers::HostModifier;

use super::{DEFAULT_ERROR_TOLERANCE, DEFAULT_ERROR_WINDOW, StopToken, TICK, Ticker, WorkerState, guarded};

const UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Folds the per-source rows into canonical hosts, runs the modifier
/// chain, and upserts the result into `hosts`.
pub struct SourceMergerWorker {
    store: Store,
    modifiers: Vec<Arc<dyn HostModifier>>,
    state: WorkerState,
    errors: RollingErrorCounter,
    /// Delay before the first merge, sized to the slowest collector so the
    /// first tick does not run against a half-populated `hosts_source`.
    first_delay: Duration,
}

impl SourceMergerWorker {
    pub fn new(
        store: Store,
        modifiers: Vec<Arc<dyn HostModifier>>,
        state: WorkerState,
        first_delay: Duration,
    ) -> Result<Self, ZabError> {
        let errors = RollingErrorCounter::new(DEFAULT_ERROR_WINDOW, DEFAULT_ERROR_TOLERANCE)?;
        Ok(SourceMergerWorker {
            store,
            modifiers,
            state,
            errors,
            first_delay,
        })
    }

    pub async fn run(mut self, stop: StopToken) {
        log::info!("Source merger starting");

        let mut ticker = Ticker::with_first_delay(UPDATE_INTERVAL, self.first_delay);
        while !stop.is_stopped() {
            if !ticker.due() {
                tokio::time::sleep(TICK).await;
                continue;
            }

            let started = Instant::now();
            match self.merge_sources().await {
                Ok(counters) => {
                    log::info!(
                        "Merged sources in {:.2}s. {}",
                        started.elapsed().as_secs_f64(),
                        counters
                    );
                }
                Err(e) => {
                    log::error!("Unable to merge sources: {}", e);
                    self.errors.add();
                }
            }
            if self.errors.tolerance_exceeded() {
                log::error!("Source merger exceeded its error budget. Worker exiting");
                self.state.set_ok(false);
                return;
            }
        }

        log::info!("Source merger exiting");
    }

    /// One merge tick. Reads first, then applies every change in a single
    /// transaction.
    pub async fn merge_sources(&mut self) -> Result<BatchCounters, ZabError> {
        let hostnames = self.store.all_source_hostnames().await?;
        let snapshot: BTreeSet<String> = hostnames.iter().cloned().collect();

        let mut merged = Vec::with_capacity(hostnames.len());
        for hostname in &hostnames {
            let rows = self.store.source_rows_for_hostname(hostname).await?;
            let Some(host) = merge_rows(rows) else {
                continue;
            };
            let host = self.apply_modifiers(host).await;
            merged.push(host);
        }

        self.store.apply_merged(&merged, &snapshot).await
    }

    /// Runs the ordered modifier chain. Each modifier gets its own owned
    /// copy; a failing modifier leaves the working host unchanged, as does
    /// one that renames the host or returns an invalid one.
    async fn apply_modifiers(&mut self, host: Host) -> Host {
        let mut working = host;
        for modifier in &self.modifiers {
            match guarded(modifier.name(), modifier.modify(working.clone())).await {
                Ok(modified) => {
                    if modified.hostname != working.hostname {
                        log::warn!(
                            "Host modifier '{}' changed the hostname of '{}'. Ignoring its result",
                            modifier.name(),
                            working.hostname
                        );
                        self.errors.add();
                    } else if let Err(e) = modified.validate() {
                        log::warn!(
                            "Host modifier '{}' produced an invalid host '{}': {}. Ignoring its result",
                            modifier.name(),
                            working.hostname,
                            e
                        );
                        self.errors.add();
                    } else {
                        working = modified;
                    }
                }
                Err(e) => {
                    log::warn!(
                        "Host modifier '{}' failed for host '{}': {}",
                        modifier.name(),
                        working.hostname,
                        e
                    );
                    self.errors.add();
                }
            }
        }
        working
    }
}

/// Left-to-right fold over rows already sorted by `(source, hostname)`.
fn merge_rows(rows: Vec<Host>) -> Option<Host> {
    let mut rows = rows.into_iter();
    let mut merged = rows.next()?;
    for row in rows {
        merged.merge(row);
    }
    Some(merged)
}
