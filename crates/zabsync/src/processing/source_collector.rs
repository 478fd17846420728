use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::collectors::SourceCollector;
use crate::config::SourceCollectorSettings;
use crate::errcount::RollingErrorCounter;
use crate::error::ZabError;
use crate::models::{Host, SourceHosts};

use super::{StopToken, TICK, Ticker, WorkerState, guarded};

/// One worker per configured source: periodically invokes the collector,
/// validates the result, and enqueues the batch on this source's queue.
///
/// The queue is bounded to one batch. A full queue blocks the worker, which
/// is the backpressure signal that the handler has fallen behind.
pub struct SourceCollectorWorker {
    collector: Arc<dyn SourceCollector>,
    settings: SourceCollectorSettings,
    queue: mpsc::Sender<SourceHosts>,
    state: WorkerState,
    errors: RollingErrorCounter,
}

impl SourceCollectorWorker {
    pub fn new(
        collector: Arc<dyn SourceCollector>,
        settings: SourceCollectorSettings,
        queue: mpsc::Sender<SourceHosts>,
        state: WorkerState,
    ) -> Result<Self, ZabError> {
        let errors = RollingErrorCounter::new(settings.error_window(), settings.error_tolerance)?;
        Ok(SourceCollectorWorker {
            collector,
            settings,
            queue,
            state,
            errors,
        })
    }

    pub async fn run(mut self, stop: StopToken) {
        let name = self.collector.name().to_string();
        log::info!("Source collector '{}' starting", name);

        let mut ticker = Ticker::new(self.settings.update_interval());
        while !stop.is_stopped() {
            if !ticker.due() {
                tokio::time::sleep(TICK).await;
                continue;
            }

            let started = Instant::now();
            let hosts = match guarded(&name, self.collector.collect()).await {
                Ok(hosts) => hosts,
                Err(e) => {
                    log::warn!("Error when collecting hosts from source <{}>: {}", name, e);
                    self.errors.add();
                    if self.errors.tolerance_exceeded() {
                        log::error!(
                            "Source collector '{}' exceeded its error budget. Worker exiting",
                            name
                        );
                        self.state.set_ok(false);
                        return;
                    }
                    continue;
                }
            };

            let valid_hosts = validate_hosts(&name, hosts);
            let collected = valid_hosts.len();
            let batch = SourceHosts {
                source: name.clone(),
                hosts: valid_hosts,
            };

            tokio::select! {
                sent = self.queue.send(batch) => {
                    if sent.is_err() {
                        log::error!("Source queue for '{}' is closed. Worker exiting", name);
                        self.state.set_ok(false);
                        return;
                    }
                }
                _ = stop.wait() => break,
            }

            log::info!(
                "Collected hosts ({}) from source <{}> in {:.2}s",
                collected,
                name,
                started.elapsed().as_secs_f64()
            );
        }

        log::info!("Source collector '{}' exiting", name);
    }
}

/// Stamps each host with its source, normalizes it, and drops hosts that
/// fail validation with a warning.
fn validate_hosts(source: &str, hosts: Vec<Host>) -> Vec<Host> {
    hosts
        .into_iter()
        .filter_map(|mut host| {
            host.sources = BTreeSet::from([source.to_string()]);
            host.normalize();
            match host.validate() {
                Ok(()) => Some(host),
                Err(e) => {
                    log::warn!(
                        "Host <{}> from source <{}> is invalid: {}",
                        host.hostname,
                        source,
                        e
                    );
                    None
                }
            }
        })
        .collect()
}
