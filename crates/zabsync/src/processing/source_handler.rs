use std::time::Instant;

use tokio::sync::mpsc;

use crate::db::Store;
use crate::errcount::RollingErrorCounter;
use crate::error::ZabError;
use crate::models::SourceHosts;

use super::{DEFAULT_ERROR_TOLERANCE, DEFAULT_ERROR_WINDOW, StopToken, TICK, WorkerState};

/// Single consumer over all source queues; upserts each batch into
/// `hosts_source` inside one transaction per batch.
pub struct SourceHandlerWorker {
    store: Store,
    queues: Vec<mpsc::Receiver<SourceHosts>>,
    state: WorkerState,
    errors: RollingErrorCounter,
}

impl SourceHandlerWorker {
    pub fn new(
        store: Store,
        queues: Vec<mpsc::Receiver<SourceHosts>>,
        state: WorkerState,
    ) -> Result<Self, ZabError> {
        let errors = RollingErrorCounter::new(DEFAULT_ERROR_WINDOW, DEFAULT_ERROR_TOLERANCE)?;
        Ok(SourceHandlerWorker {
            store,
            queues,
            state,
            errors,
        })
    }

    pub async fn run(mut self, stop: StopToken) {
        log::info!("Source handler starting");

        while !stop.is_stopped() {
            let mut handled = false;
            for index in 0..self.queues.len() {
                let Ok(batch) = self.queues[index].try_recv() else {
                    continue;
                };
                handled = true;
                self.handle_source_hosts(batch).await;
                if self.errors.tolerance_exceeded() {
                    log::error!("Source handler exceeded its error budget. Worker exiting");
                    self.state.set_ok(false);
                    return;
                }
            }
            if !handled {
                tokio::time::sleep(TICK).await;
            }
        }

        log::info!("Source handler exiting");
    }

    async fn handle_source_hosts(&mut self, batch: SourceHosts) {
        let started = Instant::now();
        match self
            .store
            .apply_source_batch(&batch.source, &batch.hosts)
            .await
        {
            Ok(counters) => {
                log::info!(
                    "Handled hosts from source <{}> in {:.2}s. {}",
                    batch.source,
                    started.elapsed().as_secs_f64(),
                    counters
                );
            }
            Err(e) => {
                log::error!(
                    "Unable to handle hosts from source <{}>: {}",
                    batch.source,
                    e
                );
                self.errors.add();
            }
        }
    }
}
