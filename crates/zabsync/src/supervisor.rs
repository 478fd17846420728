//! Starts every worker, watches their liveness, reacts to termination
//! signals, and writes the health snapshot.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collectors::CollectorRegistry;
use crate::config::Settings;
use crate::db::Store;
use crate::error::ZabError;
use crate::health::{HealthReport, ProcessHealth, QueueHealth, write_health};
use crate::models::SourceHosts;
use crate::modifiers::ModifierRegistry;
use crate::processing::host_updater::ZabbixHostUpdater;
use crate::processing::hostgroup_updater::ZabbixHostgroupUpdater;
use crate::processing::source_collector::SourceCollectorWorker;
use crate::processing::source_handler::SourceHandlerWorker;
use crate::processing::source_merger::SourceMergerWorker;
use crate::processing::template_updater::ZabbixTemplateUpdater;
use crate::processing::{StopToken, TICK, WorkerState};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

struct WorkerHandle {
    name: String,
    state: WorkerState,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    fn spawn<F>(name: &str, state: WorkerState, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        WorkerHandle {
            name: name.to_string(),
            state,
            handle: tokio::spawn(fut),
        }
    }

    fn alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Runs the daemon until a termination signal arrives or a worker dies.
///
/// Worker construction happens up front; a structural failure (database
/// unreachable, API login refused, unreadable map file) aborts startup with
/// an error and a non-zero exit at the binary boundary.
pub async fn run(
    settings: Settings,
    collector_registry: &CollectorRegistry,
    modifier_registry: &ModifierRegistry,
) -> Result<(), ZabError> {
    let stop = StopToken::new();
    let store = Store::connect(&settings.zac.db_uri).await?;

    let collectors = collector_registry.load(&settings);
    let modifiers = modifier_registry.load(&settings);

    let mut workers: Vec<WorkerHandle> = Vec::new();
    let mut queues: Vec<mpsc::Sender<SourceHosts>> = Vec::new();
    let mut receivers: Vec<mpsc::Receiver<SourceHosts>> = Vec::new();

    for collector in &collectors {
        let collector_settings = settings
            .source_collectors
            .get(collector.name())
            .cloned()
            .ok_or_else(|| {
                ZabError::Config(format!(
                    "no configuration for source collector '{}'",
                    collector.name()
                ))
            })?;
        let (tx, rx) = mpsc::channel(1);
        queues.push(tx.clone());
        receivers.push(rx);

        let state = WorkerState::new();
        let worker =
            SourceCollectorWorker::new(collector.clone(), collector_settings, tx, state.clone())?;
        workers.push(WorkerHandle::spawn(
            &format!("source-collector-{}", collector.name()),
            state,
            worker.run(stop.clone()),
        ));
    }

    let state = WorkerState::new();
    let handler = SourceHandlerWorker::new(store.clone(), receivers, state.clone())?;
    workers.push(WorkerHandle::spawn(
        "source-handler",
        state,
        handler.run(stop.clone()),
    ));

    let state = WorkerState::new();
    let merger = SourceMergerWorker::new(
        store.clone(),
        modifiers,
        state.clone(),
        settings.max_collector_interval(),
    )?;
    workers.push(WorkerHandle::spawn(
        "source-merger",
        state,
        merger.run(stop.clone()),
    ));

    let state = WorkerState::new();
    let host_updater = ZabbixHostUpdater::new(&settings, store.clone(), state.clone()).await?;
    workers.push(WorkerHandle::spawn(
        "zabbix-host-updater",
        state,
        host_updater.run(stop.clone()),
    ));

    let state = WorkerState::new();
    let hostgroup_updater =
        ZabbixHostgroupUpdater::new(&settings, store.clone(), state.clone()).await?;
    workers.push(WorkerHandle::spawn(
        "zabbix-hostgroup-updater",
        state,
        hostgroup_updater.run(stop.clone()),
    ));

    let state = WorkerState::new();
    let template_updater =
        ZabbixTemplateUpdater::new(&settings, store.clone(), state.clone()).await?;
    workers.push(WorkerHandle::spawn(
        "zabbix-template-updater",
        state,
        template_updater.run(stop.clone()),
    ));

    log::info!("Supervising {} workers", workers.len());
    spawn_signal_listener(stop.clone());

    let mut next_status = Instant::now();
    while !stop.is_stopped() {
        if next_status <= Instant::now() {
            if let Some(health_file) = &settings.zac.health_file {
                let report = health_report(&workers, &queues, settings.zabbix.failsafe);
                if let Err(e) = write_health(health_file, &report) {
                    log::error!("Unable to write health file: {}", e);
                }
            }
            log_worker_status(&workers);
            next_status = Instant::now() + STATUS_INTERVAL;
        }

        let dead: Vec<&str> = workers
            .iter()
            .filter(|worker| !worker.alive())
            .map(|worker| worker.name.as_str())
            .collect();
        if !dead.is_empty() {
            log::error!("A worker has died: {}. Exiting", dead.join(", "));
            stop.stop();
            break;
        }

        tokio::time::sleep(TICK).await;
    }
    stop.stop();

    for worker in &mut workers {
        log::info!("Waiting for: {}", worker.name);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut worker.handle)
            .await
            .is_err()
        {
            log::warn!("Worker hanging. Aborting: {}", worker.name);
            worker.handle.abort();
        }
    }

    log::info!("Daemon exit");
    Ok(())
}

fn health_report(
    workers: &[WorkerHandle],
    queues: &[mpsc::Sender<SourceHosts>],
    failsafe: usize,
) -> HealthReport {
    let processes: Vec<ProcessHealth> = workers
        .iter()
        .map(|worker| ProcessHealth {
            name: worker.name.clone(),
            alive: worker.alive(),
            ok: worker.state.is_ok(),
        })
        .collect();
    let queues: Vec<QueueHealth> = queues
        .iter()
        .map(|queue| QueueHealth {
            size: queue.max_capacity() - queue.capacity(),
        })
        .collect();
    let all_ok = processes.iter().all(|process| process.alive && process.ok);
    HealthReport::new(all_ok, processes, queues, failsafe)
}

fn log_worker_status(workers: &[WorkerHandle]) {
    let statuses: Vec<String> = workers
        .iter()
        .map(|worker| {
            format!(
                "{} is {}",
                worker.name,
                if worker.alive() { "alive" } else { "dead" }
            )
        })
        .collect();
    log::info!("Worker status: {}", statuses.join(", "));
}

#[cfg(unix)]
fn spawn_signal_listener(stop: StopToken) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let sigint = signal(SignalKind::interrupt());
        let sigterm = signal(SignalKind::terminate());
        let (Ok(mut sigint), Ok(mut sigterm)) = (sigint, sigterm) else {
            log::error!("Unable to install signal handlers");
            return;
        };
        tokio::select! {
            _ = sigint.recv() => log::info!("Received signal: SIGINT"),
            _ = sigterm.recv() => log::info!("Received signal: SIGTERM"),
        }
        stop.stop();
    });
}

#[cfg(not(unix))]
fn spawn_signal_listener(stop: StopToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received interrupt");
        }
        stop.stop();
    });
}
