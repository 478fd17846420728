use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Instant;

use serde_json::{Value, json};

use crate::config::Settings;
use crate::db::Store;
use crate::errcount::RollingErrorCounter;
use crate::error::ZabError;
use crate::models::Host;
use crate::zabbix::{ZabbixHost, ZabbixTag};

use super::zabbix::{
    ALL_HOSTS_GROUP, DISABLED_HOSTS_GROUP, UPDATE_INTERVAL, ZabbixConn, partition_manual,
};
use super::{DEFAULT_ERROR_TOLERANCE, DEFAULT_ERROR_WINDOW, StopToken, TICK, Ticker, WorkerState};

/// Reconciles which hosts exist and are monitored in Zabbix against the
/// enabled rows of the `hosts` table.
///
/// Destructive ticks are capped by the failsafe: when more hosts would be
/// added or disabled than the configured limit, the tick aborts unless the
/// operator has placed the failsafe OK file.
pub struct ZabbixHostUpdater {
    conn: ZabbixConn,
    failsafe_ok_file: Option<PathBuf>,
    failsafe_ok_file_strict: bool,
    state: WorkerState,
    errors: RollingErrorCounter,
}

impl ZabbixHostUpdater {
    pub async fn new(
        settings: &Settings,
        store: Store,
        state: WorkerState,
    ) -> Result<Self, ZabError> {
        let conn = ZabbixConn::connect(settings, store).await?;
        let errors = RollingErrorCounter::new(DEFAULT_ERROR_WINDOW, DEFAULT_ERROR_TOLERANCE)?;
        Ok(ZabbixHostUpdater {
            conn,
            failsafe_ok_file: settings.zac.failsafe_ok_file.clone(),
            failsafe_ok_file_strict: settings.zac.failsafe_ok_file_strict,
            state,
            errors,
        })
    }

    pub async fn run(mut self, stop: StopToken) {
        log::info!("Zabbix host updater starting");

        let mut ticker = Ticker::new(UPDATE_INTERVAL);
        while !stop.is_stopped() {
            if !ticker.due() {
                tokio::time::sleep(TICK).await;
                continue;
            }

            let started = Instant::now();
            match self.work().await {
                Ok(()) => {
                    log::info!(
                        "Zabbix host update done in {:.2}s",
                        started.elapsed().as_secs_f64()
                    );
                }
                Err(e) => {
                    log::error!("Unable to update Zabbix hosts: {}", e);
                    self.errors.add();
                }
            }
            if self.errors.tolerance_exceeded() {
                log::error!("Zabbix host updater exceeded its error budget. Worker exiting");
                self.state.set_ok(false);
                return;
            }
        }

        log::info!("Zabbix host updater exiting");
    }

    /// One reconciliation tick.
    pub async fn work(&mut self) -> Result<(), ZabError> {
        let db_hosts = self.conn.enabled_hosts_by_name().await?;
        let zabbix_hosts = self.conn.monitored_hosts().await?;
        let (managed, manual) = partition_manual(zabbix_hosts);

        let db_hostnames: BTreeSet<&str> = db_hosts.keys().map(String::as_str).collect();
        let zabbix_hostnames: BTreeSet<&str> =
            managed.iter().map(|host| host.host.as_str()).collect();

        let to_remove: Vec<&ZabbixHost> = managed
            .iter()
            .filter(|host| !db_hostnames.contains(host.host.as_str()))
            .collect();
        let to_add: Vec<&Host> = db_hosts
            .values()
            .filter(|host| !zabbix_hostnames.contains(host.hostname.as_str()))
            .collect();
        let in_both = db_hostnames.intersection(&zabbix_hostnames).count();

        log::info!("Manual hosts in Zabbix: {}", manual.len());
        log::info!("Only in Zabbix: {}", to_remove.len());
        log::info!("Only in db: {}", to_add.len());
        log::info!("In both: {}", in_both);

        if to_remove.len() > self.conn.failsafe || to_add.len() > self.conn.failsafe {
            log::warn!(
                "Too many hosts to change (failsafe={}). Remove: {}, Add: {}. Aborting",
                self.conn.failsafe,
                to_remove.len(),
                to_add.len()
            );
            if !self.consume_failsafe_ok_file() {
                return Ok(());
            }
        }

        for zabbix_host in to_remove {
            self.disable_host(zabbix_host).await;
        }
        for db_host in to_add {
            self.enable_host(db_host).await;
        }
        Ok(())
    }

    /// Returns true when the operator has acknowledged an oversized change
    /// batch by placing the OK file. The file is consumed on use.
    fn consume_failsafe_ok_file(&self) -> bool {
        let Some(path) = &self.failsafe_ok_file else {
            return false;
        };
        if let Err(e) = std::fs::read(path) {
            if path.exists() {
                log::warn!("Failsafe OK file {} is unreadable: {}", path.display(), e);
            }
            return false;
        }
        log::info!("Failsafe OK file found. Proceeding with changes");
        if let Err(e) = std::fs::remove_file(path) {
            if self.failsafe_ok_file_strict {
                log::error!(
                    "Unable to delete failsafe OK file {}: {}. Aborting",
                    path.display(),
                    e
                );
                return false;
            }
            log::warn!(
                "Unable to delete failsafe OK file {}: {}. Proceeding anyway",
                path.display(),
                e
            );
        }
        true
    }

    async fn disable_host(&mut self, zabbix_host: &ZabbixHost) {
        if self.conn.dryrun {
            log::info!(
                "DRYRUN: Disabling host: '{}' ({})",
                zabbix_host.host,
                zabbix_host.hostid
            );
            return;
        }

        let result = self.do_disable_host(zabbix_host).await;
        match result {
            Ok(()) => {
                log::info!(
                    "Disabling host: '{}' ({})",
                    zabbix_host.host,
                    zabbix_host.hostid
                );
            }
            Err(e) => {
                log::error!(
                    "Error when disabling host '{}' ({}): {}",
                    zabbix_host.host,
                    zabbix_host.hostid,
                    e
                );
                self.errors.add();
            }
        }
    }

    async fn do_disable_host(&self, zabbix_host: &ZabbixHost) -> Result<(), ZabError> {
        let groupid = self.groupid_of(DISABLED_HOSTS_GROUP).await?;
        self.conn
            .api
            .host_update(json!({
                "hostid": zabbix_host.hostid,
                "status": 1,
                "templates": [],
                "groups": [{ "groupid": groupid }],
            }))
            .await
    }

    async fn enable_host(&mut self, db_host: &Host) {
        if self.conn.dryrun {
            log::info!("DRYRUN: Enabling host: '{}'", db_host.hostname);
            return;
        }

        let result = self.do_enable_host(db_host).await;
        match result {
            Ok(()) => {}
            Err(e) => {
                log::error!(
                    "Error when enabling/creating host '{}': {}",
                    db_host.hostname,
                    e
                );
                self.errors.add();
            }
        }
    }

    async fn do_enable_host(&self, db_host: &Host) -> Result<(), ZabError> {
        let groupid = self.groupid_of(ALL_HOSTS_GROUP).await?;
        let existing = self
            .conn
            .api
            .host_get(json!({ "filter": { "name": db_host.hostname } }))
            .await?;

        if let Some(host) = existing.first() {
            self.conn
                .api
                .host_update(json!({
                    "hostid": host.hostid,
                    "status": 0,
                    "groups": [{ "groupid": groupid }],
                }))
                .await?;
            log::info!("Enabling old host: '{}' ({})", host.host, host.hostid);
        } else {
            let mut params = json!({
                "host": db_host.hostname,
                "status": 0,
                "groups": [{ "groupid": groupid }],
                "interfaces": [{
                    "dns": db_host.hostname,
                    "ip": "",
                    "useip": 0,
                    "type": 1,
                    "port": "10050",
                    "main": 1,
                }],
            });
            if let Some(tags) = self.create_tags(db_host) {
                params["tags"] = tags;
            }
            if let Some(inventory) = self.create_inventory(db_host) {
                params["inventory"] = inventory;
            }
            let hostid = self.conn.api.host_create(params).await?;
            log::info!("Enabling new host: '{}' ({})", db_host.hostname, hostid);
        }
        Ok(())
    }

    /// The host's tags in the Zabbix wire shape, each key carrying the
    /// configured prefix that marks it as owned by the daemon.
    fn create_tags(&self, db_host: &Host) -> Option<Value> {
        if db_host.tags.is_empty() {
            return None;
        }
        let tags: Vec<ZabbixTag> = db_host
            .tags
            .iter()
            .map(|(tag, value)| ZabbixTag {
                tag: format!("{}{}", self.conn.tags_prefix, tag),
                value: value.clone(),
            })
            .collect();
        serde_json::to_value(tags).ok()
    }

    /// The host's inventory restricted to the managed keys.
    fn create_inventory(&self, db_host: &Host) -> Option<Value> {
        let inventory: BTreeMap<&String, &String> = db_host
            .inventory
            .iter()
            .filter(|(key, _)| self.conn.managed_inventory.contains(key))
            .collect();
        if inventory.is_empty() {
            return None;
        }
        serde_json::to_value(inventory).ok()
    }

    async fn groupid_of(&self, name: &str) -> Result<String, ZabError> {
        let groups = self.conn.api.hostgroup_get_by_name(name).await?;
        groups
            .first()
            .map(|group| group.groupid.clone())
            .ok_or_else(|| ZabError::Api {
                method: "hostgroup.get".to_string(),
                message: format!("host group '{}' not found", name),
            })
    }
}
