use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde_json::json;

use crate::config::Settings;
use crate::db::Store;
use crate::errcount::RollingErrorCounter;
use crate::error::ZabError;
use crate::models::Host;
use crate::zabbix::ZabbixHost;

use super::zabbix::{
    ALL_HOSTS_GROUP, MANUAL_HOSTS_GROUP, SOURCE_GROUP_PREFIX, UPDATE_INTERVAL, ZabbixConn,
};
use super::{DEFAULT_ERROR_TOLERANCE, DEFAULT_ERROR_WINDOW, StopToken, TICK, Ticker, WorkerState};

/// Reconciles host-group membership for every managed Zabbix host from the
/// host's properties, siteadmins, and sources.
///
/// The managed set is the union of both map files' values, the existing
/// `Source-*` groups, and `All-hosts`; groups outside it are never removed
/// from a host.
pub struct ZabbixHostgroupUpdater {
    conn: ZabbixConn,
    state: WorkerState,
    errors: RollingErrorCounter,
}

impl ZabbixHostgroupUpdater {
    pub async fn new(
        settings: &Settings,
        store: Store,
        state: WorkerState,
    ) -> Result<Self, ZabError> {
        let conn = ZabbixConn::connect(settings, store).await?;
        let errors = RollingErrorCounter::new(DEFAULT_ERROR_WINDOW, DEFAULT_ERROR_TOLERANCE)?;
        Ok(ZabbixHostgroupUpdater {
            conn,
            state,
            errors,
        })
    }

    pub async fn run(mut self, stop: StopToken) {
        log::info!("Zabbix hostgroup updater starting");

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
                        "Zabbix hostgroup update done in {:.2}s",
                        started.elapsed().as_secs_f64()
                    );
                }
                Err(e) => {
                    log::error!("Unable to update Zabbix hostgroups: {}", e);
                    self.errors.add();
                }
            }
            if self.errors.tolerance_exceeded() {
                log::error!("Zabbix hostgroup updater exceeded its error budget. Worker exiting");
                self.state.set_ok(false);
                return;
            }
        }

        log::info!("Zabbix hostgroup updater exiting");
    }

    /// One reconciliation tick.
    pub async fn work(&mut self) -> Result<(), ZabError> {
        let mut managed_hostgroup_names: BTreeSet<String> = self
            .conn
            .property_hostgroup_map
            .values()
            .chain(self.conn.siteadmin_hostgroup_map.values())
            .flatten()
            .cloned()
            .collect();

        let mut zabbix_hostgroups: BTreeMap<String, String> = BTreeMap::new();
        for group in self.conn.api.hostgroup_get().await? {
            if group.name.starts_with(SOURCE_GROUP_PREFIX) {
                managed_hostgroup_names.insert(group.name.clone());
            }
            zabbix_hostgroups.insert(group.name, group.groupid);
        }
        managed_hostgroup_names.insert(ALL_HOSTS_GROUP.to_string());

        let db_hosts = self.conn.enabled_hosts_by_name().await?;
        let zabbix_hosts = self.conn.monitored_hosts().await?;

        for zabbix_host in &zabbix_hosts {
            if zabbix_host.in_group(MANUAL_HOSTS_GROUP) {
                log::debug!(
                    "Skipping manual host: '{}' ({})",
                    zabbix_host.host,
                    zabbix_host.hostid
                );
                continue;
            }
            let Some(db_host) = db_hosts.get(&zabbix_host.host) else {
                log::debug!(
                    "Skipping host (it is not enabled in the database): '{}' ({})",
                    zabbix_host.host,
                    zabbix_host.hostid
                );
                continue;
            };

            self.sync_host(
                zabbix_host,
                db_host,
                &managed_hostgroup_names,
                &mut zabbix_hostgroups,
            )
            .await;
        }
        Ok(())
    }

    /// The groups this host should be in, derived from its properties,
    /// siteadmins, and sources.
    fn synced_hostgroup_names(&self, db_host: &Host) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = BTreeSet::from([ALL_HOSTS_GROUP.to_string()]);
        for property in &db_host.properties {
            if let Some(groups) = self.conn.property_hostgroup_map.get(property) {
                names.extend(groups.iter().cloned());
            }
        }
        for siteadmin in &db_host.siteadmins {
            if let Some(groups) = self.conn.siteadmin_hostgroup_map.get(siteadmin) {
                names.extend(groups.iter().cloned());
            }
        }
        for source in &db_host.sources {
            names.insert(format!("{}{}", SOURCE_GROUP_PREFIX, source));
        }
        names
    }

    async fn sync_host(
        &mut self,
        zabbix_host: &ZabbixHost,
        db_host: &Host,
        managed: &BTreeSet<String>,
        zabbix_hostgroups: &mut BTreeMap<String, String>,
    ) {
        let synced = self.synced_hostgroup_names(db_host);

        let current: BTreeMap<String, String> = zabbix_host
            .groups
            .iter()
            .map(|group| (group.name.clone(), group.groupid.clone()))
            .collect();
        let mut desired = current.clone();

        for name in current.keys() {
            if managed.contains(name) && !synced.contains(name) {
                log::info!(
                    "Going to remove hostgroup '{}' from host '{}'.",
                    name,
                    zabbix_host.host
                );
                desired.remove(name);
            }
        }
        for name in &synced {
            if !desired.contains_key(name) {
                log::info!(
                    "Going to add hostgroup '{}' to host '{}'.",
                    name,
                    zabbix_host.host
                );
                let groupid = match zabbix_hostgroups.get(name) {
                    Some(groupid) => groupid.clone(),
                    None => match self.create_hostgroup(name).await {
                        Ok(groupid) => {
                            zabbix_hostgroups.insert(name.clone(), groupid.clone());
                            groupid
                        }
                        Err(e) => {
                            log::error!("Error when creating hostgroup '{}': {}", name, e);
                            self.errors.add();
                            continue;
                        }
                    },
                };
                desired.insert(name.clone(), groupid);
            }
        }

        if desired != current {
            log::info!(
                "Updating hostgroups on host '{}'. Old: {}. New: {}",
                zabbix_host.host,
                current.keys().cloned().collect::<Vec<_>>().join(", "),
                desired.keys().cloned().collect::<Vec<_>>().join(", ")
            );
            self.set_hostgroups(zabbix_host, &desired).await;
        }
    }

    async fn create_hostgroup(&self, name: &str) -> Result<String, ZabError> {
        if self.conn.dryrun {
            log::info!("DRYRUN: Creating hostgroup: '{}'", name);
            return Ok("-1".to_string());
        }
        let groupid = self.conn.api.hostgroup_create(name).await?;
        log::info!("Created hostgroup: '{}' ({})", name, groupid);
        Ok(groupid)
    }

    async fn set_hostgroups(
        &mut self,
        zabbix_host: &ZabbixHost,
        hostgroups: &BTreeMap<String, String>,
    ) {
        log::debug!("Setting hostgroups on host: '{}'", zabbix_host.host);
        if self.conn.dryrun {
            return;
        }
        let groups: Vec<_> = hostgroups
            .values()
            .map(|groupid| json!({ "groupid": groupid }))
            .collect();
        if let Err(e) = self
            .conn
            .api
            .host_update(json!({ "hostid": zabbix_host.hostid, "groups": groups }))
            .await
        {
            log::error!(
                "Error when setting hostgroups on host '{}': {}",
                zabbix_host.host,
                e
            );
            self.errors.add();
        }
    }
}
