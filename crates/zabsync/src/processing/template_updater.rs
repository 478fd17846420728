use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde_json::json;

use crate::config::Settings;
use crate::db::Store;
use crate::errcount::RollingErrorCounter;
use crate::error::ZabError;
use crate::models::Host;
use crate::zabbix::ZabbixHost;

use super::zabbix::{MANUAL_HOSTS_GROUP, UPDATE_INTERVAL, ZabbixConn};
use super::{DEFAULT_ERROR_TOLERANCE, DEFAULT_ERROR_WINDOW, StopToken, TICK, Ticker, WorkerState};

/// Reconciles linked templates for every managed Zabbix host from the
/// property to template map.
///
/// The managed set is the map's values intersected with the templates that
/// actually exist in Zabbix; templates outside it are never unlinked.
pub struct ZabbixTemplateUpdater {
    conn: ZabbixConn,
    state: WorkerState,
    errors: RollingErrorCounter,
}

impl ZabbixTemplateUpdater {
    pub async fn new(
        settings: &Settings,
        store: Store,
        state: WorkerState,
    ) -> Result<Self, ZabError> {
        let conn = ZabbixConn::connect(settings, store).await?;
        let errors = RollingErrorCounter::new(DEFAULT_ERROR_WINDOW, DEFAULT_ERROR_TOLERANCE)?;
        Ok(ZabbixTemplateUpdater {
            conn,
            state,
            errors,
        })
    }

    pub async fn run(mut self, stop: StopToken) {
        log::info!("Zabbix template updater starting");

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
                        "Zabbix template update done in {:.2}s",
                        started.elapsed().as_secs_f64()
                    );
                }
                Err(e) => {
                    log::error!("Unable to update Zabbix templates: {}", e);
                    self.errors.add();
                }
            }
            if self.errors.tolerance_exceeded() {
                log::error!("Zabbix template updater exceeded its error budget. Worker exiting");
                self.state.set_ok(false);
                return;
            }
        }

        log::info!("Zabbix template updater exiting");
    }

    /// One reconciliation tick.
    pub async fn work(&mut self) -> Result<(), ZabError> {
        let zabbix_templates: BTreeMap<String, String> = self
            .conn
            .api
            .template_get()
            .await?
            .into_iter()
            .map(|template| (template.host, template.templateid))
            .collect();

        // Templates that are not in Zabbix cannot be managed.
        let managed_template_names: BTreeSet<String> = self
            .conn
            .property_template_map
            .values()
            .flatten()
            .filter(|name| zabbix_templates.contains_key(*name))
            .cloned()
            .collect();

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

            self.sync_host(zabbix_host, db_host, &managed_template_names, &zabbix_templates)
                .await;
        }
        Ok(())
    }

    /// The templates this host should link, derived from its properties.
    fn synced_template_names(
        &self,
        db_host: &Host,
        zabbix_templates: &BTreeMap<String, String>,
    ) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for property in &db_host.properties {
            if let Some(templates) = self.conn.property_template_map.get(property) {
                names.extend(templates.iter().cloned());
            }
        }
        names.retain(|name| zabbix_templates.contains_key(name));
        names
    }

    async fn sync_host(
        &mut self,
        zabbix_host: &ZabbixHost,
        db_host: &Host,
        managed: &BTreeSet<String>,
        zabbix_templates: &BTreeMap<String, String>,
    ) {
        let synced = self.synced_template_names(db_host, zabbix_templates);

        let current: BTreeMap<String, String> = zabbix_host
            .parent_templates
            .iter()
            .map(|template| (template.host.clone(), template.templateid.clone()))
            .collect();
        let mut desired = current.clone();
        let mut to_remove = BTreeMap::new();

        for (name, templateid) in &current {
            if managed.contains(name) && !synced.contains(name) {
                log::info!(
                    "Going to remove template '{}' from host '{}'.",
                    name,
                    zabbix_host.host
                );
                to_remove.insert(name.clone(), templateid.clone());
                desired.remove(name);
            }
        }
        for name in &synced {
            if !desired.contains_key(name) {
                log::info!(
                    "Going to add template '{}' to host '{}'.",
                    name,
                    zabbix_host.host
                );
                desired.insert(name.clone(), zabbix_templates[name].clone());
            }
        }

        if desired != current {
            log::info!(
                "Updating templates on host '{}'. Old: {}. New: {}",
                zabbix_host.host,
                current.keys().cloned().collect::<Vec<_>>().join(", "),
                desired.keys().cloned().collect::<Vec<_>>().join(", ")
            );
            // Removal precedes addition so a template that is about to be
            // re-added is not left unlinked without clearing.
            if !to_remove.is_empty() {
                self.clear_templates(&to_remove, zabbix_host).await;
            }
            self.set_templates(&desired, zabbix_host).await;
        }
    }

    /// Unlinks and clears the given templates from the host.
    async fn clear_templates(
        &mut self,
        templates: &BTreeMap<String, String>,
        zabbix_host: &ZabbixHost,
    ) {
        log::debug!("Clearing templates on host: '{}'", zabbix_host.host);
        if self.conn.dryrun {
            return;
        }
        let templates: Vec<_> = templates
            .values()
            .map(|templateid| json!({ "templateid": templateid }))
            .collect();
        if let Err(e) = self
            .conn
            .api
            .host_update(json!({ "hostid": zabbix_host.hostid, "templates_clear": templates }))
            .await
        {
            log::error!(
                "Error when clearing templates on host '{}': {}",
                zabbix_host.host,
                e
            );
            self.errors.add();
        }
    }

    async fn set_templates(
        &mut self,
        templates: &BTreeMap<String, String>,
        zabbix_host: &ZabbixHost,
    ) {
        log::debug!("Setting templates on host: '{}'", zabbix_host.host);
        if self.conn.dryrun {
            return;
        }
        let templates: Vec<_> = templates
            .values()
            .map(|templateid| json!({ "templateid": templateid }))
            .collect();
        if let Err(e) = self
            .conn
            .api
            .host_update(json!({ "hostid": zabbix_host.hostid, "templates": templates }))
            .await
        {
            log::error!(
                "Error when setting templates on host '{}': {}",
                zabbix_host.host,
                e
            );
            self.errors.add();
        }
    }
}
