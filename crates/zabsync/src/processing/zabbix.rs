//! Shared plumbing for the three Zabbix reconcilers.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;

use crate::config::Settings;
use crate::db::Store;
use crate::error::ZabError;
use crate::models::Host;
use crate::utils::{self, MapFile};
use crate::zabbix::{ZabbixApi, ZabbixHost};

pub const UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Hosts in this group are manual: the reconcilers never touch them.
pub const MANUAL_HOSTS_GROUP: &str = "All-manual-hosts";
/// Every managed host is a member of this group.
pub const ALL_HOSTS_GROUP: &str = "All-hosts";
/// Hosts disabled by the reconciler are parked here.
pub const DISABLED_HOSTS_GROUP: &str = "All-auto-disabled-hosts";
/// Per-source groups are named `Source-{source}`.
pub const SOURCE_GROUP_PREFIX: &str = "Source-";

/// A logged-in API client, the store, and the parsed map files, shared by
/// each reconciler worker.
pub struct ZabbixConn {
    pub api: ZabbixApi,
    pub store: Store,
    pub dryrun: bool,
    pub failsafe: usize,
    pub tags_prefix: String,
    pub managed_inventory: Vec<String>,
    pub property_template_map: MapFile,
    pub property_hostgroup_map: MapFile,
    pub siteadmin_hostgroup_map: MapFile,
}

impl ZabbixConn {
    /// Reads the map files and logs in. Failure here is structural: the
    /// worker cannot start and the daemon treats it as fatal.
    pub async fn connect(settings: &Settings, store: Store) -> Result<Self, ZabError> {
        let map_dir = &settings.zabbix.map_dir;
        let property_template_map =
            utils::read_map_file(&map_dir.join("property_template_map.txt"))?;
        let property_hostgroup_map =
            utils::read_map_file(&map_dir.join("property_hostgroup_map.txt"))?;
        let siteadmin_hostgroup_map =
            utils::read_map_file(&map_dir.join("siteadmin_hostgroup_map.txt"))?;

        let mut api = ZabbixApi::new(&settings.zabbix.url)?;
        api.login(&settings.zabbix.username, &settings.zabbix.password)
            .await?;

        Ok(ZabbixConn {
            api,
            store,
            dryrun: settings.zabbix.dryrun,
            failsafe: settings.zabbix.failsafe,
            tags_prefix: settings.zabbix.tags_prefix.clone(),
            managed_inventory: settings.zabbix.managed_inventory.clone(),
            property_template_map,
            property_hostgroup_map,
            siteadmin_hostgroup_map,
        })
    }

    /// Monitored, non-discovered hosts with their groups and templates.
    pub async fn monitored_hosts(&self) -> Result<Vec<ZabbixHost>, ZabError> {
        self.api
            .host_get(json!({
                "filter": { "status": 0, "flags": 0 },
                "output": ["hostid", "host", "status", "flags"],
                "selectGroups": ["groupid", "name"],
                "selectParentTemplates": ["templateid", "host"],
            }))
            .await
    }

    /// Enabled merged hosts, keyed by hostname.
    pub async fn enabled_hosts_by_name(&self) -> Result<BTreeMap<String, Host>, ZabError> {
        let hosts = self.store.enabled_hosts().await?;
        Ok(hosts
            .into_iter()
            .map(|host| (host.hostname.clone(), host))
            .collect())
    }
}

/// Splits Zabbix hosts into (managed, manual) by membership in
/// `All-manual-hosts`.
pub fn partition_manual(hosts: Vec<ZabbixHost>) -> (Vec<ZabbixHost>, Vec<ZabbixHost>) {
    hosts
        .into_iter()
        .partition(|host| !host.in_group(MANUAL_HOSTS_GROUP))
}
