//! Shared fixtures for the integration tests: a scripted Zabbix JSON-RPC
//! responder and configuration builders.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate, matchers};
use zabsync::config::Settings;

/// Every JSON-RPC call observed by the fake server: `(method, params)`.
pub type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Minimal scripted Zabbix API. Dispatches on the JSON-RPC `method` field
/// and records every call.
pub struct FakeZabbix {
    /// Result of `host.get` without a name filter (the monitored-host
    /// fetch). Lookups by name during host enabling return no matches.
    pub hosts: Value,
    /// `(name, groupid)` pairs returned by `hostgroup.get`.
    pub groups: Vec<(String, String)>,
    /// `(host, templateid)` pairs returned by `template.get`.
    pub templates: Vec<(String, String)>,
    pub calls: CallLog,
}

impl FakeZabbix {
    pub async fn mount(self, server: &MockServer) {
        Mock::given(matchers::method("POST"))
            .respond_with(self)
            .mount(server)
            .await;
    }
}

impl Respond for FakeZabbix {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let method = body["method"].as_str().unwrap_or_default().to_string();
        let params = body["params"].clone();
        self.calls
            .lock()
            .unwrap()
            .push((method.clone(), params.clone()));

        let result = match method.as_str() {
            "user.login" => json!("fake-auth-token"),
            "host.get" => {
                if params.pointer("/filter/name").is_some_and(Value::is_string) {
                    json!([])
                } else {
                    self.hosts.clone()
                }
            }
            "host.create" => json!({ "hostids": ["7777"] }),
            "host.update" => json!({ "hostids": ["1"] }),
            "hostgroup.get" => {
                let filter = params.pointer("/filter/name").and_then(Value::as_str);
                let groups: Vec<Value> = self
                    .groups
                    .iter()
                    .filter(|(name, _)| filter.is_none_or(|wanted| wanted == name))
                    .map(|(name, groupid)| json!({ "name": name, "groupid": groupid }))
                    .collect();
                json!(groups)
            }
            "hostgroup.create" => json!({ "groupids": ["9999"] }),
            "template.get" => {
                let templates: Vec<Value> = self
                    .templates
                    .iter()
                    .map(|(host, templateid)| {
                        json!({ "host": host, "templateid": templateid })
                    })
                    .collect();
                json!(templates)
            }
            _ => Value::Null,
        };

        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": body["id"],
        }))
    }
}

pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls_with_method(calls: &CallLog, method: &str) -> Vec<Value> {
    calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(m, _)| m == method)
        .map(|(_, params)| params.clone())
        .collect()
}

/// Writes the three map files the reconcilers read on startup.
pub fn write_map_files(
    map_dir: &Path,
    property_template: &str,
    property_hostgroup: &str,
    siteadmin_hostgroup: &str,
) {
    std::fs::write(map_dir.join("property_template_map.txt"), property_template).unwrap();
    std::fs::write(map_dir.join("property_hostgroup_map.txt"), property_hostgroup).unwrap();
    std::fs::write(
        map_dir.join("siteadmin_hostgroup_map.txt"),
        siteadmin_hostgroup,
    )
    .unwrap();
}

pub struct SettingsBuilder {
    pub zabbix_url: String,
    pub map_dir: String,
    pub db_uri: String,
    pub dryrun: bool,
    pub failsafe: usize,
    pub health_file: Option<String>,
    pub failsafe_ok_file: Option<String>,
    pub failsafe_ok_file_strict: bool,
    pub extra_sections: String,
}

impl SettingsBuilder {
    pub fn new(zabbix_url: &str, map_dir: &Path) -> Self {
        SettingsBuilder {
            zabbix_url: zabbix_url.to_string(),
            map_dir: map_dir.display().to_string(),
            db_uri: ":memory:".to_string(),
            dryrun: false,
            failsafe: 20,
            health_file: None,
            failsafe_ok_file: None,
            failsafe_ok_file_strict: false,
            extra_sections: String::new(),
        }
    }

    pub fn build(&self) -> Settings {
        let mut zac_extras = String::new();
        if let Some(health_file) = &self.health_file {
            zac_extras.push_str(&format!("health_file = \"{health_file}\"\n"));
        }
        if let Some(ok_file) = &self.failsafe_ok_file {
            zac_extras.push_str(&format!("failsafe_ok_file = \"{ok_file}\"\n"));
        }
        if self.failsafe_ok_file_strict {
            zac_extras.push_str("failsafe_ok_file_strict = true\n");
        }

        let config = format!(
            r#"
[zac]
source_collector_dir = "collectors"
host_modifier_dir = "modifiers"
db_uri = "{db_uri}"
{zac_extras}

[zabbix]
map_dir = "{map_dir}"
url = "{url}"
username = "Admin"
password = "secret"
dryrun = {dryrun}
failsafe = {failsafe}

{extra}
"#,
            db_uri = self.db_uri,
            map_dir = self.map_dir,
            url = self.zabbix_url,
            dryrun = self.dryrun,
            failsafe = self.failsafe,
            extra = self.extra_sections,
        );
        toml::from_str(&config).unwrap()
    }
}
