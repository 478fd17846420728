use serde::{Deserialize, Serialize};

/// A host as returned by `host.get`.
#[derive(Debug, Clone, Deserialize)]
pub struct ZabbixHost {
    pub hostid: String,
    pub host: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub groups: Vec<ZabbixGroup>,
    #[serde(default, rename = "parentTemplates")]
    pub parent_templates: Vec<ZabbixTemplate>,
}

impl ZabbixHost {
    pub fn in_group(&self, name: &str) -> bool {
        self.groups.iter().any(|group| group.name == name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZabbixGroup {
    pub groupid: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZabbixTemplate {
    pub templateid: String,
    pub host: String,
}

/// A host tag in the Zabbix wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct ZabbixTag {
    pub tag: String,
    pub value: String,
}
