use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ZabError;
use crate::utils;

/// A monitoring endpoint on a host. At most one interface per `type` is
/// allowed on a single host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(rename = "type")]
    pub kind: i32,
    pub endpoint: String,
    /// Ports can be macros, so they are strings.
    pub port: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl Interface {
    fn validate(&self) -> Result<(), ZabError> {
        if self.kind == 2 && self.details.is_empty() {
            return Err(ZabError::Validation(
                "interface of type 2 must have details set".to_string(),
            ));
        }
        if self.details.get("useip").map(String::as_str) == Some("1")
            && !utils::is_valid_ip(&self.endpoint)
        {
            return Err(ZabError::Validation(format!(
                "interface endpoint '{}' is not a valid IP address",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// Canonical view of one monitored host.
///
/// All set-like fields use ordered containers so that two hosts built from
/// the same inputs serialize to identical JSON. That equality is what the
/// store uses to decide between `equal` and `replaced` on upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    pub enabled: bool,
    #[serde(default)]
    pub importance: Option<u32>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub inventory: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: BTreeSet<String>,
    #[serde(default)]
    pub siteadmins: BTreeSet<String>,
    #[serde(default)]
    pub sources: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<(String, String)>,
    #[serde(default)]
    pub proxy_pattern: Option<String>,
}

impl Host {
    pub fn new(hostname: impl Into<String>) -> Self {
        Host {
            hostname: hostname.into(),
            enabled: false,
            importance: None,
            interfaces: Vec::new(),
            inventory: BTreeMap::new(),
            properties: BTreeSet::new(),
            siteadmins: BTreeSet::new(),
            sources: BTreeSet::new(),
            tags: BTreeSet::new(),
            proxy_pattern: None,
        }
    }

    /// Checks the invariants a host must satisfy before it enters the
    /// pipeline.
    pub fn validate(&self) -> Result<(), ZabError> {
        if self.hostname.trim().is_empty() {
            return Err(ZabError::Validation("hostname must not be empty".to_string()));
        }
        if let Some(pattern) = &self.proxy_pattern {
            if !utils::is_valid_regexp(pattern) {
                return Err(ZabError::Validation(format!(
                    "proxy_pattern {:?} is not a valid regular expression",
                    pattern
                )));
            }
        }
        let mut seen_types = BTreeSet::new();
        for interface in &self.interfaces {
            interface.validate()?;
            if !seen_types.insert(interface.kind) {
                return Err(ZabError::Validation(format!(
                    "duplicate interface type {}",
                    interface.kind
                )));
            }
        }
        Ok(())
    }

    /// Sorts interfaces by type. Other fields keep themselves ordered.
    pub fn normalize(&mut self) {
        self.interfaces.sort_by_key(|interface| interface.kind);
    }

    /// The stable JSON rendering persisted in the store.
    pub fn canonical_json(&self) -> Result<String, ZabError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Merge `other` into this host. The current hostname is kept even if
    /// they do not match.
    pub fn merge(&mut self, other: Host) {
        self.enabled = self.enabled || other.enabled;
        self.properties.extend(other.properties);
        self.siteadmins.extend(other.siteadmins);
        self.sources.extend(other.sources);
        self.tags.extend(other.tags);

        self.importance = match (self.importance, other.importance) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let known_types: BTreeSet<i32> =
            self.interfaces.iter().map(|interface| interface.kind).collect();
        for interface in other.interfaces {
            if known_types.contains(&interface.kind) {
                log::warn!(
                    "Merging host with an interface of the same type. The other interface is ignored. Host: {}, type: {}",
                    self.hostname,
                    interface.kind
                );
            } else {
                self.interfaces.push(interface);
            }
        }
        self.interfaces.sort_by_key(|interface| interface.kind);

        for (key, value) in other.inventory {
            match self.inventory.get(&key) {
                Some(existing) if *existing != value => {
                    log::warn!(
                        "Same inventory key '{}' set multiple times for host '{}'",
                        key,
                        self.hostname
                    );
                }
                Some(_) => {}
                None => {
                    self.inventory.insert(key, value);
                }
            }
        }

        self.proxy_pattern = match (self.proxy_pattern.take(), other.proxy_pattern) {
            (Some(a), Some(b)) if a != b => {
                log::warn!(
                    "Multiple proxy patterns are provided. Keeping the lexicographically smallest. Host: {}",
                    self.hostname
                );
                Some(a.min(b))
            }
            (a, b) => a.or(b),
        };
    }
}

/// One batch of hosts collected from one source, in flight on its queue.
#[derive(Debug, Clone)]
pub struct SourceHosts {
    pub source: String,
    pub hosts: Vec<Host>,
}
