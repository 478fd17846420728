use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Settings, SourceCollectorSettings};
use crate::error::ZabError;
use crate::models::Host;

pub mod builtin;

/// A named provider of host records.
#[async_trait]
pub trait SourceCollector: Send + Sync {
    fn name(&self) -> &str;
    async fn collect(&self) -> Result<Vec<Host>, ZabError>;
}

/// Constructor for a modern collector: source name, its settings, and the
/// full application settings.
pub type CollectorCtor =
    fn(&str, &SourceCollectorSettings, &Settings) -> Result<Box<dyn SourceCollector>, ZabError>;

/// A legacy collector is a bare function taking its settings as a map.
pub type LegacyCollectFn =
    fn(&BTreeMap<String, toml::Value>) -> Result<Vec<Host>, ZabError>;

/// How a registry entry is invoked. The entry itself declares its shape;
/// there is no runtime introspection.
#[derive(Clone, Copy)]
enum CollectorEntry {
    Modern(CollectorCtor),
    Legacy(LegacyCollectFn),
}

/// Compiled-in collector strategies, selected by `module_name`.
pub struct CollectorRegistry {
    entries: BTreeMap<String, CollectorEntry>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        CollectorRegistry {
            entries: BTreeMap::new(),
        }
    }

    /// A registry with every built-in strategy registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_modern("file", builtin::file_collector);
        registry.register_modern("exec", builtin::exec_collector);
        registry.register_legacy("static", builtin::static_collect);
        registry
    }

    pub fn register_modern(&mut self, name: &str, ctor: CollectorCtor) {
        self.entries
            .insert(name.to_string(), CollectorEntry::Modern(ctor));
    }

    pub fn register_legacy(&mut self, name: &str, collect: LegacyCollectFn) {
        self.entries
            .insert(name.to_string(), CollectorEntry::Legacy(collect));
    }

    /// Resolves every configured source to a ready-to-invoke collector, in
    /// stable configuration order. A failing entry is logged and skipped;
    /// it never aborts the loader.
    pub fn load(&self, settings: &Settings) -> Vec<Arc<dyn SourceCollector>> {
        let mut collectors: Vec<Arc<dyn SourceCollector>> = Vec::new();
        for (source_name, collector_settings) in &settings.source_collectors {
            let Some(entry) = self.entries.get(&collector_settings.module_name) else {
                log::error!(
                    "Unable to find source collector named '{}' for source '{}'",
                    collector_settings.module_name,
                    source_name
                );
                continue;
            };
            match *entry {
                CollectorEntry::Modern(ctor) => {
                    match ctor(source_name, collector_settings, settings) {
                        Ok(collector) => {
                            log::debug!("Loaded source collector: {}", source_name);
                            collectors.push(Arc::from(collector));
                        }
                        Err(e) => {
                            log::error!(
                                "Unable to construct source collector '{}': {}",
                                source_name,
                                e
                            );
                        }
                    }
                }
                CollectorEntry::Legacy(collect) => {
                    log::warn!(
                        "Module '{}' is a legacy source collector module, which is deprecated. Please update the module to the new API.",
                        collector_settings.module_name
                    );
                    collectors.push(Arc::new(LegacyCollectorCompat {
                        name: source_name.clone(),
                        settings: collector_settings.extra.clone(),
                        collect,
                    }));
                }
            }
        }
        log::info!(
            "Loaded {} source collectors: {}",
            collectors.len(),
            collectors
                .iter()
                .map(|c| format!("'{}'", c.name()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        collectors
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Adapter presenting a legacy collect function as a `SourceCollector`.
struct LegacyCollectorCompat {
    name: String,
    settings: BTreeMap<String, toml::Value>,
    collect: LegacyCollectFn,
}

#[async_trait]
impl SourceCollector for LegacyCollectorCompat {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Vec<Host>, ZabError> {
        (self.collect)(&self.settings)
    }
}
