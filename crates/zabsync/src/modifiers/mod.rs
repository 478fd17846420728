use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{HostModifierSettings, Settings};
use crate::error::ZabError;
use crate::models::Host;

pub mod builtin;

/// Rewrites merged hosts before they reach the `hosts` table. Each call
/// receives its own owned host; returning an error (or panicking) leaves
/// the working host unchanged.
#[async_trait]
pub trait HostModifier: Send + Sync {
    fn name(&self) -> &str;
    async fn modify(&self, host: Host) -> Result<Host, ZabError>;
}

/// Constructor for a modern modifier: configured name, its settings, and
/// the full application settings.
pub type ModifierCtor =
    fn(&str, &HostModifierSettings, &Settings) -> Result<Box<dyn HostModifier>, ZabError>;

/// A legacy modifier is a bare function taking the host plus its settings
/// as a map.
pub type LegacyModifyFn =
    fn(Host, &BTreeMap<String, toml::Value>) -> Result<Host, ZabError>;

#[derive(Clone, Copy)]
enum ModifierEntry {
    Modern(ModifierCtor),
    Legacy(LegacyModifyFn),
}

/// Compiled-in modifier strategies, selected by `module_name` (defaulting
/// to the configuration key).
pub struct ModifierRegistry {
    entries: BTreeMap<String, ModifierEntry>,
}

impl ModifierRegistry {
    pub fn new() -> Self {
        ModifierRegistry {
            entries: BTreeMap::new(),
        }
    }

    /// A registry with every built-in strategy registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_modern("exec", builtin::exec_modifier);
        registry.register_legacy("add_property", builtin::add_property);
        registry
    }

    pub fn register_modern(&mut self, name: &str, ctor: ModifierCtor) {
        self.entries
            .insert(name.to_string(), ModifierEntry::Modern(ctor));
    }

    pub fn register_legacy(&mut self, name: &str, modify: LegacyModifyFn) {
        self.entries
            .insert(name.to_string(), ModifierEntry::Legacy(modify));
    }

    /// Resolves every configured modifier, in stable configuration order.
    /// A failing entry is logged and skipped; it never aborts the loader.
    pub fn load(&self, settings: &Settings) -> Vec<Arc<dyn HostModifier>> {
        let mut modifiers: Vec<Arc<dyn HostModifier>> = Vec::new();
        for (modifier_name, modifier_settings) in &settings.host_modifiers {
            let module_name = modifier_settings
                .module_name
                .as_deref()
                .unwrap_or(modifier_name);
            let Some(entry) = self.entries.get(module_name) else {
                log::error!(
                    "Unable to find host modifier named '{}' for '{}'",
                    module_name,
                    modifier_name
                );
                continue;
            };
            match *entry {
                ModifierEntry::Modern(ctor) => {
                    match ctor(modifier_name, modifier_settings, settings) {
                        Ok(modifier) => {
                            log::debug!("Loaded host modifier: {}", modifier_name);
                            modifiers.push(Arc::from(modifier));
                        }
                        Err(e) => {
                            log::error!(
                                "Unable to construct host modifier '{}': {}",
                                modifier_name,
                                e
                            );
                        }
                    }
                }
                ModifierEntry::Legacy(modify) => {
                    log::warn!(
                        "Module '{}' is a legacy host modifier module. Legacy support is deprecated and will be removed in a future version.",
                        module_name
                    );
                    modifiers.push(Arc::new(LegacyModifierCompat {
                        name: modifier_name.clone(),
                        settings: modifier_settings.extra.clone(),
                        modify,
                    }));
                }
            }
        }
        log::info!(
            "Loaded {} host modifiers: {}",
            modifiers.len(),
            modifiers
                .iter()
                .map(|m| format!("'{}'", m.name()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        modifiers
    }
}

impl Default for ModifierRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Adapter presenting a legacy modify function as a `HostModifier`.
struct LegacyModifierCompat {
    name: String,
    settings: BTreeMap<String, toml::Value>,
    modify: LegacyModifyFn,
}

#[async_trait]
impl HostModifier for LegacyModifierCompat {
    fn name(&self) -> &str {
        &self.name
    }

    async fn modify(&self, host: Host) -> Result<Host, ZabError> {
        (self.modify)(host, &self.settings)
    }
}
