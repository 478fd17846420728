//! Built-in modifier strategies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::config::{HostModifierSettings, Settings};
use crate::error::ZabError;
use crate::models::Host;

use super::HostModifier;

/// Pipes the host through an external command: host JSON on stdin, modified
/// host JSON on stdout.
pub fn exec_modifier(
    name: &str,
    settings: &HostModifierSettings,
    app: &Settings,
) -> Result<Box<dyn HostModifier>, ZabError> {
    let command = settings
        .extra
        .get("command")
        .and_then(toml::Value::as_str)
        .ok_or_else(|| {
            ZabError::Config(format!("modifier '{}' requires a 'command' setting", name))
        })?;
    let command = Path::new(command);
    let command = if command.is_absolute() {
        command.to_path_buf()
    } else {
        app.zac.host_modifier_dir.join(command)
    };
    Ok(Box::new(ExecModifier {
        name: name.to_string(),
        command,
    }))
}

struct ExecModifier {
    name: String,
    command: PathBuf,
}

#[async_trait]
impl HostModifier for ExecModifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn modify(&self, host: Host) -> Result<Host, ZabError> {
        let fail = |reason: String| ZabError::Plugin {
            name: self.name.clone(),
            reason,
        };

        let mut child = tokio::process::Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| fail(format!("unable to spawn {}: {}", self.command.display(), e)))?;

        let input = serde_json::to_vec(&host)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| fail(format!("unable to write host: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| fail(format!("command failed: {}", e)))?;
        if !output.status.success() {
            return Err(fail(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Legacy modifier adding `property` to hosts whose hostname equals
/// `hostname`.
pub fn add_property(
    mut host: Host,
    settings: &BTreeMap<String, toml::Value>,
) -> Result<Host, ZabError> {
    let target = settings
        .get("hostname")
        .and_then(toml::Value::as_str)
        .ok_or_else(|| {
            ZabError::Config("modifier 'add_property' requires a 'hostname' setting".to_string())
        })?;
    let property = settings
        .get("property")
        .and_then(toml::Value::as_str)
        .ok_or_else(|| {
            ZabError::Config("modifier 'add_property' requires a 'property' setting".to_string())
        })?;
    if host.hostname == target {
        host.properties.insert(property.to_string());
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_property_settings() -> BTreeMap<String, toml::Value> {
        [
            (
                "hostname".to_string(),
                toml::Value::String("bar.example.com".to_string()),
            ),
            (
                "property".to_string(),
                toml::Value::String("barry".to_string()),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn add_property_only_touches_the_target_host() {
        let settings = add_property_settings();

        let modified = add_property(Host::new("bar.example.com"), &settings).unwrap();
        assert!(modified.properties.contains("barry"));

        let untouched = add_property(Host::new("foo.example.com"), &settings).unwrap();
        assert!(untouched.properties.is_empty());
    }

    #[test]
    fn add_property_requires_its_settings() {
        let settings = BTreeMap::new();
        assert!(add_property(Host::new("bar.example.com"), &settings).is_err());
    }
}
