//! Built-in collector strategies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::config::{Settings, SourceCollectorSettings};
use crate::error::ZabError;
use crate::models::Host;

use super::SourceCollector;

fn required_str(
    settings: &BTreeMap<String, toml::Value>,
    key: &str,
    module: &str,
) -> Result<String, ZabError> {
    settings
        .get(key)
        .and_then(toml::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ZabError::Config(format!("collector '{}' requires a '{}' setting", module, key))
        })
}

fn resolve(dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Reads a JSON array of hosts from a file.
pub fn file_collector(
    name: &str,
    settings: &SourceCollectorSettings,
    app: &Settings,
) -> Result<Box<dyn SourceCollector>, ZabError> {
    let filename = required_str(&settings.extra, "filename", "file")?;
    Ok(Box::new(FileCollector {
        name: name.to_string(),
        path: resolve(&app.zac.source_collector_dir, &filename),
    }))
}

struct FileCollector {
    name: String,
    path: PathBuf,
}

#[async_trait]
impl SourceCollector for FileCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Vec<Host>, ZabError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ZabError::Plugin {
                name: self.name.clone(),
                reason: format!("unable to read {}: {}", self.path.display(), e),
            }
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Runs an external command: the settings map goes to its stdin as JSON, a
/// JSON array of hosts is expected on its stdout.
pub fn exec_collector(
    name: &str,
    settings: &SourceCollectorSettings,
    app: &Settings,
) -> Result<Box<dyn SourceCollector>, ZabError> {
    let command = required_str(&settings.extra, "command", "exec")?;
    Ok(Box::new(ExecCollector {
        name: name.to_string(),
        command: resolve(&app.zac.source_collector_dir, &command),
        settings: settings.extra.clone(),
    }))
}

struct ExecCollector {
    name: String,
    command: PathBuf,
    settings: BTreeMap<String, toml::Value>,
}

#[async_trait]
impl SourceCollector for ExecCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Vec<Host>, ZabError> {
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

        let input = serde_json::to_vec(&self.settings)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| fail(format!("unable to write settings: {}", e)))?;
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

/// Legacy collector returning hosts declared inline in the configuration.
pub fn static_collect(
    settings: &BTreeMap<String, toml::Value>,
) -> Result<Vec<Host>, ZabError> {
    let hosts = settings.get("hosts").cloned().ok_or_else(|| {
        ZabError::Config("collector 'static' requires a 'hosts' setting".to_string())
    })?;
    hosts
        .try_into()
        .map_err(|e| ZabError::Config(format!("invalid 'hosts' setting: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_collect_parses_inline_hosts() {
        let doc = r#"
[[hosts]]
hostname = "foo.example.com"
enabled = true
properties = ["pizza"]

[[hosts]]
hostname = "bar.example.com"
enabled = false
"#;
        let table: toml::Table = toml::from_str(doc).unwrap();
        let settings: BTreeMap<String, toml::Value> = table.into_iter().collect();
        let hosts = static_collect(&settings).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].hostname, "foo.example.com");
        assert!(hosts[0].properties.contains("pizza"));
        assert!(!hosts[1].enabled);
    }

    #[test]
    fn static_collect_requires_hosts() {
        let settings = BTreeMap::new();
        assert!(static_collect(&settings).is_err());
    }
}
