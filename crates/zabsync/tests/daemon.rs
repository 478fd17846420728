//! Whole-daemon test: a collector that fails on every tick exhausts its
//! error budget, the worker dies, and the supervisor shuts the daemon down.

use std::time::Duration;

use serde_json::json;
use wiremock::MockServer;
use zabsync::collectors::{CollectorRegistry, SourceCollector};
use zabsync::config::{Settings, SourceCollectorSettings};
use zabsync::error::ZabError;
use zabsync::models::Host;
use zabsync::modifiers::ModifierRegistry;

mod common;
use common::{FakeZabbix, SettingsBuilder, new_call_log, write_map_files};

struct AlwaysFails {
    name: String,
}

#[async_trait::async_trait]
impl SourceCollector for AlwaysFails {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Vec<Host>, ZabError> {
        Err(ZabError::Plugin {
            name: self.name.clone(),
            reason: "upstream unreachable".to_string(),
        })
    }
}

fn always_fails(
    name: &str,
    _settings: &SourceCollectorSettings,
    _app: &Settings,
) -> Result<Box<dyn SourceCollector>, ZabError> {
    Ok(Box::new(AlwaysFails {
        name: name.to_string(),
    }))
}

#[tokio::test]
async fn daemon_shuts_down_when_a_worker_exhausts_its_budget() {
    let server = MockServer::start().await;
    FakeZabbix {
        hosts: json!([]),
        groups: vec![("All-hosts".to_string(), "2".to_string())],
        templates: Vec::new(),
        calls: new_call_log(),
    }
    .mount(&server)
    .await;

    let dir = tempfile::tempdir().unwrap();
    write_map_files(dir.path(), "", "", "");
    let health_file = dir.path().join("health.json");

    let mut builder = SettingsBuilder::new(&server.uri(), dir.path());
    builder.dryrun = true;
    builder.db_uri = dir.path().join("zabsync.db").display().to_string();
    builder.health_file = Some(health_file.display().to_string());
    builder.extra_sections = r#"
[source_collectors.doomed]
module_name = "always-fails"
update_interval = 0
error_tolerance = 5
error_duration = 60
"#
    .to_string();
    let settings = builder.build();

    let mut collectors = CollectorRegistry::builtin();
    collectors.register_modern("always-fails", always_fails);
    let modifiers = ModifierRegistry::builtin();

    // The collector fails six times within the window almost immediately,
    // exits, and the supervisor tears everything down on its own.
    tokio::time::timeout(
        Duration::from_secs(60),
        zabsync::supervisor::run(settings, &collectors, &modifiers),
    )
    .await
    .expect("supervisor shuts down without external signals")
    .unwrap();

    let health: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&health_file).unwrap()).unwrap();
    assert!(health["pid"].as_u64().unwrap() > 0);
    assert_eq!(health["failsafe"], 20);
    let processes = health["processes"].as_array().unwrap();
    // One collector plus handler, merger, and the three reconcilers.
    assert_eq!(processes.len(), 6);
    assert!(
        processes
            .iter()
            .any(|p| p["name"] == "source-collector-doomed")
    );
    assert_eq!(health["queues"].as_array().unwrap().len(), 1);
}
