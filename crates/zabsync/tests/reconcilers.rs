//! Reconciler scenarios against a scripted Zabbix JSON-RPC server.

use std::collections::BTreeSet;

use serde_json::json;
use wiremock::MockServer;
use zabsync::db::Store;
use zabsync::models::Host;
use zabsync::processing::WorkerState;
use zabsync::processing::host_updater::ZabbixHostUpdater;
use zabsync::processing::hostgroup_updater::ZabbixHostgroupUpdater;
use zabsync::processing::template_updater::ZabbixTemplateUpdater;

mod common;
use common::{FakeZabbix, SettingsBuilder, calls_with_method, new_call_log, write_map_files};

fn enabled_host(hostname: &str) -> Host {
    let mut host = Host::new(hostname);
    host.enabled = true;
    host.sources.insert("src1".to_string());
    host
}

async fn seed_enabled_hosts(store: &Store, hosts: &[Host]) {
    let snapshot: BTreeSet<String> =
        hosts.iter().map(|host| host.hostname.clone()).collect();
    store.apply_merged(hosts, &snapshot).await.unwrap();
}

fn standard_groups() -> Vec<(String, String)> {
    vec![
        ("All-hosts".to_string(), "2".to_string()),
        ("All-auto-disabled-hosts".to_string(), "3".to_string()),
    ]
}

#[tokio::test]
async fn failsafe_breach_performs_no_mutations() {
    let server = MockServer::start().await;
    let calls = new_call_log();
    FakeZabbix {
        hosts: json!([]),
        groups: standard_groups(),
        templates: Vec::new(),
        calls: calls.clone(),
    }
    .mount(&server)
    .await;

    let map_dir = tempfile::tempdir().unwrap();
    write_map_files(map_dir.path(), "", "", "");

    let store = Store::connect(":memory:").await.unwrap();
    let hosts: Vec<Host> = (0..30)
        .map(|i| enabled_host(&format!("host{i:02}.example.com")))
        .collect();
    seed_enabled_hosts(&store, &hosts).await;

    let settings = SettingsBuilder::new(&server.uri(), map_dir.path()).build();
    let mut updater = ZabbixHostUpdater::new(&settings, store, WorkerState::new())
        .await
        .unwrap();
    updater.work().await.unwrap();

    // 30 hosts to add > failsafe of 20 and no OK file: the tick aborts
    // before any mutation.
    assert!(calls_with_method(&calls, "host.create").is_empty());
    assert!(calls_with_method(&calls, "host.update").is_empty());
}

#[tokio::test]
async fn failsafe_ok_file_is_consumed_and_changes_proceed() {
    let server = MockServer::start().await;
    let calls = new_call_log();
    FakeZabbix {
        hosts: json!([]),
        groups: standard_groups(),
        templates: Vec::new(),
        calls: calls.clone(),
    }
    .mount(&server)
    .await;

    let map_dir = tempfile::tempdir().unwrap();
    write_map_files(map_dir.path(), "", "", "");
    let ok_file = map_dir.path().join("failsafe-ok");
    std::fs::write(&ok_file, "").unwrap();

    let store = Store::connect(":memory:").await.unwrap();
    let hosts: Vec<Host> = (0..30)
        .map(|i| enabled_host(&format!("host{i:02}.example.com")))
        .collect();
    seed_enabled_hosts(&store, &hosts).await;

    let mut builder = SettingsBuilder::new(&server.uri(), map_dir.path());
    builder.failsafe_ok_file = Some(ok_file.display().to_string());
    let settings = builder.build();

    let mut updater = ZabbixHostUpdater::new(&settings, store, WorkerState::new())
        .await
        .unwrap();
    updater.work().await.unwrap();

    assert_eq!(calls_with_method(&calls, "host.create").len(), 30);
    assert!(!ok_file.exists(), "the OK file is consumed on use");
}

#[tokio::test]
async fn created_hosts_carry_default_interface_tags_and_managed_inventory() {
    let server = MockServer::start().await;
    let calls = new_call_log();
    FakeZabbix {
        hosts: json!([]),
        groups: standard_groups(),
        templates: Vec::new(),
        calls: calls.clone(),
    }
    .mount(&server)
    .await;

    let map_dir = tempfile::tempdir().unwrap();
    write_map_files(map_dir.path(), "", "", "");

    let store = Store::connect(":memory:").await.unwrap();
    let mut host = enabled_host("tagged.example.com");
    host.tags.insert(("env".to_string(), "prod".to_string()));
    host.inventory
        .insert("location".to_string(), "basement".to_string());
    host.inventory
        .insert("notes".to_string(), "unmanaged".to_string());
    seed_enabled_hosts(&store, std::slice::from_ref(&host)).await;

    let mut builder = SettingsBuilder::new(&server.uri(), map_dir.path());
    builder.extra_sections = String::new();
    let mut settings = builder.build();
    settings.zabbix.managed_inventory = vec!["location".to_string()];

    let mut updater = ZabbixHostUpdater::new(&settings, store, WorkerState::new())
        .await
        .unwrap();
    updater.work().await.unwrap();

    let creates = calls_with_method(&calls, "host.create");
    assert_eq!(creates.len(), 1);
    let params = &creates[0];
    assert_eq!(params["host"], "tagged.example.com");
    assert_eq!(params["interfaces"][0]["type"], 1);
    assert_eq!(params["interfaces"][0]["port"], "10050");
    assert_eq!(params["interfaces"][0]["dns"], "tagged.example.com");
    assert_eq!(params["interfaces"][0]["useip"], 0);
    assert_eq!(params["tags"][0]["tag"], "zac_env");
    assert_eq!(params["tags"][0]["value"], "prod");
    assert_eq!(params["inventory"]["location"], "basement");
    assert!(params["inventory"].get("notes").is_none());
}

#[tokio::test]
async fn stale_managed_host_is_disabled_and_parked() {
    let server = MockServer::start().await;
    let calls = new_call_log();
    FakeZabbix {
        hosts: json!([
            {
                "hostid": "101",
                "host": "stale.example.com",
                "status": "0",
                "flags": "0",
                "groups": [{ "groupid": "2", "name": "All-hosts" }],
            },
            {
                "hostid": "102",
                "host": "manual.example.com",
                "status": "0",
                "flags": "0",
                "groups": [{ "groupid": "9", "name": "All-manual-hosts" }],
            },
        ]),
        groups: standard_groups(),
        templates: Vec::new(),
        calls: calls.clone(),
    }
    .mount(&server)
    .await;

    let map_dir = tempfile::tempdir().unwrap();
    write_map_files(map_dir.path(), "", "", "");

    let store = Store::connect(":memory:").await.unwrap();
    let settings = SettingsBuilder::new(&server.uri(), map_dir.path()).build();
    let mut updater = ZabbixHostUpdater::new(&settings, store, WorkerState::new())
        .await
        .unwrap();
    updater.work().await.unwrap();

    // Only the managed host is disabled; the manual one is left alone.
    let updates = calls_with_method(&calls, "host.update");
    assert_eq!(updates.len(), 1);
    let params = &updates[0];
    assert_eq!(params["hostid"], "101");
    assert_eq!(params["status"], 1);
    assert_eq!(params["templates"], json!([]));
    assert_eq!(params["groups"], json!([{ "groupid": "3" }]));
}

#[tokio::test]
async fn template_reconciler_unlinks_only_managed_templates() {
    let server = MockServer::start().await;
    let calls = new_call_log();
    FakeZabbix {
        hosts: json!([
            {
                "hostid": "101",
                "host": "foo.example.com",
                "status": "0",
                "flags": "0",
                "groups": [{ "groupid": "2", "name": "All-hosts" }],
                "parentTemplates": [
                    { "templateid": "100", "host": "T_a" },
                    { "templateid": "200", "host": "T_b" },
                    { "templateid": "300", "host": "T_custom" },
                ],
            },
        ]),
        groups: standard_groups(),
        templates: vec![
            ("T_a".to_string(), "100".to_string()),
            ("T_b".to_string(), "200".to_string()),
            ("T_custom".to_string(), "300".to_string()),
        ],
        calls: calls.clone(),
    }
    .mount(&server)
    .await;

    let map_dir = tempfile::tempdir().unwrap();
    write_map_files(map_dir.path(), "P1:T_a\nP2:T_b\n", "", "");

    let store = Store::connect(":memory:").await.unwrap();
    let mut host = enabled_host("foo.example.com");
    host.properties.insert("P1".to_string());
    seed_enabled_hosts(&store, &[host]).await;

    let settings = SettingsBuilder::new(&server.uri(), map_dir.path()).build();
    let mut updater = ZabbixTemplateUpdater::new(&settings, store, WorkerState::new())
        .await
        .unwrap();
    updater.work().await.unwrap();

    let updates = calls_with_method(&calls, "host.update");
    // First the removal (unlink-and-clear), then the full new set.
    assert_eq!(updates.len(), 2);
    assert_eq!(
        updates[0]["templates_clear"],
        json!([{ "templateid": "200" }])
    );
    let linked = updates[1]["templates"].as_array().unwrap();
    let linked_ids: BTreeSet<&str> = linked
        .iter()
        .filter_map(|t| t["templateid"].as_str())
        .collect();
    // T_a stays, T_b is gone, and the unmanaged T_custom is untouched.
    assert_eq!(linked_ids, BTreeSet::from(["100", "300"]));
}

#[tokio::test]
async fn hostgroup_reconciler_respects_the_managed_set() {
    let server = MockServer::start().await;
    let calls = new_call_log();
    FakeZabbix {
        hosts: json!([
            {
                "hostid": "101",
                "host": "foo.example.com",
                "status": "0",
                "flags": "0",
                "groups": [
                    { "groupid": "2", "name": "All-hosts" },
                    { "groupid": "50", "name": "Team-X" },
                    { "groupid": "60", "name": "Siteadmin-bob-primary" },
                ],
            },
        ]),
        groups: vec![
            ("All-hosts".to_string(), "2".to_string()),
            ("Team-X".to_string(), "50".to_string()),
            ("Siteadmin-bob-primary".to_string(), "60".to_string()),
        ],
        templates: Vec::new(),
        calls: calls.clone(),
    }
    .mount(&server)
    .await;

    let map_dir = tempfile::tempdir().unwrap();
    write_map_files(
        map_dir.path(),
        "",
        "prop:Hostgroup-prop\n",
        "bob@example.com:Siteadmin-bob-primary\n",
    );

    let store = Store::connect(":memory:").await.unwrap();
    // Enabled, from src1, but bob is no longer a siteadmin.
    seed_enabled_hosts(&store, &[enabled_host("foo.example.com")]).await;

    let settings = SettingsBuilder::new(&server.uri(), map_dir.path()).build();
    let mut updater = ZabbixHostgroupUpdater::new(&settings, store, WorkerState::new())
        .await
        .unwrap();
    updater.work().await.unwrap();

    // The missing Source-src1 group is created on demand.
    let creates = calls_with_method(&calls, "hostgroup.create");
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0]["name"], "Source-src1");

    let updates = calls_with_method(&calls, "host.update");
    assert_eq!(updates.len(), 1);
    let group_ids: BTreeSet<&str> = updates[0]["groups"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|g| g["groupid"].as_str())
        .collect();
    // Siteadmin group (managed, no longer desired) is removed; the
    // unmanaged Team-X group survives; Source-src1 uses the created id.
    assert_eq!(group_ids, BTreeSet::from(["2", "50", "9999"]));
}

#[tokio::test]
async fn dryrun_reconcilers_never_mutate() {
    let server = MockServer::start().await;
    let calls = new_call_log();
    FakeZabbix {
        hosts: json!([
            {
                "hostid": "101",
                "host": "stale.example.com",
                "status": "0",
                "flags": "0",
                "groups": [{ "groupid": "2", "name": "All-hosts" }],
            },
        ]),
        groups: standard_groups(),
        templates: Vec::new(),
        calls: calls.clone(),
    }
    .mount(&server)
    .await;

    let map_dir = tempfile::tempdir().unwrap();
    write_map_files(map_dir.path(), "", "", "");

    let store = Store::connect(":memory:").await.unwrap();
    seed_enabled_hosts(&store, &[enabled_host("fresh.example.com")]).await;

    let mut builder = SettingsBuilder::new(&server.uri(), map_dir.path());
    builder.dryrun = true;
    let settings = builder.build();

    let mut updater = ZabbixHostUpdater::new(&settings, store.clone(), WorkerState::new())
        .await
        .unwrap();
    updater.work().await.unwrap();

    let mut group_updater =
        ZabbixHostgroupUpdater::new(&settings, store, WorkerState::new())
            .await
            .unwrap();
    group_updater.work().await.unwrap();

    assert!(calls_with_method(&calls, "host.create").is_empty());
    assert!(calls_with_method(&calls, "host.update").is_empty());
    assert!(calls_with_method(&calls, "hostgroup.create").is_empty());
}
