use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dragnet::{
    DedupCache, DedupConfig, InvocationContext, Item, Plugin, PluginRegistry, StageConfig,
    SubdomainRecord, TaskOptions, run_task,
};

/// Emits `count` synthetic subdomains of the incoming target.
struct Expand {
    name: &'static str,
    count: usize,
}

#[async_trait]
impl Plugin for Expand {
    fn name(&self) -> &str {
        self.name
    }
    fn module(&self) -> &str {
        "SubdomainScan"
    }
    async fn execute(&self, item: Item, ctx: &InvocationContext) -> anyhow::Result<()> {
        let target = item.as_target()?;
        for i in 0..self.count {
            ctx.emit(Item::Subdomain(SubdomainRecord {
                host: format!("s{i}.{target}"),
                record_type: String::new(),
                values: vec![],
                ips: vec![],
            }))
            .await;
        }
        Ok(())
    }
}

/// Records every invocation as (item value, plugin name) and forwards the
/// item unchanged.
struct Record {
    name: &'static str,
    log: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Plugin for Record {
    fn name(&self) -> &str {
        self.name
    }
    fn module(&self) -> &str {
        "any"
    }
    async fn execute(&self, item: Item, ctx: &InvocationContext) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push((item.dedup_value(), self.name.to_string()));
        ctx.emit(item).await;
        Ok(())
    }
}

/// Always fails without emitting.
struct Fail {
    name: &'static str,
}

#[async_trait]
impl Plugin for Fail {
    fn name(&self) -> &str {
        self.name
    }
    fn module(&self) -> &str {
        "any"
    }
    async fn execute(&self, _item: Item, _ctx: &InvocationContext) -> anyhow::Result<()> {
        anyhow::bail!("tool crashed")
    }
}

fn options(stages: Vec<StageConfig>) -> Arc<TaskOptions> {
    Arc::new(TaskOptions {
        id: "task-int".into(),
        name: "integration".into(),
        target: "example.com".into(),
        stages,
        parameters: HashMap::new(),
    })
}

fn stage(name: &str, plugins: &[&str]) -> StageConfig {
    StageConfig {
        name: name.into(),
        plugins: plugins.iter().map(|p| p.to_string()).collect(),
        concurrency: 8,
    }
}

fn local_dedup() -> Arc<DedupCache> {
    Arc::new(DedupCache::new(DedupConfig::default()))
}

#[tokio::test]
async fn two_plugins_emitting_the_same_value_forward_once() {
    // stage has plugins [A, B]; both re-emit the incoming target X;
    // exactly one X survives dedup.
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(PluginRegistry::new());
    registry.register(
        "SubdomainScan",
        Arc::new(Record {
            name: "a",
            log: Arc::clone(&log),
        }),
    );
    registry.register(
        "SubdomainScan",
        Arc::new(Record {
            name: "b",
            log: Arc::clone(&log),
        }),
    );

    let report = run_task(
        options(vec![stage("SubdomainScan", &["a", "b"])]),
        registry,
        local_dedup(),
    )
    .await
    .unwrap();

    assert_eq!(report.assets.len(), 1);
    assert_eq!(report.assets[0].dedup_value(), "example.com");
    // both plugins did run
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn plugins_run_in_declared_order_for_every_item() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(PluginRegistry::new());
    registry.register("SubdomainScan", Arc::new(Expand { name: "expand", count: 5 }));
    for name in ["first", "second", "third"] {
        registry.register(
            "PortScan",
            Arc::new(Record {
                name,
                log: Arc::clone(&log),
            }),
        );
    }

    run_task(
        options(vec![
            stage("SubdomainScan", &["expand"]),
            stage("PortScan", &["first", "second", "third"]),
        ]),
        registry,
        local_dedup(),
    )
    .await
    .unwrap();

    // group invocations by item; within each item the declared order holds
    let calls = log.lock().unwrap().clone();
    let mut per_item: HashMap<String, Vec<String>> = HashMap::new();
    for (item, plugin) in calls {
        per_item.entry(item).or_default().push(plugin);
    }
    assert_eq!(per_item.len(), 5);
    for (item, plugins) in per_item {
        assert_eq!(
            plugins,
            vec!["first", "second", "third"],
            "unexpected order for {item}"
        );
    }
}

#[tokio::test]
async fn execution_failure_does_not_stop_later_plugins() {
    // plugin A fails on item X; plugin B still runs and its fresh result
    // is forwarded.
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(PluginRegistry::new());
    registry.register("SubdomainScan", Arc::new(Fail { name: "broken" }));
    registry.register(
        "SubdomainScan",
        Arc::new(Record {
            name: "working",
            log: Arc::clone(&log),
        }),
    );

    let report = run_task(
        options(vec![stage("SubdomainScan", &["broken", "working"])]),
        registry,
        local_dedup(),
    )
    .await
    .unwrap();

    assert_eq!(log.lock().unwrap().len(), 1);
    assert_eq!(report.assets.len(), 1);
}

#[tokio::test]
async fn unregistered_plugin_is_skipped_and_chain_still_settles() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(PluginRegistry::new());
    registry.register(
        "SubdomainScan",
        Arc::new(Record {
            name: "present",
            log: Arc::clone(&log),
        }),
    );

    let report = run_task(
        options(vec![stage("SubdomainScan", &["missing", "present"])]),
        registry,
        local_dedup(),
    )
    .await
    .unwrap();

    assert_eq!(log.lock().unwrap().clone(), vec![(
        "example.com".to_string(),
        "present".to_string()
    )]);
    assert_eq!(report.assets.len(), 1);
}

#[tokio::test]
async fn results_cascade_through_the_whole_chain() {
    let registry = Arc::new(PluginRegistry::new());
    registry.register("SubdomainScan", Arc::new(Expand { name: "expand", count: 3 }));
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.register(
        "PortScan",
        Arc::new(Record {
            name: "probe",
            log: Arc::clone(&log),
        }),
    );

    let report = run_task(
        options(vec![
            stage("SubdomainScan", &["expand"]),
            stage("PortScan", &["probe"]),
        ]),
        registry,
        local_dedup(),
    )
    .await
    .unwrap();

    let mut hosts: Vec<String> = report.assets.iter().map(|i| i.dedup_value()).collect();
    hosts.sort();
    assert_eq!(hosts, vec!["s0.example.com", "s1.example.com", "s2.example.com"]);

    // one start/end pair per stage
    for stage_name in ["SubdomainScan", "PortScan"] {
        let record = report.progress.snapshot(stage_name, "task-int").unwrap();
        assert!(record.ended_at.is_some(), "{stage_name} should have ended");
        assert_eq!(record.expected, 1);
    }
}

#[tokio::test]
async fn empty_input_settles_every_stage() {
    // no plugin ever emits, so downstream stages see zero items; every
    // stage must still close, account progress, and decrement the gate.
    let registry = Arc::new(PluginRegistry::new());
    registry.register("SubdomainScan", Arc::new(Fail { name: "mute" }));

    let report = run_task(
        options(vec![
            stage("SubdomainScan", &["mute"]),
            stage("PortScan", &["nobody"]),
            stage("URLScan", &[]),
        ]),
        registry,
        local_dedup(),
    )
    .await
    .unwrap();

    assert!(report.assets.is_empty());
    for stage_name in ["SubdomainScan", "PortScan", "URLScan"] {
        let record = report.progress.snapshot(stage_name, "task-int").unwrap();
        assert!(
            record.ended_at.is_some(),
            "{stage_name} must end even with zero items"
        );
    }
}

#[tokio::test]
async fn duplicates_from_concurrent_items_collapse_downstream() {
    // every expanded subdomain is re-emitted by two plugins concurrently
    // across 8 items; downstream must see each host exactly once.
    let registry = Arc::new(PluginRegistry::new());
    registry.register("SubdomainScan", Arc::new(Expand { name: "expand", count: 8 }));
    let log = Arc::new(Mutex::new(Vec::new()));
    for name in ["left", "right"] {
        registry.register(
            "PortScan",
            Arc::new(Record {
                name,
                log: Arc::clone(&log),
            }),
        );
    }

    let report = run_task(
        options(vec![
            stage("SubdomainScan", &["expand"]),
            stage("PortScan", &["left", "right"]),
        ]),
        registry,
        local_dedup(),
    )
    .await
    .unwrap();

    let mut hosts: Vec<String> = report.assets.iter().map(|i| i.dedup_value()).collect();
    let total = hosts.len();
    hosts.sort();
    hosts.dedup();
    assert_eq!(total, hosts.len(), "downstream received duplicate hosts");
    assert_eq!(total, 8);
}
