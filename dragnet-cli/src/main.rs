mod cli;

use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dragnet::dedup::{DedupCache, DedupConfig};
use dragnet::options::TaskOptions;
use dragnet::pipeline::run_task;
use dragnet::plugins;

use cli::Cli;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.verbosity.tracing_level_filter().to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    if !args.task.exists() {
        anyhow::bail!("task file not found: {}", args.task.display());
    }
    let options = Arc::new(TaskOptions::from_yaml_file(&args.task)?);

    let registry = Arc::new(plugins::default_registry(&args.tool_dir));
    if !args.no_install {
        registry.install_all().await;
        let failed_checks = registry.check_all().await;
        if failed_checks > 0 {
            info!(failed_checks, "some plugins are not runnable; their steps will be skipped or fail");
        }
    }

    let dedup = Arc::new(match &args.redis_url {
        Some(url) => DedupCache::with_shared(DedupConfig::default(), url).await?,
        None => DedupCache::new(DedupConfig::default()),
    });

    info!(
        task = %options.id,
        target = %options.target,
        stages = options.stages.len(),
        "starting scan task"
    );
    let report = run_task(Arc::clone(&options), registry, dedup).await?;

    for item in &report.assets {
        println!("{}", serde_json::to_string(item)?);
    }

    for (stage, _task, record) in report.progress.snapshot_all() {
        let duration = record
            .ended_at
            .map(|end| (end - record.started_at).num_milliseconds());
        info!(
            stage = %stage,
            target = %record.target,
            plugins = record.expected,
            duration_ms = duration,
            "stage summary"
        );
    }
    info!(assets = report.assets.len(), "scan complete");
    Ok(())
}
