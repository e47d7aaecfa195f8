use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::completion::CompletionGate;
use crate::dedup::DedupCache;
use crate::item::Item;
use crate::options::TaskOptions;
use crate::pool::WorkerPool;
use crate::progress::ProgressTracker;
use crate::registry::PluginRegistry;
use crate::stage::{CHANNEL_CAPACITY, PipelineStage, ScanContext};

/// An assembled, not-yet-running stage chain.
pub struct Pipeline {
    head: PipelineStage,
    input: mpsc::Sender<Item>,
    output: mpsc::Receiver<Item>,
    progress: Arc<ProgressTracker>,
    gate: Arc<CompletionGate>,
    pool: Arc<WorkerPool>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build the stage chain described by `options`, back to front, wiring
    /// one worker-pool budget per stage and a completion gate with one slot
    /// per stage. The terminal stage forwards survivors to the pipeline
    /// output channel.
    pub fn assemble(
        options: Arc<TaskOptions>,
        registry: Arc<PluginRegistry>,
        dedup: Arc<DedupCache>,
    ) -> anyhow::Result<Pipeline> {
        let Some((tail_config, upstream_configs)) = options.stages.split_last() else {
            anyhow::bail!("task {} has no stages configured", options.id);
        };

        let pool = Arc::new(WorkerPool::new());
        for stage in &options.stages {
            pool.register(&stage.name, stage.concurrency);
        }
        let progress = Arc::new(ProgressTracker::new());
        let gate = Arc::new(CompletionGate::new(options.stages.len()));
        let ctx = Arc::new(ScanContext {
            options: Arc::clone(&options),
            registry,
            pool: Arc::clone(&pool),
            dedup,
            progress: Arc::clone(&progress),
            gate: Arc::clone(&gate),
        });

        let (output_tx, output_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut chain = PipelineStage::new(tail_config.clone(), Arc::clone(&ctx));
        chain.set_sink(output_tx);
        for config in upstream_configs.iter().rev() {
            let mut stage = PipelineStage::new(config.clone(), Arc::clone(&ctx));
            stage.set_next(chain);
            chain = stage;
        }

        let mut head = chain;
        let input = head
            .take_input()
            .ok_or_else(|| anyhow::anyhow!("head stage input already claimed"))?;

        Ok(Pipeline {
            head,
            input,
            output: output_rx,
            progress,
            gate,
            pool,
        })
    }

    /// Spawn the stage chain and hand back the running handles. Stage
    /// failures are logged, never propagated (best-effort pipeline).
    pub fn launch(self) -> RunningPipeline {
        let head = self.head;
        tokio::spawn(async move {
            if let Err(e) = head.run().await {
                warn!(error = %e, "head stage failed");
            }
        });
        RunningPipeline {
            input: Some(self.input),
            output: self.output,
            progress: self.progress,
            gate: self.gate,
            pool: self.pool,
        }
    }
}

/// Handles for a launched pipeline: seed items, read survivors, await
/// settlement.
pub struct RunningPipeline {
    input: Option<mpsc::Sender<Item>>,
    output: mpsc::Receiver<Item>,
    progress: Arc<ProgressTracker>,
    gate: Arc<CompletionGate>,
    pool: Arc<WorkerPool>,
}

impl RunningPipeline {
    /// Feed one item into the head stage.
    pub async fn send(&self, item: Item) -> anyhow::Result<()> {
        let Some(input) = &self.input else {
            anyhow::bail!("pipeline input already closed");
        };
        input
            .send(item)
            .await
            .map_err(|_| anyhow::anyhow!("head stage is gone"))
    }

    /// Close the head stage's inbound channel. This caller is its sole
    /// producer, so the close happens exactly once, here.
    pub fn close_input(&mut self) {
        self.input.take();
    }

    /// Next surviving item, or `None` once the terminal stage has closed
    /// the output channel.
    pub async fn recv(&mut self) -> Option<Item> {
        self.output.recv().await
    }

    /// Block until every stage has finished its shutdown choreography.
    pub async fn wait(&self) {
        self.gate.wait().await;
    }

    /// Stop accepting new plugin work. In-flight work finishes.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }
}

/// What a settled scan task produced.
pub struct TaskReport {
    pub assets: Vec<Item>,
    pub progress: Arc<ProgressTracker>,
}

/// Run one scan task start to finish: seed the root target, collect every
/// surviving asset, and wait for the whole chain to settle.
#[instrument(skip_all, fields(task = %options.id, target = %options.target))]
pub async fn run_task(
    options: Arc<TaskOptions>,
    registry: Arc<PluginRegistry>,
    dedup: Arc<DedupCache>,
) -> anyhow::Result<TaskReport> {
    let pipeline = Pipeline::assemble(Arc::clone(&options), registry, dedup)?;
    let mut running = pipeline.launch();

    running.send(Item::Target(options.target.clone())).await?;
    running.close_input();

    let mut assets = Vec::new();
    while let Some(item) = running.recv().await {
        assets.push(item);
    }
    running.wait().await;
    running.shutdown();

    info!(assets = assets.len(), "scan task settled");
    Ok(TaskReport {
        assets,
        progress: running.progress(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::dedup::DedupConfig;
    use crate::options::StageConfig;
    use crate::plugin::{InvocationContext, Plugin};

    struct Passthrough;

    #[async_trait]
    impl Plugin for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }
        fn module(&self) -> &str {
            "TargetHandler"
        }
        async fn execute(&self, item: Item, ctx: &InvocationContext) -> anyhow::Result<()> {
            ctx.emit(item).await;
            Ok(())
        }
    }

    fn single_stage_options() -> Arc<TaskOptions> {
        Arc::new(TaskOptions {
            id: "task-1".into(),
            name: "unit".into(),
            target: "example.com".into(),
            stages: vec![StageConfig {
                name: "TargetHandler".into(),
                plugins: vec!["passthrough".into()],
                concurrency: 2,
            }],
            parameters: Default::default(),
        })
    }

    #[tokio::test]
    async fn assemble_rejects_empty_stage_list() {
        let options = Arc::new(TaskOptions {
            id: "task-0".into(),
            name: "empty".into(),
            target: "example.com".into(),
            stages: vec![],
            parameters: Default::default(),
        });
        let err = Pipeline::assemble(
            options,
            Arc::new(PluginRegistry::new()),
            Arc::new(DedupCache::new(DedupConfig::default())),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no stages"));
    }

    #[tokio::test]
    async fn run_task_collects_survivors_and_settles() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register("TargetHandler", Arc::new(Passthrough));

        let report = run_task(
            single_stage_options(),
            registry,
            Arc::new(DedupCache::new(DedupConfig::default())),
        )
        .await
        .unwrap();

        assert_eq!(report.assets.len(), 1);
        assert_eq!(report.assets[0].dedup_value(), "example.com");

        let record = report.progress.snapshot("TargetHandler", "task-1").unwrap();
        assert_eq!(record.expected, 1);
        assert!(record.ended_at.is_some());
    }

    #[tokio::test]
    async fn send_after_close_is_an_error() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register("TargetHandler", Arc::new(Passthrough));

        let pipeline = Pipeline::assemble(
            single_stage_options(),
            registry,
            Arc::new(DedupCache::new(DedupConfig::default())),
        )
        .unwrap();
        let mut running = pipeline.launch();
        running.close_input();

        let err = running
            .send(Item::Target("example.com".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already closed"));

        running.wait().await;
    }
}
