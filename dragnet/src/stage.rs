use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, instrument, warn};

use crate::completion::CompletionGate;
use crate::dedup::{DedupCache, dedup_key};
use crate::item::Item;
use crate::options::{StageConfig, TaskOptions};
use crate::plugin::InvocationContext;
use crate::pool::WorkerPool;
use crate::progress::ProgressTracker;
use crate::registry::PluginRegistry;

pub(crate) const CHANNEL_CAPACITY: usize = 256;

/// Collaborators shared by every stage of one scan task.
pub struct ScanContext {
    pub options: Arc<TaskOptions>,
    pub registry: Arc<PluginRegistry>,
    pub pool: Arc<WorkerPool>,
    pub dedup: Arc<DedupCache>,
    pub progress: Arc<ProgressTracker>,
    pub gate: Arc<CompletionGate>,
}

/// One unit of the scan chain.
///
/// A stage consumes its inbound item stream, fans each item out to its
/// configured plugins through the worker pool, deduplicates what the
/// plugins emit, and forwards survivors to the next stage's inbound
/// channel. Closing cascades: when the inbound channel closes, the stage
/// drains its fan-out, closes its result channel, and the collector's exit
/// closes the downstream inbound channel in turn.
pub struct PipelineStage {
    config: StageConfig,
    ctx: Arc<ScanContext>,
    input_tx: Option<mpsc::Sender<Item>>,
    input_rx: mpsc::Receiver<Item>,
    next: Option<Box<PipelineStage>>,
    /// Where a terminal stage forwards survivors instead of a next stage.
    sink: Option<mpsc::Sender<Item>>,
}

impl PipelineStage {
    pub fn new(config: StageConfig, ctx: Arc<ScanContext>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            config,
            ctx,
            input_tx: Some(input_tx),
            input_rx,
            next: None,
            sink: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn set_next(&mut self, next: PipelineStage) {
        self.next = Some(Box::new(next));
    }

    pub fn set_sink(&mut self, sink: mpsc::Sender<Item>) {
        self.sink = Some(sink);
    }

    /// Hand out the stage's sole inbound sender. The producer that takes it
    /// owns channel closing; a second take yields `None`, which keeps the
    /// close single-owner by construction.
    pub fn take_input(&mut self) -> Option<mpsc::Sender<Item>> {
        self.input_tx.take()
    }

    /// Drive this stage to completion. Blocks until the inbound channel has
    /// closed, every fan-out unit has finished, the result channel has
    /// closed, and the collector has exited.
    pub fn run(self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
        Box::pin(self.run_inner())
    }

    #[instrument(
        skip(self),
        fields(stage = %self.config.name, task = %self.ctx.options.id)
    )]
    async fn run_inner(mut self) -> anyhow::Result<()> {
        let stage_name = self.config.name.clone();
        let ctx = Arc::clone(&self.ctx);

        // The collector below becomes the sole producer of the downstream
        // inbound channel; dropping it at collector exit is what propagates
        // stream termination.
        let downstream = match self.next.take() {
            Some(mut next) => {
                let tx = next.take_input().ok_or_else(|| {
                    anyhow::anyhow!("downstream stage {} input already claimed", next.name())
                })?;
                tokio::spawn(async move {
                    if let Err(e) = next.run().await {
                        warn!(error = %e, "downstream stage failed");
                    }
                });
                tx
            }
            None => match self.sink.take() {
                Some(tx) => tx,
                None => anyhow::bail!("terminal stage {stage_name} has no output sink"),
            },
        };

        let (result_tx, result_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let collector = spawn_collector(stage_name.clone(), Arc::clone(&ctx), result_rx, downstream);

        let mut fanout = JoinSet::new();
        let mut saw_input = false;
        while let Some(item) = self.input_rx.recv().await {
            if !saw_input {
                ctx.progress.start(
                    &stage_name,
                    &ctx.options.target,
                    &ctx.options.id,
                    self.config.plugins.len(),
                );
                saw_input = true;
            }
            fanout.spawn(drive_item(
                item,
                self.config.plugins.clone(),
                stage_name.clone(),
                Arc::clone(&ctx),
                result_tx.clone(),
            ));
        }

        // Inbound closed. Every fan-out unit must finish before the result
        // channel is allowed to close.
        while let Some(joined) = fanout.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "fan-out unit panicked");
            }
        }
        drop(result_tx);

        if !saw_input {
            // a run with zero items still accounts one start/end pair
            ctx.progress.start(
                &stage_name,
                &ctx.options.target,
                &ctx.options.id,
                self.config.plugins.len(),
            );
        }
        ctx.progress.end(
            &stage_name,
            &ctx.options.target,
            &ctx.options.id,
            self.config.plugins.len(),
        );
        ctx.gate.done();

        if let Err(e) = collector.await {
            warn!(error = %e, "result collector panicked");
        }
        Ok(())
    }
}

/// Read the stage result channel until it closes, suppress duplicates, and
/// forward survivors downstream. Exits only on result-channel close, and
/// closes the downstream inbound channel on the way out.
fn spawn_collector(
    stage: String,
    ctx: Arc<ScanContext>,
    mut result_rx: mpsc::Receiver<Item>,
    downstream: mpsc::Sender<Item>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = result_rx.recv().await {
            let key = dedup_key(&ctx.options.id, &stage, &item.dedup_value());
            if !ctx.dedup.seen_or_mark(&key).await {
                debug!(stage = %stage, item = %item, "duplicate suppressed");
                continue;
            }
            debug!(stage = %stage, item = %item, "forwarding result");
            if downstream.send(item).await.is_err() {
                warn!(stage = %stage, "downstream inbound channel gone, dropping result");
            }
        }
    })
}

/// Fan-out unit: drive one item through the stage's plugin list in declared
/// order. Each step is submitted to the worker pool and awaited before the
/// next begins; all failure modes are logged and non-fatal.
async fn drive_item(
    item: Item,
    plugins: Vec<String>,
    stage: String,
    ctx: Arc<ScanContext>,
    result_tx: mpsc::Sender<Item>,
) {
    for plugin_name in &plugins {
        let Some(plugin) = ctx.registry.lookup(&stage, plugin_name) else {
            warn!(stage = %stage, plugin = %plugin_name, "plugin not registered, skipping");
            continue;
        };

        debug!(stage = %stage, plugin = %plugin_name, item = %item, "plugin execute start");
        let invocation =
            InvocationContext::new(ctx.options.parameter_for(&stage, plugin_name), result_tx.clone());
        let work_item = item.clone();
        let work_stage = stage.clone();
        let work_plugin = plugin_name.clone();
        let work = async move {
            if let Err(e) = plugin.execute(work_item, &invocation).await {
                warn!(stage = %work_stage, plugin = %work_plugin, error = %e, "plugin execution failed");
            }
        };

        match ctx.pool.submit(&stage, work).await {
            Ok(handle) => {
                if let Err(e) = handle.await {
                    warn!(stage = %stage, plugin = %plugin_name, error = %e, "plugin task aborted");
                }
            }
            Err(e) => {
                warn!(stage = %stage, plugin = %plugin_name, error = %e, "pool submission failed, step skipped");
            }
        }
        debug!(stage = %stage, plugin = %plugin_name, item = %item, "plugin execute end");
    }
}
