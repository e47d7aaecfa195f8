pub mod completion;
pub mod dedup;
pub mod item;
pub mod options;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod stage;
pub mod util;

pub use completion::CompletionGate;
pub use dedup::{DedupCache, DedupConfig, dedup_key};
pub use item::{
    HttpAssetRecord, Item, PortAliveRecord, SchemaMismatch, SubdomainRecord, UrlRecord,
};
pub use options::{StageConfig, TaskOptions};
pub use pipeline::{Pipeline, RunningPipeline, TaskReport, run_task};
pub use plugin::{InvocationContext, Plugin};
pub use pool::{PoolError, WorkerPool};
pub use progress::{ProgressRecord, ProgressTracker};
pub use registry::PluginRegistry;
pub use stage::{PipelineStage, ScanContext};
