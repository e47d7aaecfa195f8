use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::item::Item;

/// Per-call execution context handed to [`Plugin::execute`].
///
/// Carries the invocation's resolved parameter string and the stage's result
/// sink. A fresh context is built for every call, so concurrent invocations
/// of a shared plugin instance never contend on mutable fields.
#[derive(Clone)]
pub struct InvocationContext {
    parameter: String,
    sink: mpsc::Sender<Item>,
}

impl InvocationContext {
    pub fn new(parameter: impl Into<String>, sink: mpsc::Sender<Item>) -> Self {
        Self {
            parameter: parameter.into(),
            sink,
        }
    }

    /// The "-flag value" parameter string configured for this invocation,
    /// empty if none was configured.
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    /// Write one result into the stage's result channel.
    ///
    /// The collector only goes away after every fan-out unit has finished,
    /// so a closed channel here means the stage is already tearing down and
    /// the item can only be dropped.
    pub async fn emit(&self, item: Item) {
        if let Err(e) = self.sink.send(item).await {
            warn!(item = %e.0, "result channel closed, dropping emitted item");
        }
    }
}

/// The capability set every scanner plugin implements.
///
/// `execute` is the unit of work the stage submits to the worker pool; its
/// side effects are emitting zero or more items into `ctx` and/or returning
/// an error. Errors are logged by the stage and never abort the pipeline.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Name of the stage this plugin belongs to.
    fn module(&self) -> &str;

    async fn execute(&self, item: Item, ctx: &InvocationContext) -> anyhow::Result<()>;

    /// Provision any external tooling this plugin needs. Best-effort:
    /// failure is logged by the caller and a later `execute` may fail on
    /// its own terms.
    async fn install(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Verify the plugin is runnable (binary present, config sane).
    async fn check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn module(&self) -> &str {
            "TargetHandler"
        }
        async fn execute(&self, item: Item, ctx: &InvocationContext) -> anyhow::Result<()> {
            ctx.emit(item).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn emit_reaches_sink() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = InvocationContext::new("-t 5", tx);
        assert_eq!(ctx.parameter(), "-t 5");

        Echo.execute(Item::Target("example.com".into()), &ctx)
            .await
            .unwrap();
        drop(ctx);

        let got = rx.recv().await.expect("item forwarded");
        assert_eq!(got.dedup_value(), "example.com");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn emit_on_closed_sink_is_non_fatal() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let ctx = InvocationContext::new("", tx);
        // must not panic or error
        ctx.emit(Item::Target("example.com".into())).await;
    }
}
