use async_trait::async_trait;
use tracing::debug;

use crate::item::Item;
use crate::plugin::{InvocationContext, Plugin};

/// Splits a raw target payload into individual normalized scan targets.
///
/// Accepts newline-, comma-, or whitespace-separated entries; strips URL
/// schemes and paths, lowercases hosts, and drops empties and `#` comments.
pub struct TargetParser;

fn normalize(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() || entry.starts_with('#') {
        return None;
    }

    let host = entry
        .strip_prefix("https://")
        .or_else(|| entry.strip_prefix("http://"))
        .unwrap_or(entry);
    let host = host.split(['/', '?']).next().unwrap_or(host);

    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

#[async_trait]
impl Plugin for TargetParser {
    fn name(&self) -> &str {
        "target_parser"
    }

    fn module(&self) -> &str {
        "TargetHandler"
    }

    async fn execute(&self, item: Item, ctx: &InvocationContext) -> anyhow::Result<()> {
        let raw = item.as_target()?;

        let mut parsed = 0usize;
        for entry in raw.split(['\n', ',', ' ', '\t']) {
            if let Some(host) = normalize(entry) {
                parsed += 1;
                ctx.emit(Item::Target(host)).await;
            }
        }
        debug!(parsed, "target payload parsed");
        Ok(())
    }
}
