use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::item::{Item, PortAliveRecord, SchemaMismatch};
use crate::plugin::{InvocationContext, Plugin};
use crate::util;

const DEFAULT_PORTS: &str = "80,443,8080,8443";
const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Liveness probe: TCP-connects to a port list on the item's host and
/// emits one record per open port. `-ports` and `-timeout` come from the
/// invocation parameter.
pub struct TcpProbe;

fn parse_ports(spec: &str) -> Vec<u16> {
    spec.split(',')
        .filter_map(|port| port.trim().parse().ok())
        .collect()
}

#[async_trait]
impl Plugin for TcpProbe {
    fn name(&self) -> &str {
        "tcp_probe"
    }

    fn module(&self) -> &str {
        "PortScan"
    }

    async fn execute(&self, item: Item, ctx: &InvocationContext) -> anyhow::Result<()> {
        let Some(host) = item.host() else {
            return Err(SchemaMismatch {
                expected: "target or host record",
                actual: item.kind(),
            }
            .into());
        };

        let args = util::parse_args(ctx.parameter(), &["ports", "timeout"]);
        let ports = parse_ports(args.get("ports").map(String::as_str).unwrap_or(DEFAULT_PORTS));
        let timeout = Duration::from_secs(
            args.get("timeout")
                .and_then(|t| t.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        for port in ports {
            let connect = TcpStream::connect((host, port));
            if let Ok(Ok(stream)) = tokio::time::timeout(timeout, connect).await {
                let ip = stream
                    .peer_addr()
                    .map(|addr| addr.ip().to_string())
                    .unwrap_or_default();
                debug!(host, port, "port open");
                ctx.emit(Item::PortAlive(PortAliveRecord {
                    host: host.to_string(),
                    ip,
                    port,
                }))
                .await;
            }
        }
        Ok(())
    }
}
