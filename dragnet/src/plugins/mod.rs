pub mod subfinder;
pub mod target_parser;
pub mod tcp_probe;

pub use subfinder::Subfinder;
pub use target_parser::TargetParser;
pub use tcp_probe::TcpProbe;

use std::path::Path;
use std::sync::Arc;

use crate::registry::PluginRegistry;

/// Registry pre-loaded with the built-in scanners, each under its owning
/// stage. External tools are provisioned into `tool_dir`.
pub fn default_registry(tool_dir: &Path) -> PluginRegistry {
    let registry = PluginRegistry::new();
    registry.register("TargetHandler", Arc::new(TargetParser));
    registry.register("SubdomainScan", Arc::new(Subfinder::new(tool_dir)));
    registry.register("PortScan", Arc::new(TcpProbe));
    registry
}
