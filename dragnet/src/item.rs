use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A plugin was handed an item variant it does not understand.
///
/// Stages carry a uniform item stream; each plugin validates the shape it
/// receives and reports a mismatch instead of casting blindly.
#[derive(Debug, Clone, Error)]
#[error("schema mismatch: expected {expected}, got {actual}")]
pub struct SchemaMismatch {
    pub expected: &'static str,
    pub actual: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubdomainRecord {
    pub host: String,
    pub record_type: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortAliveRecord {
    pub host: String,
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpAssetRecord {
    pub url: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub title: String,
    pub status_code: u16,
    pub content_length: usize,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub web_server: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub input: String,
    pub source: String,
    pub output: String,
    pub status: u16,
    pub length: usize,
}

/// The payload exchanged between adjacent pipeline stages.
///
/// Ownership transfers on send: once an item is placed on a channel the
/// sender keeps no handle to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Item {
    Target(String),
    Subdomain(SubdomainRecord),
    PortAlive(PortAliveRecord),
    HttpAsset(HttpAssetRecord),
    Url(UrlRecord),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Target(_) => "target",
            Item::Subdomain(_) => "subdomain",
            Item::PortAlive(_) => "port_alive",
            Item::HttpAsset(_) => "http_asset",
            Item::Url(_) => "url",
        }
    }

    /// The value component of this item's dedup key. Two items with the
    /// same dedup value within one stage and task are duplicates.
    pub fn dedup_value(&self) -> String {
        match self {
            Item::Target(t) => t.clone(),
            Item::Subdomain(r) => r.host.clone(),
            Item::PortAlive(r) => format!("{}:{}", r.host, r.port),
            Item::HttpAsset(r) => r.url.clone(),
            Item::Url(r) => r.output.clone(),
        }
    }

    pub fn as_target(&self) -> Result<&str, SchemaMismatch> {
        match self {
            Item::Target(t) => Ok(t),
            other => Err(SchemaMismatch {
                expected: "target",
                actual: other.kind(),
            }),
        }
    }

    pub fn as_subdomain(&self) -> Result<&SubdomainRecord, SchemaMismatch> {
        match self {
            Item::Subdomain(r) => Ok(r),
            other => Err(SchemaMismatch {
                expected: "subdomain",
                actual: other.kind(),
            }),
        }
    }

    pub fn as_http_asset(&self) -> Result<&HttpAssetRecord, SchemaMismatch> {
        match self {
            Item::HttpAsset(r) => Ok(r),
            other => Err(SchemaMismatch {
                expected: "http_asset",
                actual: other.kind(),
            }),
        }
    }

    /// The hostname this item points at, for plugins that accept either a
    /// bare target or an already-resolved record.
    pub fn host(&self) -> Option<&str> {
        match self {
            Item::Target(t) => Some(t),
            Item::Subdomain(r) => Some(&r.host),
            Item::PortAlive(r) => Some(&r.host),
            Item::HttpAsset(r) => Some(&r.host),
            Item::Url(_) => None,
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dedup_value())
    }
}
