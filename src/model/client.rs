//! SDK 上报的客户端信息，只存在于缓存中

use super::Location;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    #[default]
    Sdk,
    Agent,
}

/// 客户端的监控上报目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatTarget {
    pub target: String,
    pub port: u32,
    pub path: String,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub host: String,
    pub client_type: ClientType,
    pub version: Option<String>,
    pub location: Option<Location>,
    pub stats: Vec<StatTarget>,
    pub mtime: DateTime<Utc>,
}

impl Client {
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            client_type: ClientType::Sdk,
            version: None,
            location: None,
            stats: Vec::new(),
            mtime: Utc::now(),
        }
    }
}
