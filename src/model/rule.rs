//! 治理规则记录
//!
//! 路由、限流、熔断、探测规则在缓存层只关心作用域和内容，
//! 规则内容本身以 JSON 保存。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 通配作用域
pub const MATCH_ALL: &str = "*";

/// 规则族，每个规则族维护独立的 revision 空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFamily {
    Routing,
    RateLimit,
    CircuitBreaker,
    FaultDetect,
}

impl RuleFamily {
    pub const ALL: [RuleFamily; 4] = [
        RuleFamily::Routing,
        RuleFamily::RateLimit,
        RuleFamily::CircuitBreaker,
        RuleFamily::FaultDetect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleFamily::Routing => "routing",
            RuleFamily::RateLimit => "rate_limit",
            RuleFamily::CircuitBreaker => "circuit_breaker",
            RuleFamily::FaultDetect => "fault_detect",
        }
    }
}

impl fmt::Display for RuleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleRecord {
    pub id: String,
    pub family: RuleFamily,
    /// 作用的命名空间，`*` 表示全部
    pub namespace: String,
    /// 作用的服务名，`*` 表示命名空间下全部服务
    pub service: String,
    pub name: String,
    pub priority: u32,
    pub disable: bool,
    pub content: serde_json::Value,
    pub revision: String,
    pub valid: bool,
    pub mtime: DateTime<Utc>,
}

impl RuleRecord {
    pub fn new(
        family: RuleFamily,
        namespace: impl Into<String>,
        service: impl Into<String>,
        name: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            family,
            namespace: namespace.into(),
            service: service.into(),
            name: name.into(),
            priority: 0,
            disable: false,
            content,
            revision: super::new_revision(),
            valid: true,
            mtime: Utc::now(),
        }
    }

    /// 作用域键 (namespace, service)
    pub fn scope(&self) -> (String, String) {
        (self.namespace.clone(), self.service.clone())
    }
}
