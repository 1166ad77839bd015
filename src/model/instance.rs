//! 服务实例定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// 实例身份：(namespace, service, vpc_id?, host, port)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub namespace: String,
    pub service: String,
    pub vpc_id: Option<String>,
    pub host: String,
    pub port: u32,
}

impl InstanceKey {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        host: impl Into<String>,
        port: u32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            vpc_id: None,
            host: host.into(),
            port,
        }
    }

    pub fn with_vpc(mut self, vpc_id: impl Into<String>) -> Self {
        self.vpc_id = Some(vpc_id.into());
        self
    }

    /// 计算确定性的实例 ID
    pub fn id(&self) -> String {
        compute_instance_id(
            &self.namespace,
            &self.service,
            self.vpc_id.as_deref(),
            &self.host,
            self.port,
        )
    }
}

/// 实例 ID = SHA-256(namespace##service[##vpc]##host##port) 的前 20 字节十六进制
pub fn compute_instance_id(
    namespace: &str,
    service: &str,
    vpc_id: Option<&str>,
    host: &str,
    port: u32,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"##");
    hasher.update(service.as_bytes());
    if let Some(vpc) = vpc_id.filter(|v| !v.is_empty()) {
        hasher.update(b"##");
        hasher.update(vpc.as_bytes());
    }
    hasher.update(b"##");
    hasher.update(host.as_bytes());
    hasher.update(b"##");
    hasher.update(port.to_string().as_bytes());
    hex::encode(&hasher.finalize()[..20])
}

/// 地域信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub region: String,
    pub zone: String,
    pub campus: String,
}

/// 心跳健康检查配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HealthCheck {
    pub enabled: bool,
    /// 心跳 TTL（秒）
    pub ttl_secs: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 5,
        }
    }
}

/// 服务实例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    /// 所属服务 ID
    pub service_id: String,
    pub namespace: String,
    pub service: String,
    pub vpc_id: Option<String>,
    pub host: String,
    pub port: u32,
    pub protocol: Option<String>,
    pub version: Option<String>,
    pub weight: u32,
    pub priority: u32,
    pub metadata: BTreeMap<String, String>,
    pub location: Option<Location>,
    pub health_check: HealthCheck,
    pub healthy: bool,
    pub isolate: bool,
    pub logic_set: Option<String>,
    /// 每次属性变更都会重新生成
    pub revision: String,
    /// 存储层软删除标记，缓存增量刷新依赖它感知删除
    pub valid: bool,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

impl Instance {
    /// 创建新的实例（ID 由身份计算得出）
    pub fn new(key: &InstanceKey, service_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: key.id(),
            service_id: service_id.into(),
            namespace: key.namespace.clone(),
            service: key.service.clone(),
            vpc_id: key.vpc_id.clone(),
            host: key.host.clone(),
            port: key.port,
            protocol: None,
            version: None,
            weight: 100,
            priority: 0,
            metadata: BTreeMap::new(),
            location: None,
            health_check: HealthCheck::default(),
            healthy: true,
            isolate: false,
            logic_set: None,
            revision: super::new_revision(),
            valid: true,
            ctime: now,
            mtime: now,
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey {
            namespace: self.namespace.clone(),
            service: self.service.clone(),
            vpc_id: self.vpc_id.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_health_check(mut self, ttl_secs: u32) -> Self {
        self.health_check = HealthCheck {
            enabled: true,
            ttl_secs,
        };
        self
    }

    pub fn health_check_enabled(&self) -> bool {
        self.health_check.enabled
    }

    /// 比较所有对外可见的可变属性（不含 revision 与时间戳）
    pub fn same_attributes(&self, other: &Instance) -> bool {
        self.id == other.id
            && self.service_id == other.service_id
            && self.protocol == other.protocol
            && self.version == other.version
            && self.weight == other.weight
            && self.priority == other.priority
            && self.metadata == other.metadata
            && self.location == other.location
            && self.health_check == other.health_check
            && self.healthy == other.healthy
            && self.isolate == other.isolate
            && self.logic_set == other.logic_set
    }
}
