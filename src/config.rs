//! 注册中心配置
//!
//! 所有配置段都带默认值，TOML 中缺省的段落按默认值处理

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NamingConfig {
    pub naming: NamingSection,
    pub batch: BatchSettings,
    pub cache: CacheConfig,
    pub limiter: LimiterConfig,
    pub health: HealthConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub runtime: RuntimeSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NamingSection {
    /// 注册实例时服务不存在则自动创建
    pub auto_create_service: bool,
    /// 单次批量请求允许的最大条目数
    pub max_batch_request: usize,
}

impl Default for NamingSection {
    fn default() -> Self {
        Self {
            auto_create_service: true,
            max_batch_request: 100,
        }
    }
}

/// 各类写操作的批处理配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchSettings {
    pub register: BatchConfig,
    pub deregister: BatchConfig,
    pub isolate: BatchConfig,
    pub heartbeat: BatchConfig,
    pub client: BatchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// 关闭时退化为同步单条写入
    pub open: bool,
    /// 达到该条数立即刷新
    pub max_batch_count: usize,
    /// 批次内首个请求到达后的最长等待时间（毫秒）
    pub wait_time_ms: u64,
    /// 分片数，同一实例总是落在同一分片
    pub concurrency: usize,
    /// 调用方等待结果的超时时间（毫秒）
    pub wait_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            open: true,
            max_batch_count: 128,
            wait_time_ms: 32,
            concurrency: 4,
            wait_timeout_ms: 3_000,
        }
    }
}

impl BatchConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// 关闭批处理的配置
    pub fn closed() -> Self {
        Self {
            open: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 刷新间隔（毫秒）
    pub refresh_interval_ms: u64,
    /// 每隔多少次增量刷新做一次全量加载，0 表示不做周期性全量
    pub full_reload_every: u64,
    /// 上报客户端的存活时间（秒）
    pub client_ttl_secs: u64,
    /// 客户端淘汰检查间隔（毫秒）
    pub client_evict_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1_000,
            full_reload_every: 600,
            client_ttl_secs: 120,
            client_evict_interval_ms: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn client_ttl(&self) -> Duration {
        Duration::from_secs(self.client_ttl_secs)
    }

    pub fn client_evict_interval(&self) -> Duration {
        Duration::from_millis(self.client_evict_interval_ms)
    }
}

/// 单实例写请求限流配置（令牌桶）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimiterConfig {
    pub open: bool,
    pub max_burst: u32,
    pub refill_per_sec: f64,
    /// 空闲超过该时长的令牌桶会被清理（秒）
    pub idle_purge_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            open: true,
            max_burst: 10,
            refill_per_sec: 5.0,
            idle_purge_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub open: bool,
    pub check_interval_ms: u64,
    /// 超过 ttl * expire_multiplier 没有心跳即判定为不健康
    pub expire_multiplier: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            open: true,
            check_interval_ms: 1_000,
            expire_multiplier: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// 严格模式下所有写操作都必须携带正确的服务 token
    pub strict: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub shutdown_timeout_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl NamingConfig {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: NamingConfig = toml::from_str(content)?;
        Ok(config)
    }
}
