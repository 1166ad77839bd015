//! 运行时配置模块

use crate::config::RuntimeSection;
use std::time::Duration;

/// 运行时配置
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// 关闭超时时间（默认 5 秒），超时后强制中止剩余任务
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl From<&RuntimeSection> for RuntimeConfig {
    fn from(section: &RuntimeSection) -> Self {
        Self::new().with_shutdown_timeout(Duration::from_millis(section.shutdown_timeout_ms))
    }
}
