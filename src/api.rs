//! 对外请求与响应结构
//!
//! 单条写操作返回 `Result<Outcome<T>>`；批量写操作返回 [`BatchResponse`]，
//! 每个条目与提交顺序一一对应；发现类读操作返回 [`DiscoverResponse`]。

use crate::batch::Outcome;
use crate::cache::Compared;
use crate::error::{ErrorCategory, ErrorCode, NamingError, Result};
use crate::model::{HealthCheck, Instance, InstanceKey, Location};
use serde::Serialize;
use std::collections::BTreeMap;

// ============================================================
// 响应
// ============================================================

/// 单个条目的结果
#[derive(Debug, Clone, Serialize)]
pub struct Response<T> {
    pub code: ErrorCode,
    pub info: String,
    pub data: Option<T>,
}

impl<T> Response<T> {
    pub fn new(code: ErrorCode, data: Option<T>) -> Self {
        Self {
            code,
            info: code.as_str().to_string(),
            data,
        }
    }

    pub fn from_error(err: &NamingError) -> Self {
        Self {
            code: err.code(),
            info: err.reason().to_string(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl<T> From<Result<Outcome<T>>> for Response<T> {
    fn from(result: Result<Outcome<T>>) -> Self {
        match result {
            Ok(outcome) => Response::new(outcome.code, outcome.entity),
            Err(err) => Response::from_error(&err),
        }
    }
}

/// 批量写操作的结果
///
/// 汇总代码：全部成功为 `ExecuteSuccess`；任一条目出现基础设施错误或超时
/// 为 `ExecuteException`；否则为 `BadRequest`。
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse<T> {
    pub code: ErrorCode,
    pub info: String,
    pub responses: Vec<Response<T>>,
}

impl<T> BatchResponse<T> {
    pub fn new(responses: Vec<Response<T>>) -> Self {
        let code = aggregate_code(responses.iter().map(|r| r.code));
        Self {
            code,
            info: code.as_str().to_string(),
            responses,
        }
    }

    /// 整个请求在逐条处理之前就被拒绝，每个提交项都带上同一个错误
    pub fn rejected(err: &NamingError, items: usize) -> Self {
        Self {
            code: err.code(),
            info: err.reason().to_string(),
            responses: (0..items).map(|_| Response::from_error(err)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

/// 全部为 `NoNeedUpdate` 时整体也是 `NoNeedUpdate`
fn aggregate_code(codes: impl Iterator<Item = ErrorCode>) -> ErrorCode {
    let mut code = ErrorCode::ExecuteSuccess;
    let mut unchanged = true;
    let mut seen = false;
    for item in codes {
        seen = true;
        if item != ErrorCode::NoNeedUpdate {
            unchanged = false;
        }
        match item.category() {
            ErrorCategory::Success => {}
            ErrorCategory::Infrastructure | ErrorCategory::Timeout => {
                return ErrorCode::ExecuteException;
            }
            _ => code = ErrorCode::BadRequest,
        }
    }
    if seen && unchanged {
        ErrorCode::NoNeedUpdate
    } else {
        code
    }
}

/// 发现类数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverType {
    Services,
    Instances,
    Routing,
    RateLimit,
    CircuitBreaker,
    FaultDetect,
}

/// 发现类读操作的响应
///
/// 客户端 revision 与当前一致时代码为 `DataNoChange`，`data` 为空。
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverResponse<T> {
    pub code: ErrorCode,
    pub kind: DiscoverType,
    pub namespace: String,
    pub service: String,
    pub revision: String,
    pub data: Option<T>,
}

impl<T> DiscoverResponse<T> {
    pub fn from_compared(
        kind: DiscoverType,
        namespace: &str,
        service: &str,
        current: &str,
        compared: Compared<T>,
    ) -> Self {
        let (code, revision, data) = match compared {
            Compared::Unchanged => (ErrorCode::DataNoChange, current.to_string(), None),
            Compared::Changed { payload, revision } => {
                (ErrorCode::ExecuteSuccess, revision, Some(payload))
            }
        };
        Self {
            code,
            kind,
            namespace: namespace.to_string(),
            service: service.to_string(),
            revision,
            data,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.code == ErrorCode::DataNoChange
    }
}

// ============================================================
// 请求
// ============================================================

/// 注册实例请求
#[derive(Debug, Clone, Default)]
pub struct InstanceRequest {
    pub namespace: String,
    pub service: String,
    pub vpc_id: Option<String>,
    pub host: String,
    pub port: u32,
    pub protocol: Option<String>,
    pub version: Option<String>,
    pub weight: Option<u32>,
    pub priority: Option<u32>,
    pub metadata: BTreeMap<String, String>,
    pub location: Option<Location>,
    pub health_check: Option<HealthCheck>,
    pub healthy: Option<bool>,
    /// 不指定时保留已有实例的隔离状态
    pub isolate: Option<bool>,
    pub logic_set: Option<String>,
}

impl InstanceRequest {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        host: impl Into<String>,
        port: u32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey {
            namespace: self.namespace.clone(),
            service: self.service.clone(),
            vpc_id: self.vpc_id.clone().filter(|v| !v.is_empty()),
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// 构建属于 `service_id` 的实例
    pub fn to_instance(&self, service_id: &str) -> Instance {
        let mut instance = Instance::new(&self.key(), service_id);
        instance.protocol = self.protocol.clone();
        instance.version = self.version.clone();
        if let Some(weight) = self.weight {
            instance.weight = weight;
        }
        if let Some(priority) = self.priority {
            instance.priority = priority;
        }
        instance.metadata = self.metadata.clone();
        instance.location = self.location.clone();
        if let Some(health_check) = self.health_check {
            instance.health_check = health_check;
        }
        if let Some(healthy) = self.healthy {
            instance.healthy = healthy;
        }
        instance.isolate = self.isolate.unwrap_or(false);
        instance.logic_set = self.logic_set.clone();
        instance
    }
}

/// 定位一个实例：显式 ID 或身份五元组
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceRef {
    Id(String),
    Key(InstanceKey),
}

impl InstanceRef {
    pub fn id(&self) -> String {
        match self {
            InstanceRef::Id(id) => id.clone(),
            InstanceRef::Key(key) => key.id(),
        }
    }
}

impl From<InstanceKey> for InstanceRef {
    fn from(key: InstanceKey) -> Self {
        InstanceRef::Key(key)
    }
}

/// 修改实例请求，只修改指定了的字段
#[derive(Debug, Clone)]
pub struct InstanceUpdate {
    pub target: InstanceRef,
    pub protocol: Option<String>,
    pub version: Option<String>,
    pub weight: Option<u32>,
    pub priority: Option<u32>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub location: Option<Location>,
    pub health_check: Option<HealthCheck>,
    pub healthy: Option<bool>,
    pub isolate: Option<bool>,
    pub logic_set: Option<String>,
}

impl InstanceUpdate {
    pub fn new(target: impl Into<InstanceRef>) -> Self {
        Self {
            target: target.into(),
            protocol: None,
            version: None,
            weight: None,
            priority: None,
            metadata: None,
            location: None,
            health_check: None,
            healthy: None,
            isolate: None,
            logic_set: None,
        }
    }

    /// 把指定的字段应用到 `instance`
    pub fn apply(&self, instance: &mut Instance) {
        if let Some(protocol) = &self.protocol {
            instance.protocol = Some(protocol.clone());
        }
        if let Some(version) = &self.version {
            instance.version = Some(version.clone());
        }
        if let Some(weight) = self.weight {
            instance.weight = weight;
        }
        if let Some(priority) = self.priority {
            instance.priority = priority;
        }
        if let Some(metadata) = &self.metadata {
            instance.metadata = metadata.clone();
        }
        if let Some(location) = &self.location {
            instance.location = Some(location.clone());
        }
        if let Some(health_check) = self.health_check {
            instance.health_check = health_check;
        }
        if let Some(healthy) = self.healthy {
            instance.healthy = healthy;
        }
        if let Some(isolate) = self.isolate {
            instance.isolate = isolate;
        }
        if let Some(logic_set) = &self.logic_set {
            instance.logic_set = Some(logic_set.clone());
        }
    }
}

/// 隔离状态修改的目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolateTarget {
    Instance(InstanceRef),
    /// 主机上的全部实例，可限定命名空间
    Host {
        namespace: Option<String>,
        host: String,
    },
}
