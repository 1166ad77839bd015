//! 存储适配层抽象
//!
//! 持久化后端（SQL、嵌入式 KV 等）都需要实现 [`Store`]。
//! 批量写接口是原子的：要么全部成功，要么整体返回错误，
//! 由批处理层负责把失败归因到具体请求。

pub mod memory;

use crate::model::{Instance, Namespace, RuleFamily, RuleRecord, Service};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 服务级互斥锁，释放即解锁
pub struct ServiceLock {
    _guard: Box<dyn Send + Sync>,
}

impl ServiceLock {
    pub fn new(guard: impl Send + Sync + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

/// 实例布尔属性（隔离、健康）的批量更新项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagUpdate {
    pub id: String,
    pub value: bool,
    pub revision: String,
}

/// 实例分页查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceFilter {
    pub namespace: Option<String>,
    pub service: Option<String>,
    pub host: Option<String>,
    pub port: Option<u32>,
    pub healthy: Option<bool>,
    pub isolate: Option<bool>,
    pub offset: usize,
    pub limit: usize,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &Instance) -> bool {
        self.namespace.as_ref().is_none_or(|v| *v == instance.namespace)
            && self.service.as_ref().is_none_or(|v| *v == instance.service)
            && self.host.as_ref().is_none_or(|v| *v == instance.host)
            && self.port.is_none_or(|v| v == instance.port)
            && self.healthy.is_none_or(|v| v == instance.healthy)
            && self.isolate.is_none_or(|v| v == instance.isolate)
    }
}

/// 服务分页查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFilter {
    pub namespace: Option<String>,
    /// 服务名前缀
    pub name_prefix: Option<String>,
    pub business: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

impl ServiceFilter {
    pub fn matches(&self, service: &Service) -> bool {
        self.namespace.as_ref().is_none_or(|v| *v == service.namespace)
            && self
                .name_prefix
                .as_ref()
                .is_none_or(|p| service.name.starts_with(p.as_str()))
            && self
                .business
                .as_ref()
                .is_none_or(|b| service.business.as_deref() == Some(b.as_str()))
    }
}

/// 存储适配层
///
/// `*_since` 接口返回 mtime 不早于 `since` 的全部记录（包括软删除记录），
/// 供缓存做增量刷新。
#[async_trait]
pub trait Store: Send + Sync {
    // ---- 命名空间 ----

    async fn add_namespace(&self, namespace: Namespace) -> StoreResult<()>;

    async fn get_namespace(&self, name: &str) -> StoreResult<Option<Namespace>>;

    // ---- 服务 ----

    async fn add_service(&self, service: Service) -> StoreResult<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> StoreResult<Option<Service>>;

    async fn get_service_by_id(&self, id: &str) -> StoreResult<Option<Service>>;

    async fn delete_service(&self, id: &str) -> StoreResult<()>;

    /// 指向该服务的有效别名数量
    async fn count_aliases(&self, source_id: &str) -> StoreResult<usize>;

    /// 服务下的有效实例数量
    async fn count_instances(&self, service_id: &str) -> StoreResult<usize>;

    /// 获取服务级互斥锁（删除服务、修改别名时使用）
    async fn lock_service(&self, id: &str) -> StoreResult<ServiceLock>;

    async fn services_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Service>>;

    async fn list_services(&self, filter: &ServiceFilter) -> StoreResult<(usize, Vec<Service>)>;

    // ---- 实例 ----

    /// 只返回有效实例
    async fn get_instances_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Instance>>;

    /// 批量写入（存在则覆盖）
    async fn batch_add_instances(&self, instances: &[Instance]) -> StoreResult<()>;

    async fn update_instance(&self, instance: &Instance) -> StoreResult<()>;

    /// 批量软删除，不存在的 ID 被忽略
    async fn batch_delete_instances(&self, ids: &[String]) -> StoreResult<()>;

    async fn batch_set_isolate(&self, updates: &[FlagUpdate]) -> StoreResult<()>;

    async fn batch_set_health(&self, updates: &[FlagUpdate]) -> StoreResult<()>;

    async fn instances_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Instance>>;

    async fn list_instances(&self, filter: &InstanceFilter) -> StoreResult<(usize, Vec<Instance>)>;

    // ---- 治理规则 ----

    async fn upsert_rule(&self, rule: RuleRecord) -> StoreResult<()>;

    async fn delete_rule(&self, family: RuleFamily, id: &str) -> StoreResult<()>;

    async fn rules_since(
        &self,
        family: RuleFamily,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<RuleRecord>>;
}
