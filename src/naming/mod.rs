//! 注册与发现门面
//!
//! [`NamingServer`] 负责参数校验、限流、鉴权，写请求交给批处理控制器，
//! 读请求走发现缓存。
//!
//! ```rust,no_run
//! use flare_naming::config::NamingConfig;
//! use flare_naming::naming::NamingServer;
//!
//! # async fn run() -> flare_naming::error::Result<()> {
//! let server = NamingServer::builder(NamingConfig::default()).build();
//! let handle = server.start().await?;
//! // ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod discover;
mod instance;
mod query;
mod service;
pub mod validate;

pub use service::{AliasRequest, ServiceRequest};

use crate::auth::{AuthContext, Authority, Operation, TokenAuthority};
use crate::batch::BatchController;
use crate::cache::{CacheEntity, CacheManager, CacheState};
use crate::config::NamingConfig;
use crate::error::{ErrorCategory, ErrorCode, NamingError, Result};
use crate::event::EventHub;
use crate::health::{HealthChecker, HeartbeatRecords};
use crate::limiter::InstanceLimiter;
use crate::metrics::MetricsCollector;
use crate::model::{Instance, Service};
use crate::runtime::{NamingRuntime, RuntimeConfig, RuntimeHandle, SpawnTask};
use crate::singleflight::Group;
use crate::store::{MemoryStore, Store};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 注册中心门面
pub struct NamingServer {
    config: NamingConfig,
    store: Arc<dyn Store>,
    cache: Arc<CacheManager>,
    batch: Arc<BatchController>,
    limiter: Arc<InstanceLimiter>,
    authority: Arc<dyn Authority>,
    events: EventHub,
    records: Arc<HeartbeatRecords>,
    health: Arc<HealthChecker>,
    metrics: MetricsCollector,
    service_flight: Group<Result<Arc<Service>>>,
}

/// [`NamingServer`] 构建器
pub struct NamingServerBuilder {
    config: NamingConfig,
    store: Option<Arc<dyn Store>>,
    authority: Option<Arc<dyn Authority>>,
    events: Option<EventHub>,
}

impl NamingServerBuilder {
    /// 存储后端，默认为内存存储
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// 鉴权钩子，默认按配置构建 [`TokenAuthority`]
    pub fn authority(mut self, authority: Arc<dyn Authority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn events(mut self, events: EventHub) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> NamingServer {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn Store>);
        let authority = self
            .authority
            .unwrap_or_else(|| Arc::new(TokenAuthority::new(config.auth.strict)) as Arc<dyn Authority>);
        let events = self.events.unwrap_or_default();
        let metrics = MetricsCollector::new();

        let cache = Arc::new(CacheManager::new(
            config.cache.clone(),
            store.clone(),
            metrics.clone(),
        ));
        let records = Arc::new(HeartbeatRecords::new());
        let batch = Arc::new(BatchController::new(
            &config.batch,
            store.clone(),
            cache.clients().clone(),
            records.clone(),
            metrics.clone(),
        ));
        let health = Arc::new(HealthChecker::new(
            config.health.clone(),
            store.clone(),
            cache.clone(),
            records.clone(),
            events.clone(),
        ));
        let limiter = Arc::new(InstanceLimiter::new(config.limiter.clone()));

        NamingServer {
            config,
            store,
            cache,
            batch,
            limiter,
            authority,
            events,
            records,
            health,
            metrics,
            service_flight: Group::new(),
        }
    }
}

impl NamingServer {
    pub fn builder(config: NamingConfig) -> NamingServerBuilder {
        NamingServerBuilder {
            config,
            store: None,
            authority: None,
            events: None,
        }
    }

    pub fn config(&self) -> &NamingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn batch(&self) -> &Arc<BatchController> {
        &self.batch
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn health_checker(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    /// 全量加载发现缓存
    pub async fn initialize(&self) -> Result<()> {
        self.cache.initialize().await
    }

    /// 全部后台任务；批处理分片任务只能取一次
    pub fn tasks(&self) -> Vec<SpawnTask> {
        let mut tasks = self.cache.tasks();
        tasks.extend(self.batch.tasks());
        if self.config.health.open {
            tasks.push(self.health.clone().task());
        }
        if self.config.limiter.open {
            tasks.push(self.limiter.clone().task());
        }
        tasks
    }

    /// 加载缓存并启动全部后台任务
    pub async fn start(&self) -> Result<RuntimeHandle> {
        self.initialize().await?;
        let runtime = NamingRuntime::new(RuntimeConfig::from(&self.config.runtime))
            .add_spawn_tasks(self.tasks());
        info!(tasks = runtime.task_count(), "Starting naming server");
        Ok(runtime.start())
    }

    // ============================================================
    // 内部工具
    // ============================================================

    fn admit(&self, instance_id: &str) -> Result<()> {
        if self.limiter.allow(instance_id) {
            Ok(())
        } else {
            warn!(instance_id, "Instance write rate limited");
            Err(NamingError::too_many_requests(instance_id))
        }
    }

    /// 多目标请求的整体准入，任一目标被限流则不扣减任何令牌
    fn admit_all<'a>(&self, instance_ids: impl IntoIterator<Item = &'a str>) -> Result<()> {
        match self.limiter.allow_all(instance_ids) {
            None => Ok(()),
            Some(instance_id) => {
                warn!(instance_id, "Instance write rate limited");
                Err(NamingError::too_many_requests(instance_id))
            }
        }
    }

    async fn authorize(&self, ctx: &AuthContext, service: &Service, operation: Operation) -> Result<()> {
        self.authority.check(ctx, service, operation).await
    }

    /// 按 ID 查找服务，缓存未命中时回源
    async fn service_by_id(&self, id: &str) -> Result<Option<Arc<Service>>> {
        if let Some(service) = self.cache.services().get_by_id(id) {
            return Ok(Some(service));
        }
        Ok(self.store.get_service_by_id(id).await?.map(Arc::new))
    }

    /// 按 ID 读取实例（直接读存储）
    async fn load_instance(&self, id: &str) -> Result<Option<Instance>> {
        let mut found = self.store.get_instances_by_ids(&[id.to_string()]).await?;
        Ok(found.pop())
    }

    fn ensure_loaded(&self, entity: CacheEntity) -> Result<()> {
        match self.cache.state(entity) {
            CacheState::Empty => Err(NamingError::coded(
                ErrorCode::CacheNotReady,
                format!("{} cache is not loaded yet", entity.name()),
            )),
            _ => Ok(()),
        }
    }
}

/// 基础设施错误按错误级别记录，其余按告警记录
fn log_failure(operation: &str, target: &str, err: &NamingError) {
    match err.category() {
        ErrorCategory::Infrastructure | ErrorCategory::Timeout => error!(
            operation,
            target_id = target,
            code = err.code().as_str(),
            error = %err,
            "Naming operation failed"
        ),
        _ => warn!(
            operation,
            target_id = target,
            code = err.code().as_str(),
            reason = err.reason(),
            "Naming operation rejected"
        ),
    }
}
