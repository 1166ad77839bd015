//! 服务发现缓存
//!
//! 服务、实例和四类治理规则各自一个后台刷新任务，按修改时间水位
//! 增量拉取；快照整体原子替换，读者不会看到半更新的数据。
//! 上报客户端只存在于缓存中，由独立任务按 TTL 淘汰。

pub mod client;
pub mod instance;
pub mod refresh;
pub mod revision;
pub mod rule;
pub mod service;

pub use client::ClientCache;
pub use instance::{InstanceCache, InstanceGroup};
pub use refresh::{Applied, CacheState, RefreshControl, RefreshPlan};
pub use revision::{Compared, compare_revision};
pub use rule::{RuleCache, RuleFamilyCache, ScopedRules};
pub use service::{ServiceCache, ServiceGroup};

use crate::config::CacheConfig;
use crate::error::{ErrorCode, Result, map_infra_error};
use crate::metrics::MetricsCollector;
use crate::model::RuleFamily;
use crate::runtime::SpawnTask;
use crate::store::{Store, StoreResult};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 可刷新的实体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntity {
    Services,
    Instances,
    Rules(RuleFamily),
}

impl CacheEntity {
    pub fn all() -> Vec<CacheEntity> {
        let mut entities = vec![CacheEntity::Services, CacheEntity::Instances];
        entities.extend(RuleFamily::ALL.iter().map(|f| CacheEntity::Rules(*f)));
        entities
    }

    pub fn name(&self) -> String {
        match self {
            CacheEntity::Services => "services".to_string(),
            CacheEntity::Instances => "instances".to_string(),
            CacheEntity::Rules(family) => format!("rules-{}", family),
        }
    }
}

/// 缓存管理器
pub struct CacheManager {
    config: CacheConfig,
    store: Arc<dyn Store>,
    metrics: MetricsCollector,
    services: ServiceCache,
    instances: InstanceCache,
    rules: RuleCache,
    clients: Arc<ClientCache>,
    // 同一实体的刷新串行执行，避免两次刷新互相覆盖快照
    gates: [Mutex<()>; 6],
}

impl CacheManager {
    pub fn new(config: CacheConfig, store: Arc<dyn Store>, metrics: MetricsCollector) -> Self {
        let every = config.full_reload_every;
        Self {
            config,
            store,
            metrics,
            services: ServiceCache::new(every),
            instances: InstanceCache::new(every),
            rules: RuleCache::new(every),
            clients: Arc::new(ClientCache::new()),
            gates: Default::default(),
        }
    }

    pub fn services(&self) -> &ServiceCache {
        &self.services
    }

    pub fn instances(&self) -> &InstanceCache {
        &self.instances
    }

    pub fn rules(&self, family: RuleFamily) -> &RuleFamilyCache {
        self.rules.family(family)
    }

    pub fn clients(&self) -> &Arc<ClientCache> {
        &self.clients
    }

    pub fn state(&self, entity: CacheEntity) -> CacheState {
        self.control(entity).state()
    }

    /// 服务实例的 revision：服务 revision 与实例摘要的组合
    ///
    /// 服务不在缓存中时返回 `None`。
    pub fn service_instances_revision(&self, service_id: &str) -> Option<String> {
        let service = self.services.get_by_id(service_id)?;
        let group = self.instances.by_service(service_id);
        Some(revision::service_instances_revision(
            &service.revision,
            group.digest(),
        ))
    }

    fn control(&self, entity: CacheEntity) -> &RefreshControl {
        match entity {
            CacheEntity::Services => self.services.control(),
            CacheEntity::Instances => self.instances.control(),
            CacheEntity::Rules(family) => self.rules.family(family).control(),
        }
    }

    fn gate(&self, entity: CacheEntity) -> &Mutex<()> {
        match entity {
            CacheEntity::Services => &self.gates[0],
            CacheEntity::Instances => &self.gates[1],
            CacheEntity::Rules(family) => &self.gates[2 + family as usize],
        }
    }

    async fn pull(&self, entity: CacheEntity, plan: RefreshPlan) -> StoreResult<Applied> {
        let store = self.store.as_ref();
        match entity {
            CacheEntity::Services => self.services.refresh(store, plan).await,
            CacheEntity::Instances => self.instances.refresh(store, plan, &self.services).await,
            CacheEntity::Rules(family) => self.rules.family(family).refresh(store, plan).await,
        }
    }

    /// 刷新一次指定实体
    ///
    /// 失败只记录日志，已有快照继续可用。
    pub async fn refresh(&self, entity: CacheEntity) -> StoreResult<Applied> {
        let _gate = self.gate(entity).lock().await;
        let control = self.control(entity);
        let (previous, plan) = control.begin();

        match self.pull(entity, plan).await {
            Ok(applied) => {
                control.succeed(plan, applied.max_mtime);
                self.metrics.record_refresh(plan.is_full(), true);
                if applied.changed > 0 {
                    debug!(
                        entity = %entity.name(),
                        full = plan.is_full(),
                        changed = applied.changed,
                        "Cache refreshed"
                    );
                }
                Ok(applied)
            }
            Err(err) => {
                control.fail(previous, plan);
                self.metrics.record_refresh(plan.is_full(), false);
                warn!(
                    entity = %entity.name(),
                    state = ?control.state(),
                    error = %err,
                    "Cache refresh failed, serving last snapshot"
                );
                Err(err)
            }
        }
    }

    /// 依次刷新所有实体（服务先于实例）
    pub async fn refresh_all(&self) {
        for entity in CacheEntity::all() {
            let _ = self.refresh(entity).await;
        }
    }

    /// 启动时的全量加载，任一实体失败即返回错误
    pub async fn initialize(&self) -> Result<()> {
        for entity in CacheEntity::all() {
            self.refresh(entity).await.map_err(|err| {
                map_infra_error(
                    err,
                    ErrorCode::CacheNotReady,
                    format!("failed to load {} cache", entity.name()),
                )
            })?;
        }
        info!(
            services = self.services.len(),
            instances = self.instances.len(),
            "Discovery cache initialized"
        );
        Ok(())
    }

    /// 淘汰过期客户端
    pub fn evict_clients(&self) -> usize {
        let evicted = self
            .clients
            .evict_expired(self.config.client_ttl(), Utc::now());
        if evicted > 0 {
            debug!(evicted, remaining = self.clients.len(), "Expired clients evicted");
        }
        evicted
    }

    /// 每个实体一个刷新任务，外加客户端淘汰任务
    pub fn tasks(self: &Arc<Self>) -> Vec<SpawnTask> {
        let mut tasks: Vec<SpawnTask> = CacheEntity::all()
            .into_iter()
            .map(|entity| {
                let cache = self.clone();
                periodic(
                    format!("cache-refresh-{}", entity.name()),
                    self.config.refresh_interval(),
                    move || {
                        let cache = cache.clone();
                        async move {
                            let _ = cache.refresh(entity).await;
                        }
                    },
                )
            })
            .collect();

        let cache = self.clone();
        tasks.push(periodic(
            "cache-client-evict",
            self.config.client_evict_interval(),
            move || {
                let cache = cache.clone();
                async move {
                    cache.evict_clients();
                }
            },
        ));
        tasks
    }
}

fn periodic<F, Fut>(name: impl Into<String>, period: std::time::Duration, tick: F) -> SpawnTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    SpawnTask::periodic(name, period.max(std::time::Duration::from_millis(1)), tick)
}
