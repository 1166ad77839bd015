//! 心跳健康检查模块
//!
//! 心跳批处理只记录最近一次心跳时间；[`HealthChecker`] 周期性扫描
//! 开启了健康检查的实例，超过 `ttl * expire_multiplier` 没有心跳的
//! 实例被标记为不健康。

use crate::cache::CacheManager;
use crate::config::HealthConfig;
use crate::event::{EventHub, EventKind, InstanceEvent};
use crate::model::{Instance, new_revision};
use crate::runtime::SpawnTask;
use crate::store::{FlagUpdate, Store};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// 最近心跳时间表
#[derive(Default)]
pub struct HeartbeatRecords {
    beats: DashMap<String, DateTime<Utc>>,
}

impl HeartbeatRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, instance_id: &str, at: DateTime<Utc>) {
        self.beats.insert(instance_id.to_string(), at);
    }

    pub fn last_beat(&self, instance_id: &str) -> Option<DateTime<Utc>> {
        self.beats.get(instance_id).map(|entry| *entry.value())
    }

    pub fn remove(&self, instance_id: &str) {
        self.beats.remove(instance_id);
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }
}

/// 心跳过期检查
pub struct HealthChecker {
    config: HealthConfig,
    store: Arc<dyn Store>,
    cache: Arc<CacheManager>,
    records: Arc<HeartbeatRecords>,
    events: EventHub,
}

impl HealthChecker {
    pub fn new(
        config: HealthConfig,
        store: Arc<dyn Store>,
        cache: Arc<CacheManager>,
        records: Arc<HeartbeatRecords>,
        events: EventHub,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            records,
            events,
        }
    }

    /// 判断实例在 `now` 时刻是否已过期
    ///
    /// 从未收到心跳的实例以最后修改时间作为起点。
    fn expired(&self, instance: &Instance, now: DateTime<Utc>) -> bool {
        let last = self
            .records
            .last_beat(&instance.id)
            .unwrap_or(instance.mtime);
        let window = i64::from(instance.health_check.ttl_secs) * i64::from(self.config.expire_multiplier);
        now - last > ChronoDuration::seconds(window)
    }

    /// 执行一轮检查，返回被标记为不健康的实例数量
    pub async fn check_once(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<Instance> = self
            .cache
            .instances()
            .all()
            .into_iter()
            .filter(|i| i.health_check_enabled() && i.healthy && self.expired(i, now))
            .map(|i| i.as_ref().clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let updates: Vec<FlagUpdate> = expired
            .iter()
            .map(|i| FlagUpdate {
                id: i.id.clone(),
                value: false,
                revision: new_revision(),
            })
            .collect();
        if let Err(err) = self.store.batch_set_health(&updates).await {
            error!(count = updates.len(), error = %err, "Failed to mark expired instances unhealthy");
            return 0;
        }

        let count = updates.len();
        for (mut instance, update) in expired.into_iter().zip(updates) {
            info!(
                instance_id = %instance.id,
                host = %instance.host,
                port = instance.port,
                "Heartbeat expired, instance turned unhealthy"
            );
            instance.healthy = false;
            instance.revision = update.revision;
            self.events
                .publish(InstanceEvent::new(EventKind::TurnUnhealthy, instance));
        }
        debug!(count, tracked = self.records.len(), "Health check round finished");
        count
    }

    pub fn task(self: Arc<Self>) -> SpawnTask {
        let period = Duration::from_millis(self.config.check_interval_ms.max(1));
        SpawnTask::periodic("health-checker", period, move || {
            let checker = self.clone();
            async move {
                checker.check_once().await;
            }
        })
    }
}
