//! 单实例写请求限流
//!
//! 每个实例 ID 一个令牌桶，桶容量为 `max_burst`，按 `refill_per_sec`
//! 匀速补充。长时间没有请求的桶由后台任务清理。

use crate::config::LimiterConfig;
use crate::runtime::SpawnTask;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_take(&mut self, capacity: f64, refill_per_sec: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// 按实例 ID 限流
pub struct InstanceLimiter {
    config: LimiterConfig,
    buckets: DashMap<String, Bucket>,
}

impl InstanceLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// 是否放行一次针对 `instance_id` 的写请求
    pub fn allow(&self, instance_id: &str) -> bool {
        if !self.config.open {
            return true;
        }
        let capacity = f64::from(self.config.max_burst.max(1));
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(instance_id.to_string())
            .or_insert_with(|| Bucket::full(capacity, now));
        bucket.try_take(capacity, self.config.refill_per_sec, now)
    }

    /// 一次请求涉及多个实例时，全部放行才扣减令牌
    ///
    /// 返回第一个被拒绝的实例 ID，此前已扣减的令牌会归还。
    pub fn allow_all<'a>(&self, instance_ids: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
        if !self.config.open {
            return None;
        }
        let mut taken = Vec::new();
        for id in instance_ids {
            if !self.allow(id) {
                self.refund(&taken);
                return Some(id);
            }
            taken.push(id);
        }
        None
    }

    fn refund(&self, instance_ids: &[&str]) {
        let capacity = f64::from(self.config.max_burst.max(1));
        for id in instance_ids {
            if let Some(mut bucket) = self.buckets.get_mut(*id) {
                bucket.tokens = (bucket.tokens + 1.0).min(capacity);
            }
        }
    }

    /// 清理空闲超过 `idle_purge_secs` 的令牌桶
    pub fn purge_idle(&self) -> usize {
        let idle = Duration::from_secs(self.config.idle_purge_secs);
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < idle);
        let purged = before.saturating_sub(self.buckets.len());
        if purged > 0 {
            debug!(purged, remaining = self.buckets.len(), "Idle rate limit buckets purged");
        }
        purged
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }

    pub fn task(self: Arc<Self>) -> SpawnTask {
        let period = Duration::from_secs(self.config.idle_purge_secs.max(1));
        SpawnTask::periodic("limiter-purge", period, move || {
            let limiter = self.clone();
            async move {
                limiter.purge_idle();
            }
        })
    }
}
