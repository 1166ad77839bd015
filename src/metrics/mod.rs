//! 指标收集模块
//!
//! 批处理与缓存刷新的计数器，读取时生成快照

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 批处理的写操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Register,
    Deregister,
    Isolate,
    Heartbeat,
    Client,
}

impl BatchKind {
    pub const ALL: [BatchKind; 5] = [
        BatchKind::Register,
        BatchKind::Deregister,
        BatchKind::Isolate,
        BatchKind::Heartbeat,
        BatchKind::Client,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Register => "register",
            BatchKind::Deregister => "deregister",
            BatchKind::Isolate => "isolate",
            BatchKind::Heartbeat => "heartbeat",
            BatchKind::Client => "client",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Default)]
struct BatchCounters {
    submitted: AtomicU64,
    flushes: AtomicU64,
    store_calls: AtomicU64,
    store_failures: AtomicU64,
}

#[derive(Default)]
struct RefreshCounters {
    refreshes: AtomicU64,
    full_reloads: AtomicU64,
    failures: AtomicU64,
}

#[derive(Default)]
struct Counters {
    batch: [BatchCounters; 5],
    refresh: RefreshCounters,
}

/// 单个批处理类型的计数快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub submitted: u64,
    pub flushes: u64,
    pub store_calls: u64,
    pub store_failures: u64,
}

/// 指标快照
#[derive(Debug, Clone, Default, Serialize)]
pub struct Metrics {
    pub batch: Vec<(BatchKind, BatchStats)>,
    pub cache_refreshes: u64,
    pub cache_full_reloads: u64,
    pub cache_refresh_failures: u64,
}

impl Metrics {
    pub fn batch(&self, kind: BatchKind) -> BatchStats {
        self.batch
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, stats)| stats.clone())
            .unwrap_or_default()
    }
}

/// 指标收集器
#[derive(Clone, Default)]
pub struct MetricsCollector {
    counters: Arc<Counters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submit(&self, kind: BatchKind) {
        self.counters.batch[kind.index()]
            .submitted
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, kind: BatchKind) {
        self.counters.batch[kind.index()]
            .flushes
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_call(&self, kind: BatchKind, success: bool) {
        let counters = &self.counters.batch[kind.index()];
        counters.store_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            counters.store_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_refresh(&self, full: bool, success: bool) {
        let refresh = &self.counters.refresh;
        refresh.refreshes.fetch_add(1, Ordering::Relaxed);
        if full {
            refresh.full_reloads.fetch_add(1, Ordering::Relaxed);
        }
        if !success {
            refresh.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_metrics(&self) -> Metrics {
        let batch = BatchKind::ALL
            .iter()
            .map(|kind| {
                let c = &self.counters.batch[kind.index()];
                (
                    *kind,
                    BatchStats {
                        submitted: c.submitted.load(Ordering::Relaxed),
                        flushes: c.flushes.load(Ordering::Relaxed),
                        store_calls: c.store_calls.load(Ordering::Relaxed),
                        store_failures: c.store_failures.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        let refresh = &self.counters.refresh;
        Metrics {
            batch,
            cache_refreshes: refresh.refreshes.load(Ordering::Relaxed),
            cache_full_reloads: refresh.full_reloads.load(Ordering::Relaxed),
            cache_refresh_failures: refresh.failures.load(Ordering::Relaxed),
        }
    }
}
