//! 缓存刷新控制：状态机与修改时间水位
//!
//! 状态流转 `Empty -> Loading -> Ready`，之后每次刷新
//! `Ready -> Refreshing -> Ready`。刷新失败时回到刷新前的状态，
//! 已有快照继续对外服务。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// 增量查询的回看窗口，覆盖同一时刻写入但晚于上次查询可见的记录
const WATERMARK_OVERLAP_SECS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CacheState {
    Empty = 0,
    Loading = 1,
    Ready = 2,
    Refreshing = 3,
}

impl CacheState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CacheState::Loading,
            2 => CacheState::Ready,
            3 => CacheState::Refreshing,
            _ => CacheState::Empty,
        }
    }
}

/// 本次刷新的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    Full,
    Since(DateTime<Utc>),
}

impl RefreshPlan {
    pub fn is_full(&self) -> bool {
        matches!(self, RefreshPlan::Full)
    }

    /// 存储查询使用的起始时间，全量加载从最早时间开始
    pub fn since(&self) -> DateTime<Utc> {
        match self {
            RefreshPlan::Full => DateTime::<Utc>::MIN_UTC,
            RefreshPlan::Since(since) => *since,
        }
    }
}

/// 一次刷新应用的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// 实际生效的变更条数（跳过未变化的行）
    pub changed: usize,
    /// 本次拉取到的最大修改时间
    pub max_mtime: Option<DateTime<Utc>>,
}

/// 单个实体缓存的刷新控制
pub struct RefreshControl {
    state: AtomicU8,
    watermark: Mutex<Option<DateTime<Utc>>>,
    ticks: AtomicU64,
    force_full: AtomicBool,
    full_reload_every: u64,
}

impl RefreshControl {
    pub fn new(full_reload_every: u64) -> Self {
        Self {
            state: AtomicU8::new(CacheState::Empty as u8),
            watermark: Mutex::new(None),
            ticks: AtomicU64::new(0),
            force_full: AtomicBool::new(false),
            full_reload_every,
        }
    }

    pub fn state(&self) -> CacheState {
        CacheState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 下一次刷新改为全量加载
    pub fn request_full(&self) {
        self.force_full.store(true, Ordering::Release);
    }

    /// 开始一次刷新，返回刷新前的状态与刷新方式
    pub fn begin(&self) -> (CacheState, RefreshPlan) {
        let previous = self.state();
        let next = match previous {
            CacheState::Empty | CacheState::Loading => CacheState::Loading,
            CacheState::Ready | CacheState::Refreshing => CacheState::Refreshing,
        };
        self.state.store(next as u8, Ordering::Release);

        let tick = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        let periodic = self.full_reload_every > 0 && tick % self.full_reload_every == 0;
        let forced = self.force_full.swap(false, Ordering::AcqRel);
        let watermark = *self.watermark.lock();

        let plan = match watermark {
            Some(mark) if !periodic && !forced => {
                RefreshPlan::Since(mark - ChronoDuration::seconds(WATERMARK_OVERLAP_SECS))
            }
            _ => RefreshPlan::Full,
        };
        (previous, plan)
    }

    /// 刷新成功，推进水位
    pub fn succeed(&self, plan: RefreshPlan, max_mtime: Option<DateTime<Utc>>) {
        {
            let mut watermark = self.watermark.lock();
            let next = match (*watermark, max_mtime) {
                (Some(current), Some(seen)) if !plan.is_full() => Some(current.max(seen)),
                (current, None) if !plan.is_full() => current,
                (_, seen) => seen.or(Some(Utc::now())),
            };
            *watermark = next;
        }
        self.state.store(CacheState::Ready as u8, Ordering::Release);
    }

    /// 刷新失败，恢复刷新前的状态；全量加载失败时下一次继续全量
    pub fn fail(&self, previous: CacheState, plan: RefreshPlan) {
        let restored = match previous {
            CacheState::Ready | CacheState::Refreshing => CacheState::Ready,
            CacheState::Empty | CacheState::Loading => CacheState::Empty,
        };
        if plan.is_full() {
            self.request_full();
        }
        self.state.store(restored as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_refresh_is_full_then_incremental() {
        let control = RefreshControl::new(0);
        let (previous, plan) = control.begin();
        assert_eq!(previous, CacheState::Empty);
        assert!(plan.is_full());
        assert_eq!(control.state(), CacheState::Loading);

        let seen = Utc::now();
        control.succeed(plan, Some(seen));
        assert_eq!(control.state(), CacheState::Ready);

        let (previous, plan) = control.begin();
        assert_eq!(previous, CacheState::Ready);
        assert_eq!(control.state(), CacheState::Refreshing);
        assert_eq!(plan, RefreshPlan::Since(seen - ChronoDuration::seconds(1)));
    }

    #[test]
    fn failure_keeps_ready_state() {
        let control = RefreshControl::new(0);
        let (_, plan) = control.begin();
        control.succeed(plan, None);

        let (previous, plan) = control.begin();
        control.fail(previous, plan);
        assert_eq!(control.state(), CacheState::Ready);
    }

    #[test]
    fn failed_initial_load_stays_empty_and_retries_full() {
        let control = RefreshControl::new(0);
        let (previous, plan) = control.begin();
        control.fail(previous, plan);
        assert_eq!(control.state(), CacheState::Empty);
        assert!(control.begin().1.is_full());
    }

    #[test]
    fn periodic_and_forced_full_reload() {
        let control = RefreshControl::new(3);
        let (_, plan) = control.begin();
        control.succeed(plan, Some(Utc::now()));
        assert!(!control.begin().1.is_full());
        assert!(control.begin().1.is_full());

        control.request_full();
        assert!(control.begin().1.is_full());
        assert!(!control.begin().1.is_full());
    }
}
