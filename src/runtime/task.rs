//! 后台任务抽象
//!
//! 缓存刷新、批处理分片、健康检查等后台循环都包装成 [`Task`]，
//! 由 [`NamingRuntime`](super::NamingRuntime) 统一启动和关闭。

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::oneshot;

/// 任务执行结果
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

/// 任务 trait
pub trait Task: Send {
    /// 任务名称（用于日志）
    fn name(&self) -> &str;

    /// 运行任务，收到 `shutdown_rx` 信号后应尽快收尾退出
    fn run(self: Box<Self>, shutdown_rx: oneshot::Receiver<()>) -> TaskFuture;
}

/// 由闭包构建的任务
pub struct SpawnTask {
    name: String,
    future_fn: Box<dyn FnOnce(oneshot::Receiver<()>) -> TaskFuture + Send + 'static>,
}

impl SpawnTask {
    /// 创建需要关闭信号的任务
    pub fn with_shutdown<F, Fut>(name: impl Into<String>, future_fn: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            future_fn: Box::new(move |shutdown_rx| Box::pin(future_fn(shutdown_rx))),
        }
    }

    /// 创建周期任务：每隔 `period` 调用一次 `tick`，直到收到关闭信号
    ///
    /// 第一次调用发生在启动后一个周期，初始加载由调用方自行完成。
    pub fn periodic<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_shutdown(name, move |mut shutdown_rx| async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => tick().await,
                }
            }
            Ok(())
        })
    }
}

impl Task for SpawnTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Box<Self>, shutdown_rx: oneshot::Receiver<()>) -> TaskFuture {
        (self.future_fn)(shutdown_rx)
    }
}
