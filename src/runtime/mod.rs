//! 后台任务运行时
//!
//! 缓存刷新、批处理分片、健康检查、限流清理都以 [`Task`] 的形式
//! 交给 [`NamingRuntime`]，启动后通过 [`RuntimeHandle`] 统一关闭。

pub mod config;
#[allow(clippy::module_inception)]
pub mod runtime;
pub mod task;

pub use config::RuntimeConfig;
pub use runtime::{NamingRuntime, RuntimeHandle};
pub use task::{SpawnTask, Task, TaskResult};
