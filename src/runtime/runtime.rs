//! 后台任务运行时
//!
//! [`NamingRuntime`] 收集任务后一次性启动；[`RuntimeHandle::shutdown`]
//! 向每个任务发送关闭信号，在超时时间内等待它们收尾，超时则强制中止。

use super::config::RuntimeConfig;
use super::task::{SpawnTask, Task, TaskResult};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 运行时
pub struct NamingRuntime {
    config: RuntimeConfig,
    tasks: Vec<Box<dyn Task>>,
}

impl NamingRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
        }
    }

    /// 添加任务
    pub fn add_task(mut self, task: Box<dyn Task>) -> Self {
        self.tasks.push(task);
        self
    }

    /// 批量添加由闭包构建的任务
    pub fn add_spawn_tasks(mut self, tasks: impl IntoIterator<Item = SpawnTask>) -> Self {
        self.tasks
            .extend(tasks.into_iter().map(|task| Box::new(task) as Box<dyn Task>));
        self
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// 启动所有任务
    pub fn start(self) -> RuntimeHandle {
        let mut join_set = JoinSet::new();
        let mut shutdowns = Vec::with_capacity(self.tasks.len());

        for task in self.tasks {
            let task_name = task.name().to_string();
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            shutdowns.push(shutdown_tx);

            let task_future = task.run(shutdown_rx);
            join_set.spawn(async move {
                let result = task_future.await;
                match &result {
                    Ok(()) => info!(task_name = %task_name, "✅ Task completed"),
                    Err(e) => error!(task_name = %task_name, error = %e, "❌ Task failed"),
                }
                result
            });
        }

        info!(tasks = shutdowns.len(), "Naming runtime started");
        RuntimeHandle {
            config: self.config,
            join_set,
            shutdowns,
        }
    }
}

/// 已启动运行时的句柄
pub struct RuntimeHandle {
    config: RuntimeConfig,
    join_set: JoinSet<TaskResult>,
    shutdowns: Vec<oneshot::Sender<()>>,
}

impl RuntimeHandle {
    /// 仍在运行的任务数量
    pub fn running(&self) -> usize {
        self.join_set.len()
    }

    /// 优雅关闭所有任务
    pub async fn shutdown(mut self) {
        for tx in self.shutdowns.drain(..) {
            // 任务已经自行退出时接收端不存在
            let _ = tx.send(());
        }

        let join_set = &mut self.join_set;
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while let Some(result) = join_set.join_next().await {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Task completed with error: {}", e),
                    Err(e) => warn!("Task join error: {}", e),
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("All tasks completed"),
            Err(_) => {
                warn!(
                    remaining = self.join_set.len(),
                    "Tasks shutdown timeout, forcing exit"
                );
                self.join_set.abort_all();
            }
        }
    }
}
