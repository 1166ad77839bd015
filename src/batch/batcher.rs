//! 分片批处理器
//!
//! 请求按 `shard_key` 哈希到固定分片，每个分片一个后台循环：
//! 攒够 `max_batch_count` 条，或者首条请求到达后经过 `wait_time`，
//! 即把当前批次交给执行器。同一实例总是落在同一分片，
//! 因此对同一实例的并发请求有确定的先后顺序。

use super::future::{BatchFuture, BatchResult, Pending};
use crate::config::BatchConfig;
use crate::error::{ErrorCode, NamingError};
use crate::metrics::{BatchKind, MetricsCollector};
use crate::runtime::SpawnTask;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 批次内的一条请求
pub struct Intent<Req, Res> {
    pub request: Req,
    pub pending: Pending<Res>,
}

/// 刷新原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// 达到条数上限
    Count,
    /// 等待时间到
    Time,
    /// 关闭前排空
    Shutdown,
}

/// 批次执行器
///
/// 执行器负责把批次内每条请求的 `pending` 都写入结果，
/// 包括合并掉的重复请求和存储失败的请求。
#[async_trait]
pub trait BatchExecutor: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    fn kind(&self) -> BatchKind;

    /// 分片与合并使用的身份
    fn shard_key(request: &Self::Request) -> &str;

    async fn execute(&self, batch: Vec<Intent<Self::Request, Self::Response>>);
}

type Sender<E> = mpsc::UnboundedSender<
    Intent<<E as BatchExecutor>::Request, <E as BatchExecutor>::Response>,
>;
type Receiver<E> = mpsc::UnboundedReceiver<
    Intent<<E as BatchExecutor>::Request, <E as BatchExecutor>::Response>,
>;

/// 分片批处理器
pub struct Batcher<E: BatchExecutor> {
    config: BatchConfig,
    executor: Arc<E>,
    metrics: MetricsCollector,
    senders: Vec<Sender<E>>,
    receivers: Mutex<Vec<Receiver<E>>>,
}

impl<E: BatchExecutor> Batcher<E> {
    pub fn new(config: BatchConfig, executor: E, metrics: MetricsCollector) -> Self {
        let shards = if config.open { config.concurrency.max(1) } else { 0 };
        let (senders, receivers): (Vec<Sender<E>>, Vec<Receiver<E>>) =
            (0..shards).map(|_| mpsc::unbounded_channel()).unzip();
        Self {
            config,
            executor: Arc::new(executor),
            metrics,
            senders,
            receivers: Mutex::new(receivers),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn wait_timeout(&self) -> Duration {
        self.config.wait_timeout()
    }

    /// 提交请求
    ///
    /// 批处理开启时只入队，立即返回；关闭时同步执行单条批次，
    /// 返回的句柄已经完成。
    pub async fn submit(&self, request: E::Request) -> BatchFuture<E::Response> {
        let kind = self.executor.kind();
        self.metrics.record_submit(kind);
        let (pending, future) = BatchFuture::pending();
        let intent = Intent { request, pending };

        if self.senders.is_empty() {
            self.metrics.record_flush(kind);
            self.executor.execute(vec![intent]).await;
            return future;
        }

        let shard = shard_of(E::shard_key(&intent.request), self.senders.len());
        if let Err(mpsc::error::SendError(intent)) = self.senders[shard].send(intent) {
            warn!(kind = kind.as_str(), shard, "Batch shard stopped, rejecting request");
            intent.pending.resolve(Err(NamingError::coded(
                ErrorCode::ExecuteException,
                format!("{} batcher is stopped", kind.as_str()),
            )));
        }
        future
    }

    /// 取出所有分片的后台任务，只能成功调用一次
    pub fn tasks(&self) -> Vec<SpawnTask> {
        let kind = self.executor.kind();
        std::mem::take(&mut *self.receivers.lock())
            .into_iter()
            .enumerate()
            .map(|(shard, rx)| {
                let shard_loop = ShardLoop {
                    kind,
                    shard,
                    max_count: self.config.max_batch_count.max(1),
                    wait_time: self.config.wait_time(),
                    executor: self.executor.clone(),
                    metrics: self.metrics.clone(),
                };
                SpawnTask::with_shutdown(
                    format!("batch-{}-{}", kind.as_str(), shard),
                    move |shutdown_rx| async move {
                        shard_loop.run(rx, shutdown_rx).await;
                        Ok(())
                    },
                )
            })
            .collect()
    }
}

/// 同一身份在一个批次内的全部请求，按到达顺序排列
pub struct IdentityGroup<Req, Res> {
    pub key: String,
    pub intents: Vec<Intent<Req, Res>>,
}

impl<Req, Res: Clone> IdentityGroup<Req, Res> {
    /// 最后到达的请求
    pub fn last(&self) -> &Req {
        // 分组时至少放入一条请求
        &self.intents[self.intents.len() - 1].request
    }

    pub fn resolve_all(self, result: BatchResult<Res>) {
        for intent in self.intents {
            intent.pending.resolve(result.clone());
        }
    }

    /// 首条请求拿到 `first`，其余请求拿到 `rest`
    pub fn resolve_split(self, first: BatchResult<Res>, rest: BatchResult<Res>) {
        let mut intents = self.intents.into_iter();
        if let Some(head) = intents.next() {
            head.pending.resolve(first);
        }
        for intent in intents {
            intent.pending.resolve(rest.clone());
        }
    }
}

/// 按身份合并批次，分组顺序为各身份首次出现的顺序
pub fn group_by_identity<E: BatchExecutor>(
    batch: Vec<Intent<E::Request, E::Response>>,
) -> Vec<IdentityGroup<E::Request, E::Response>> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(batch.len());
    let mut groups: Vec<IdentityGroup<E::Request, E::Response>> = Vec::new();
    for intent in batch {
        let key = E::shard_key(&intent.request).to_string();
        match index.get(&key) {
            Some(&i) => groups[i].intents.push(intent),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(IdentityGroup {
                    key,
                    intents: vec![intent],
                });
            }
        }
    }
    groups
}

fn shard_of(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

struct ShardLoop<E: BatchExecutor> {
    kind: BatchKind,
    shard: usize,
    max_count: usize,
    wait_time: Duration,
    executor: Arc<E>,
    metrics: MetricsCollector,
}

impl<E: BatchExecutor> ShardLoop<E> {
    async fn run(&self, mut rx: Receiver<E>, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut buffer = Vec::with_capacity(self.max_count);
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    rx.close();
                    while let Ok(intent) = rx.try_recv() {
                        buffer.push(intent);
                    }
                    self.flush(&mut buffer, FlushReason::Shutdown).await;
                    break;
                }
                received = rx.recv() => match received {
                    Some(intent) => {
                        if buffer.is_empty() {
                            deadline = Some(Instant::now() + self.wait_time);
                        }
                        buffer.push(intent);
                        if buffer.len() >= self.max_count {
                            deadline = None;
                            self.flush(&mut buffer, FlushReason::Count).await;
                        }
                    }
                    None => {
                        self.flush(&mut buffer, FlushReason::Shutdown).await;
                        break;
                    }
                },
                _ = sleep_until(deadline), if deadline.is_some() => {
                    deadline = None;
                    self.flush(&mut buffer, FlushReason::Time).await;
                }
            }
        }

        info!(kind = self.kind.as_str(), shard = self.shard, "Batch shard stopped");
    }

    async fn flush(&self, buffer: &mut Vec<Intent<E::Request, E::Response>>, reason: FlushReason) {
        if buffer.is_empty() {
            return;
        }
        let batch = std::mem::replace(buffer, Vec::with_capacity(self.max_count));
        debug!(
            kind = self.kind.as_str(),
            shard = self.shard,
            count = batch.len(),
            ?reason,
            "Flushing batch"
        );
        self.metrics.record_flush(self.kind);
        self.executor.execute(batch).await;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::future::Outcome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: Arc<AtomicUsize>,
        sizes: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl BatchExecutor for Echo {
        type Request = String;
        type Response = String;

        fn kind(&self) -> BatchKind {
            BatchKind::Client
        }

        fn shard_key(request: &String) -> &str {
            request
        }

        async fn execute(&self, batch: Vec<Intent<String, String>>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sizes.lock().push(batch.len());
            for intent in batch {
                let echoed = intent.request.clone();
                intent.pending.resolve(Ok(Outcome::success(echoed)));
            }
        }
    }

    fn echo() -> (Echo, Arc<AtomicUsize>, Arc<Mutex<Vec<usize>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let sizes = Arc::new(Mutex::new(Vec::new()));
        (
            Echo {
                calls: calls.clone(),
                sizes: sizes.clone(),
            },
            calls,
            sizes,
        )
    }

    fn start(tasks: Vec<SpawnTask>) -> Vec<oneshot::Sender<()>> {
        use crate::runtime::Task;
        tasks
            .into_iter()
            .map(|task| {
                let (tx, rx) = oneshot::channel();
                tokio::spawn(Box::new(task).run(rx));
                tx
            })
            .collect()
    }

    #[test]
    fn same_key_maps_to_same_shard() {
        for shards in 1..8 {
            assert_eq!(shard_of("instance-a", shards), shard_of("instance-a", shards));
            assert!(shard_of("instance-b", shards) < shards);
        }
    }

    #[tokio::test]
    async fn count_threshold_flushes_full_batches() {
        let (executor, calls, sizes) = echo();
        let config = BatchConfig {
            max_batch_count: 4,
            wait_time_ms: 60_000,
            concurrency: 1,
            ..BatchConfig::default()
        };
        let batcher = Batcher::new(config, executor, MetricsCollector::new());
        let _shutdown = start(batcher.tasks());

        let mut futures = Vec::new();
        for i in 0..8 {
            futures.push(batcher.submit(format!("req-{}", i)).await);
        }
        for (i, future) in futures.into_iter().enumerate() {
            let outcome = future.wait(Duration::from_secs(2)).await.unwrap();
            assert_eq!(outcome.entity, Some(format!("req-{}", i)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*sizes.lock(), vec![4, 4]);
    }

    #[tokio::test]
    async fn linger_time_flushes_partial_batch() {
        let (executor, calls, _) = echo();
        let config = BatchConfig {
            max_batch_count: 100,
            wait_time_ms: 20,
            concurrency: 1,
            ..BatchConfig::default()
        };
        let batcher = Batcher::new(config, executor, MetricsCollector::new());
        let _shutdown = start(batcher.tasks());

        let future = batcher.submit("lonely".to_string()).await;
        let outcome = future.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome.entity.as_deref(), Some("lonely"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_pending_requests() {
        let (executor, calls, _) = echo();
        let config = BatchConfig {
            max_batch_count: 100,
            wait_time_ms: 60_000,
            concurrency: 1,
            ..BatchConfig::default()
        };
        let batcher = Batcher::new(config, executor, MetricsCollector::new());
        let shutdown = start(batcher.tasks());

        let future = batcher.submit("drained".to_string()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        for tx in shutdown {
            let _ = tx.send(());
        }

        let outcome = future.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome.entity.as_deref(), Some("drained"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // 分片退出后的提交直接失败，不会无限等待
        tokio::time::sleep(Duration::from_millis(20)).await;
        let late = batcher.submit("late".to_string()).await;
        let err = late.wait(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecuteException);
    }

    #[tokio::test]
    async fn closed_config_executes_inline() {
        let (executor, calls, sizes) = echo();
        let batcher = Batcher::new(BatchConfig::closed(), executor, MetricsCollector::new());
        assert!(batcher.tasks().is_empty());

        let future = batcher.submit("sync".to_string()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let outcome = future.wait(Duration::from_millis(1)).await.unwrap();
        assert_eq!(outcome.entity.as_deref(), Some("sync"));
        assert_eq!(*sizes.lock(), vec![1]);
    }
}
