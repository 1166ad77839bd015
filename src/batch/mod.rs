//! 写请求批处理
//!
//! 注册、反注册、隔离、心跳和客户端上报各自一个 [`Batcher`]，
//! 由 [`BatchController`] 统一持有。调用方既可以只提交拿到
//! [`BatchFuture`]，也可以用同名的等待方法直接拿结果。

pub mod batcher;
pub mod client;
pub mod future;
pub mod instance;

pub use batcher::{BatchExecutor, Batcher, FlushReason, IdentityGroup, Intent, group_by_identity};
pub use client::ClientExecutor;
pub use future::{BatchFuture, BatchResult, Outcome, Pending};
pub use instance::{
    CreateExecutor, CreateRequest, DeleteExecutor, DeleteRequest, HeartbeatAck, HeartbeatExecutor,
    HeartbeatRequest, IsolateExecutor, IsolateRequest,
};

use crate::cache::ClientCache;
use crate::config::BatchSettings;
use crate::health::HeartbeatRecords;
use crate::metrics::MetricsCollector;
use crate::model::{Client, Instance};
use crate::runtime::SpawnTask;
use crate::store::Store;
use std::sync::Arc;

/// 批处理控制器
pub struct BatchController {
    register: Batcher<CreateExecutor>,
    deregister: Batcher<DeleteExecutor>,
    isolate: Batcher<IsolateExecutor>,
    heartbeat: Batcher<HeartbeatExecutor>,
    client: Batcher<ClientExecutor>,
}

impl BatchController {
    pub fn new(
        settings: &BatchSettings,
        store: Arc<dyn Store>,
        clients: Arc<ClientCache>,
        records: Arc<HeartbeatRecords>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            register: Batcher::new(
                settings.register.clone(),
                CreateExecutor::new(store.clone(), metrics.clone()),
                metrics.clone(),
            ),
            deregister: Batcher::new(
                settings.deregister.clone(),
                DeleteExecutor::new(store.clone(), metrics.clone()),
                metrics.clone(),
            ),
            isolate: Batcher::new(
                settings.isolate.clone(),
                IsolateExecutor::new(store.clone(), metrics.clone()),
                metrics.clone(),
            ),
            heartbeat: Batcher::new(
                settings.heartbeat.clone(),
                HeartbeatExecutor::new(store, records, metrics.clone()),
                metrics.clone(),
            ),
            client: Batcher::new(settings.client.clone(), ClientExecutor::new(clients), metrics),
        }
    }

    pub async fn submit_create(&self, request: CreateRequest) -> BatchFuture<Instance> {
        self.register.submit(request).await
    }

    pub async fn submit_delete(&self, request: DeleteRequest) -> BatchFuture<Instance> {
        self.deregister.submit(request).await
    }

    pub async fn submit_isolate(&self, request: IsolateRequest) -> BatchFuture<Instance> {
        self.isolate.submit(request).await
    }

    pub async fn submit_heartbeat(&self, request: HeartbeatRequest) -> BatchFuture<HeartbeatAck> {
        self.heartbeat.submit(request).await
    }

    pub async fn submit_client(&self, client: Client) -> BatchFuture<Client> {
        self.client.submit(client).await
    }

    // ---- 提交并等待 ----

    pub async fn create_instance(&self, request: CreateRequest) -> BatchResult<Instance> {
        let future = self.submit_create(request).await;
        future.wait(self.register.wait_timeout()).await
    }

    pub async fn delete_instance(&self, id: impl Into<String>) -> BatchResult<Instance> {
        let future = self.submit_delete(DeleteRequest { id: id.into() }).await;
        future.wait(self.deregister.wait_timeout()).await
    }

    pub async fn update_isolate(&self, id: impl Into<String>, isolate: bool) -> BatchResult<Instance> {
        let request = IsolateRequest {
            id: id.into(),
            isolate,
        };
        let future = self.submit_isolate(request).await;
        future.wait(self.isolate.wait_timeout()).await
    }

    pub async fn heartbeat(&self, id: impl Into<String>) -> BatchResult<HeartbeatAck> {
        let future = self.submit_heartbeat(HeartbeatRequest { id: id.into() }).await;
        future.wait(self.heartbeat.wait_timeout()).await
    }

    pub async fn report_client(&self, client: Client) -> BatchResult<Client> {
        let future = self.submit_client(client).await;
        future.wait(self.client.wait_timeout()).await
    }

    /// 所有分片的后台任务，只能取一次
    pub fn tasks(&self) -> Vec<SpawnTask> {
        let mut tasks = self.register.tasks();
        tasks.extend(self.deregister.tasks());
        tasks.extend(self.isolate.tasks());
        tasks.extend(self.heartbeat.tasks());
        tasks.extend(self.client.tasks());
        tasks
    }
}
