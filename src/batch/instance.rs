//! 实例写操作的批次执行器
//!
//! 每个执行器的流程相同：按实例 ID 合并批次，批量读取现有记录，
//! 发起一次批量存储调用；批量调用整体失败时逐条重试，
//! 让失败只落到对应的请求上。

use super::batcher::{BatchExecutor, Intent, group_by_identity};
use super::future::Outcome;
use crate::error::{ErrorCode, NamingError};
use crate::health::HeartbeatRecords;
use crate::metrics::{BatchKind, MetricsCollector};
use crate::model::{Instance, new_revision};
use crate::store::{FlagUpdate, Store, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn};

/// 注册请求
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub instance: Instance,
    /// 显式指定的隔离状态，`None` 表示沿用已有实例的状态
    pub isolate: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct IsolateRequest {
    pub id: String,
    pub isolate: bool,
}

#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub id: String,
}

/// 心跳结果
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatAck {
    pub instance: Instance,
    /// 本次心跳把实例从不健康恢复为健康
    pub turned_healthy: bool,
}

/// 先整体调用，失败后逐条调用，返回与 `items` 一一对应的结果
async fn store_with_fallback<T, F, Fut>(
    kind: BatchKind,
    metrics: &MetricsCollector,
    items: Vec<T>,
    call: F,
) -> Vec<StoreResult<()>>
where
    T: Clone,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = StoreResult<()>>,
{
    if items.is_empty() {
        return Vec::new();
    }

    let count = items.len();
    let bulk = call(items.clone()).await;
    metrics.record_store_call(kind, bulk.is_ok());
    match bulk {
        Ok(()) => vec![Ok(()); count],
        Err(err) if count == 1 => vec![Err(err)],
        Err(err) => {
            warn!(
                kind = kind.as_str(),
                count,
                error = %err,
                "Bulk store call failed, retrying items one by one"
            );
            let mut results = Vec::with_capacity(count);
            for item in items {
                let single = call(vec![item]).await;
                metrics.record_store_call(kind, single.is_ok());
                results.push(single);
            }
            results
        }
    }
}

async fn load_existing(
    store: &dyn Store,
    ids: Vec<String>,
) -> Result<HashMap<String, Instance>, NamingError> {
    let instances = store.get_instances_by_ids(&ids).await?;
    Ok(instances.into_iter().map(|i| (i.id.clone(), i)).collect())
}

fn store_failure(kind: BatchKind, instance_id: &str, err: StoreError) -> NamingError {
    match err {
        StoreError::Unavailable(_) | StoreError::Internal(_) => {
            error!(kind = kind.as_str(), instance_id, error = %err, "Store layer exception");
        }
        _ => warn!(kind = kind.as_str(), instance_id, error = %err, "Store rejected write"),
    }
    NamingError::from(err)
}

// ============================================================
// 注册
// ============================================================

pub struct CreateExecutor {
    store: Arc<dyn Store>,
    metrics: MetricsCollector,
}

impl CreateExecutor {
    pub fn new(store: Arc<dyn Store>, metrics: MetricsCollector) -> Self {
        Self { store, metrics }
    }
}

/// 合并同一实例的注册请求
///
/// 属性取最后一条请求；隔离状态取最后一次显式指定的值，
/// 都没有指定时保留已有实例的状态。
fn merge_create(intents: &[Intent<CreateRequest, Instance>], existing: Option<&Instance>) -> Instance {
    let last = &intents[intents.len() - 1].request;
    let mut merged = last.instance.clone();
    merged.isolate = intents
        .iter()
        .rev()
        .find_map(|i| i.request.isolate)
        .or(existing.map(|e| e.isolate))
        .unwrap_or(false);

    match existing {
        Some(current) if current.same_attributes(&merged) => {
            merged.revision = current.revision.clone();
            merged.ctime = current.ctime;
        }
        Some(current) => {
            merged.revision = new_revision();
            merged.ctime = current.ctime;
        }
        None => merged.revision = new_revision(),
    }
    merged
}

#[async_trait]
impl BatchExecutor for CreateExecutor {
    type Request = CreateRequest;
    type Response = Instance;

    fn kind(&self) -> BatchKind {
        BatchKind::Register
    }

    fn shard_key(request: &CreateRequest) -> &str {
        &request.instance.id
    }

    async fn execute(&self, batch: Vec<Intent<CreateRequest, Instance>>) {
        let groups = group_by_identity::<Self>(batch);
        let ids = groups.iter().map(|g| g.key.clone()).collect();
        let existing = match load_existing(self.store.as_ref(), ids).await {
            Ok(existing) => existing,
            Err(err) => {
                error!(count = groups.len(), error = %err, "Failed to load instances for registration");
                for group in groups {
                    group.resolve_all(Err(err.clone()));
                }
                return;
            }
        };

        let merged: Vec<Instance> = groups
            .iter()
            .map(|g| merge_create(&g.intents, existing.get(&g.key)))
            .collect();

        let store = self.store.clone();
        let results = store_with_fallback(self.kind(), &self.metrics, merged.clone(), |items| {
            let store = store.clone();
            async move { store.batch_add_instances(&items).await }
        })
        .await;

        for ((group, instance), result) in groups.into_iter().zip(merged).zip(results) {
            match result {
                Ok(()) => group.resolve_split(
                    Ok(Outcome::success(instance.clone())),
                    Ok(Outcome::new(ErrorCode::ExistedResource, Some(instance))),
                ),
                Err(StoreError::NotFound(_)) => group.resolve_all(Err(
                    NamingError::not_found_service(&instance.namespace, &instance.service),
                )),
                Err(err) => group.resolve_all(Err(store_failure(self.kind(), &instance.id, err))),
            }
        }
    }
}

// ============================================================
// 反注册
// ============================================================

pub struct DeleteExecutor {
    store: Arc<dyn Store>,
    metrics: MetricsCollector,
}

impl DeleteExecutor {
    pub fn new(store: Arc<dyn Store>, metrics: MetricsCollector) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl BatchExecutor for DeleteExecutor {
    type Request = DeleteRequest;
    /// 被删除的实例，实例本就不存在时为 `None`
    type Response = Instance;

    fn kind(&self) -> BatchKind {
        BatchKind::Deregister
    }

    fn shard_key(request: &DeleteRequest) -> &str {
        &request.id
    }

    async fn execute(&self, batch: Vec<Intent<DeleteRequest, Instance>>) {
        let groups = group_by_identity::<Self>(batch);
        let ids = groups.iter().map(|g| g.key.clone()).collect();
        let mut existing = match load_existing(self.store.as_ref(), ids).await {
            Ok(existing) => existing,
            Err(err) => {
                error!(count = groups.len(), error = %err, "Failed to load instances for deregistration");
                for group in groups {
                    group.resolve_all(Err(err.clone()));
                }
                return;
            }
        };

        let targets: Vec<String> = groups
            .iter()
            .filter(|g| existing.contains_key(&g.key))
            .map(|g| g.key.clone())
            .collect();
        let store = self.store.clone();
        let results = store_with_fallback(self.kind(), &self.metrics, targets.clone(), |ids| {
            let store = store.clone();
            async move { store.batch_delete_instances(&ids).await }
        })
        .await;
        let mut results: HashMap<String, StoreResult<()>> = targets.into_iter().zip(results).collect();

        for group in groups {
            let gone = Ok(Outcome::new(ErrorCode::ExecuteSuccess, None));
            match results.remove(&group.key) {
                None => group.resolve_all(gone),
                Some(Ok(())) => {
                    let deleted = existing.remove(&group.key);
                    group.resolve_split(Ok(Outcome::new(ErrorCode::ExecuteSuccess, deleted)), gone);
                }
                Some(Err(err)) => {
                    let err = store_failure(self.kind(), &group.key, err);
                    group.resolve_all(Err(err));
                }
            }
        }
    }
}

// ============================================================
// 隔离状态
// ============================================================

pub struct IsolateExecutor {
    store: Arc<dyn Store>,
    metrics: MetricsCollector,
}

impl IsolateExecutor {
    pub fn new(store: Arc<dyn Store>, metrics: MetricsCollector) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl BatchExecutor for IsolateExecutor {
    type Request = IsolateRequest;
    type Response = Instance;

    fn kind(&self) -> BatchKind {
        BatchKind::Isolate
    }

    fn shard_key(request: &IsolateRequest) -> &str {
        &request.id
    }

    async fn execute(&self, batch: Vec<Intent<IsolateRequest, Instance>>) {
        let groups = group_by_identity::<Self>(batch);
        let ids = groups.iter().map(|g| g.key.clone()).collect();
        let existing = match load_existing(self.store.as_ref(), ids).await {
            Ok(existing) => existing,
            Err(err) => {
                error!(count = groups.len(), error = %err, "Failed to load instances for isolate update");
                for group in groups {
                    group.resolve_all(Err(err.clone()));
                }
                return;
            }
        };

        let mut updates = Vec::new();
        let mut pending = Vec::new();
        for group in groups {
            let target = group.last().isolate;
            match existing.get(&group.key) {
                None => {
                    let err = NamingError::not_found_instance(group.key.clone());
                    group.resolve_all(Err(err));
                }
                Some(current) if current.isolate == target => {
                    let current = current.clone();
                    group.resolve_all(Ok(Outcome::new(ErrorCode::NoNeedUpdate, Some(current))));
                }
                Some(current) => {
                    let mut updated = current.clone();
                    updated.isolate = target;
                    updated.revision = new_revision();
                    updates.push(FlagUpdate {
                        id: updated.id.clone(),
                        value: target,
                        revision: updated.revision.clone(),
                    });
                    pending.push((group, updated));
                }
            }
        }

        let store = self.store.clone();
        let results = store_with_fallback(self.kind(), &self.metrics, updates, |updates| {
            let store = store.clone();
            async move { store.batch_set_isolate(&updates).await }
        })
        .await;

        for ((group, updated), result) in pending.into_iter().zip(results) {
            match result {
                Ok(()) => group.resolve_split(
                    Ok(Outcome::success(updated.clone())),
                    Ok(Outcome::new(ErrorCode::NoNeedUpdate, Some(updated))),
                ),
                Err(err) => {
                    let err = store_failure(self.kind(), &updated.id, err);
                    group.resolve_all(Err(err));
                }
            }
        }
    }
}

// ============================================================
// 心跳
// ============================================================

pub struct HeartbeatExecutor {
    store: Arc<dyn Store>,
    records: Arc<HeartbeatRecords>,
    metrics: MetricsCollector,
}

impl HeartbeatExecutor {
    pub fn new(store: Arc<dyn Store>, records: Arc<HeartbeatRecords>, metrics: MetricsCollector) -> Self {
        Self {
            store,
            records,
            metrics,
        }
    }
}

#[async_trait]
impl BatchExecutor for HeartbeatExecutor {
    type Request = HeartbeatRequest;
    type Response = HeartbeatAck;

    fn kind(&self) -> BatchKind {
        BatchKind::Heartbeat
    }

    fn shard_key(request: &HeartbeatRequest) -> &str {
        &request.id
    }

    async fn execute(&self, batch: Vec<Intent<HeartbeatRequest, HeartbeatAck>>) {
        let groups = group_by_identity::<Self>(batch);
        let ids = groups.iter().map(|g| g.key.clone()).collect();
        let existing = match load_existing(self.store.as_ref(), ids).await {
            Ok(existing) => existing,
            Err(err) => {
                error!(count = groups.len(), error = %err, "Failed to load instances for heartbeat");
                for group in groups {
                    group.resolve_all(Err(err.clone()));
                }
                return;
            }
        };

        let now = Utc::now();
        let mut updates = Vec::new();
        let mut recovering = Vec::new();
        for group in groups {
            let Some(current) = existing.get(&group.key) else {
                let err = NamingError::not_found_instance(group.key.clone());
                group.resolve_all(Err(err));
                continue;
            };
            if !current.health_check_enabled() {
                let err = NamingError::coded(
                    ErrorCode::HeartbeatOnDisabledInstance,
                    format!("health check is disabled for instance {}", current.id),
                );
                group.resolve_all(Err(err));
                continue;
            }

            self.records.record(&current.id, now);
            if current.healthy {
                let ack = HeartbeatAck {
                    instance: current.clone(),
                    turned_healthy: false,
                };
                group.resolve_all(Ok(Outcome::success(ack)));
            } else {
                let mut updated = current.clone();
                updated.healthy = true;
                updated.revision = new_revision();
                updates.push(FlagUpdate {
                    id: updated.id.clone(),
                    value: true,
                    revision: updated.revision.clone(),
                });
                recovering.push((group, updated));
            }
        }

        let store = self.store.clone();
        let results = store_with_fallback(self.kind(), &self.metrics, updates, |updates| {
            let store = store.clone();
            async move { store.batch_set_health(&updates).await }
        })
        .await;

        for ((group, updated), result) in recovering.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    let first = HeartbeatAck {
                        instance: updated.clone(),
                        turned_healthy: true,
                    };
                    let rest = HeartbeatAck {
                        instance: updated,
                        turned_healthy: false,
                    };
                    group.resolve_split(Ok(Outcome::success(first)), Ok(Outcome::success(rest)));
                }
                Err(err) => {
                    let err = store_failure(self.kind(), &updated.id, err);
                    group.resolve_all(Err(err));
                }
            }
        }
    }
}
