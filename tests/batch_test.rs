//! 写请求批处理集成测试
//!
//! 使用内存存储，批处理分片任务通过 [`NamingRuntime`] 启动。

use flare_naming::config::{BatchConfig, NamingConfig};
use flare_naming::metrics::BatchKind;
use flare_naming::model::Namespace;
use flare_naming::runtime::RuntimeConfig;
use flare_naming::store::Store;
use flare_naming::{
    AuthContext, ErrorCode, InstanceRequest, MemoryStore, NamingRuntime, NamingServer,
    RuntimeHandle,
};
use futures::future::join_all;
use std::sync::Arc;

fn base_config() -> NamingConfig {
    let mut config = NamingConfig::default();
    config.limiter.open = false;
    config.health.open = false;
    config
}

async fn setup(config: NamingConfig) -> (Arc<NamingServer>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store.add_namespace(Namespace::new("default")).await.unwrap();
    let server = NamingServer::builder(config).store(store.clone()).build();
    (Arc::new(server), store)
}

fn start(server: &NamingServer) -> RuntimeHandle {
    NamingRuntime::new(RuntimeConfig::default())
        .add_spawn_tasks(server.tasks())
        .start()
}

fn echo(port: u32) -> InstanceRequest {
    InstanceRequest::new("default", "echo", "10.0.0.1", port)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_registrations_collapse_into_one_write() {
    let mut config = base_config();
    config.batch.register.wait_time_ms = 200;
    config.batch.register.concurrency = 2;
    let (server, store) = setup(config).await;
    let handle = start(&server);

    let joins = (0..8).map(|_| {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .register_instance(&AuthContext::anonymous(), echo(8080))
                .await
        })
    });
    let outcomes: Vec<_> = join_all(joins)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let created = outcomes
        .iter()
        .filter(|o| o.code == ErrorCode::ExecuteSuccess)
        .count();
    let existed = outcomes
        .iter()
        .filter(|o| o.code == ErrorCode::ExistedResource)
        .count();
    assert_eq!(created, 1);
    assert_eq!(existed, 7);
    assert!(outcomes.iter().all(|o| o.entity.is_some()));

    let id = echo(8080).key().id();
    assert_eq!(store.get_instances_by_ids(&[id]).await.unwrap().len(), 1);
    assert_eq!(store.instance_write_calls(), 1);

    let stats = server.metrics().get_metrics().batch(BatchKind::Register);
    assert_eq!(stats.submitted, 8);
    assert!(stats.flushes < stats.submitted);

    handle.shutdown().await;
}

#[tokio::test]
async fn failed_item_does_not_fail_the_rest_of_the_batch() {
    let mut config = base_config();
    config.batch.register.wait_time_ms = 100;
    config.batch.register.concurrency = 1;
    let (server, store) = setup(config).await;
    let handle = start(&server);

    store.inject_failure(echo(8081).key().id());
    let response = server
        .register_instances(
            &AuthContext::anonymous(),
            vec![echo(8080), echo(8081), echo(8082)],
        )
        .await;

    assert_eq!(response.len(), 3);
    assert_eq!(response.responses[0].code, ErrorCode::ExecuteSuccess);
    assert_eq!(response.responses[1].code, ErrorCode::ExistedResource);
    assert!(response.responses[1].data.is_none());
    assert_eq!(response.responses[2].code, ErrorCode::ExecuteSuccess);
    assert_eq!(response.code, ErrorCode::BadRequest);

    // 一次整体写入，失败后逐条重试三次
    assert_eq!(store.instance_write_calls(), 4);
    let stats = server.metrics().get_metrics().batch(BatchKind::Register);
    assert_eq!(stats.store_failures, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn store_outage_is_reported_as_execute_exception() {
    let mut config = base_config();
    config.batch.register = BatchConfig::closed();
    let (server, store) = setup(config).await;
    // 先建好服务，保证故障只发生在实例写入
    server
        .register_instance(&AuthContext::anonymous(), echo(8080))
        .await
        .unwrap();

    store.set_unavailable(true);
    let response = server
        .register_instances(&AuthContext::anonymous(), vec![echo(8081), echo(8082)])
        .await;
    assert!(response.responses.iter().all(|r| !r.is_success()));
    assert_eq!(response.code, ErrorCode::ExecuteException);
}

#[tokio::test]
async fn closed_batcher_executes_inline() {
    let mut config = base_config();
    config.batch.register = BatchConfig::closed();
    let (server, store) = setup(config).await;

    // 没有启动任何后台任务
    let outcome = server
        .register_instance(&AuthContext::anonymous(), echo(8080))
        .await
        .unwrap();
    assert_eq!(outcome.code, ErrorCode::ExecuteSuccess);
    assert_eq!(store.instance_write_calls(), 1);

    let stats = server.metrics().get_metrics().batch(BatchKind::Register);
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.flushes, 1);
}

#[tokio::test]
async fn waiting_without_a_worker_times_out() {
    let mut config = base_config();
    config.batch.register.wait_timeout_ms = 50;
    let (server, _store) = setup(config).await;

    let err = server
        .register_instance(&AuthContext::anonymous(), echo(8080))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OperationTimeout);
}

#[tokio::test]
async fn re_registration_keeps_isolate_flag() {
    let mut config = base_config();
    config.batch.register = BatchConfig::closed();
    let (server, store) = setup(config).await;
    let ctx = AuthContext::anonymous();

    let mut isolated = echo(8080);
    isolated.isolate = Some(true);
    let first = server.register_instance(&ctx, isolated).await.unwrap();
    assert!(first.entity.unwrap().isolate);

    let mut reweighted = echo(8080);
    reweighted.weight = Some(50);
    let second = server.register_instance(&ctx, reweighted).await.unwrap();
    let instance = second.entity.unwrap();
    assert!(instance.isolate);
    assert_eq!(instance.weight, 50);

    let stored = store
        .get_instances_by_ids(&[instance.id.clone()])
        .await
        .unwrap();
    assert!(stored[0].isolate);
}

#[tokio::test]
async fn identical_re_registration_keeps_revision() {
    let mut config = base_config();
    config.batch.register = BatchConfig::closed();
    let (server, _store) = setup(config).await;
    let ctx = AuthContext::anonymous();

    let first = server.register_instance(&ctx, echo(8080)).await.unwrap();
    let first_revision = first.entity.unwrap().revision;
    let second = server.register_instance(&ctx, echo(8080)).await.unwrap();
    assert_eq!(second.entity.unwrap().revision, first_revision);

    let mut changed = echo(8080);
    changed.version = Some("v2".to_string());
    let third = server.register_instance(&ctx, changed).await.unwrap();
    assert_ne!(third.entity.unwrap().revision, first_revision);
}

#[tokio::test]
async fn concurrent_registrations_create_service_once() {
    let mut config = base_config();
    config.batch.register = BatchConfig::closed();
    let (server, store) = setup(config).await;
    let ctx = AuthContext::anonymous();

    let results = join_all((0..5).map(|port| server.register_instance(&ctx, echo(8000 + port)))).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let service = store.get_service("default", "echo").await.unwrap().unwrap();
    assert!(
        results
            .iter()
            .all(|r| r.as_ref().unwrap().entity.as_ref().unwrap().service_id == service.id)
    );
    assert_eq!(store.count_instances(&service.id).await.unwrap(), 5);
}
