//! 注册与发现门面集成测试

use flare_naming::api::{InstanceUpdate, IsolateTarget};
use flare_naming::auth::AllowAll;
use flare_naming::config::{BatchConfig, BatchSettings, NamingConfig};
use flare_naming::model::{HealthCheck, Namespace};
use flare_naming::naming::{AliasRequest, ServiceRequest};
use flare_naming::store::{InstanceFilter, Store};
use flare_naming::{
    AuthContext, ErrorCode, EventKind, InstanceRef, InstanceRequest, MemoryStore, NamingServer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn closed_config() -> NamingConfig {
    let mut config = NamingConfig::default();
    config.limiter.open = false;
    config.health.open = false;
    config.batch = BatchSettings {
        register: BatchConfig::closed(),
        deregister: BatchConfig::closed(),
        isolate: BatchConfig::closed(),
        heartbeat: BatchConfig::closed(),
        client: BatchConfig::closed(),
    };
    config
}

async fn setup(config: NamingConfig) -> (NamingServer, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store.add_namespace(Namespace::new("default")).await.unwrap();
    let server = NamingServer::builder(config).store(store.clone()).build();
    (server, store)
}

fn echo(port: u32) -> InstanceRequest {
    InstanceRequest::new("default", "echo", "10.0.0.1", port)
}

fn alias_request(alias: &str) -> AliasRequest {
    AliasRequest {
        namespace: "default".to_string(),
        alias: alias.to_string(),
        source_namespace: "default".to_string(),
        source_service: "echo".to_string(),
    }
}

// ============================================================
// 反注册
// ============================================================

#[tokio::test]
async fn deregister_is_idempotent() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();

    let missing = server
        .deregister_instance(&ctx, InstanceRef::from(echo(9999).key()))
        .await
        .unwrap();
    assert_eq!(missing.code, ErrorCode::ExecuteSuccess);
    assert!(missing.entity.is_none());

    server.register_instance(&ctx, echo(8080)).await.unwrap();
    let first = server
        .deregister_instance(&ctx, InstanceRef::from(echo(8080).key()))
        .await
        .unwrap();
    assert_eq!(first.code, ErrorCode::ExecuteSuccess);
    assert!(first.entity.is_some());

    let second = server
        .deregister_instance(&ctx, InstanceRef::from(echo(8080).key()))
        .await
        .unwrap();
    assert_eq!(second.code, ErrorCode::ExecuteSuccess);
    assert!(second.entity.is_none());
}

#[tokio::test]
async fn delete_by_host_removes_every_instance_on_it() {
    let (server, store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    for port in [8080, 8081] {
        server.register_instance(&ctx, echo(port)).await.unwrap();
    }
    server
        .register_instance(&ctx, InstanceRequest::new("default", "echo", "10.0.0.2", 8080))
        .await
        .unwrap();

    let response = server
        .delete_instances_by_host(&ctx, Some("default"), "10.0.0.1")
        .await;
    assert_eq!(response.len(), 2);
    assert_eq!(response.code, ErrorCode::ExecuteSuccess);

    let (total, remaining) = store
        .list_instances(&InstanceFilter::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(remaining[0].host, "10.0.0.2");
}

// ============================================================
// 修改
// ============================================================

#[tokio::test]
async fn update_without_changes_keeps_revision() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    let registered = server
        .register_instance(&ctx, echo(8080))
        .await
        .unwrap()
        .entity
        .unwrap();

    let mut same = InstanceUpdate::new(echo(8080).key());
    same.weight = Some(registered.weight);
    let noop = server.update_instance(&ctx, same).await.unwrap();
    assert_eq!(noop.code, ErrorCode::NoNeedUpdate);
    assert_eq!(noop.entity.unwrap().revision, registered.revision);

    let mut isolate = InstanceUpdate::new(echo(8080).key());
    isolate.isolate = Some(true);
    let changed = server.update_instance(&ctx, isolate).await.unwrap();
    assert_eq!(changed.code, ErrorCode::ExecuteSuccess);
    let changed = changed.entity.unwrap();
    assert!(changed.isolate);
    assert_ne!(changed.revision, registered.revision);
}

#[tokio::test]
async fn update_of_missing_instance_is_not_found() {
    let (server, _store) = setup(closed_config()).await;
    let mut update = InstanceUpdate::new(echo(8080).key());
    update.weight = Some(10);
    let err = server
        .update_instance(&AuthContext::anonymous(), update)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFoundInstance);
}

#[tokio::test]
async fn isolate_by_host_reports_no_change_on_repeat() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    for port in [8080, 8081] {
        server.register_instance(&ctx, echo(port)).await.unwrap();
    }
    let target = IsolateTarget::Host {
        namespace: None,
        host: "10.0.0.1".to_string(),
    };

    let first = server
        .update_instance_isolate(&ctx, target.clone(), true)
        .await
        .unwrap();
    assert_eq!(first.code, ErrorCode::ExecuteSuccess);
    assert_eq!(first.len(), 2);
    assert!(
        first
            .responses
            .iter()
            .all(|r| r.data.as_ref().is_some_and(|i| i.isolate))
    );

    let repeat = server
        .update_instance_isolate(&ctx, target, true)
        .await
        .unwrap();
    assert_eq!(repeat.code, ErrorCode::NoNeedUpdate);

    let nowhere = server
        .update_instance_isolate(
            &ctx,
            IsolateTarget::Host {
                namespace: None,
                host: "10.9.9.9".to_string(),
            },
            true,
        )
        .await
        .unwrap_err();
    assert_eq!(nowhere.code(), ErrorCode::NotFoundInstance);
}

#[tokio::test]
async fn isolate_by_host_reports_each_instance() {
    let (server, store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    for port in [8080, 8081] {
        server.register_instance(&ctx, echo(port)).await.unwrap();
    }
    let mut events = server.events().subscribe();
    store.inject_failure(echo(8080).key().id());

    let response = server
        .update_instance_isolate(
            &ctx,
            IsolateTarget::Host {
                namespace: None,
                host: "10.0.0.1".to_string(),
            },
            true,
        )
        .await
        .unwrap();
    assert_eq!(response.len(), 2);
    assert_eq!(response.code, ErrorCode::BadRequest);
    let failed: Vec<_> = response.responses.iter().filter(|r| !r.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].code, ErrorCode::ExistedResource);
    let applied: Vec<_> = response
        .responses
        .iter()
        .filter_map(|r| r.data.as_ref())
        .collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].port, 8081);

    let stored = store
        .get_instances_by_ids(&[echo(8081).key().id()])
        .await
        .unwrap();
    assert!(stored[0].isolate);

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::Isolate);
    assert_eq!(event.instance.port, 8081);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn rate_limited_host_isolate_keeps_tokens_of_other_instances() {
    let mut config = closed_config();
    config.limiter.open = true;
    config.limiter.max_burst = 2;
    config.limiter.refill_per_sec = 0.001;
    let (server, store) = setup(config).await;
    let ctx = AuthContext::anonymous();
    server.register_instance(&ctx, echo(8080)).await.unwrap();
    server.register_instance(&ctx, echo(8081)).await.unwrap();
    server.register_instance(&ctx, echo(8081)).await.unwrap();

    let err = server
        .update_instance_isolate(
            &ctx,
            IsolateTarget::Host {
                namespace: None,
                host: "10.0.0.1".to_string(),
            },
            true,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InstanceTooManyRequests);

    let ids = [echo(8080).key().id(), echo(8081).key().id()];
    let stored = store.get_instances_by_ids(&ids).await.unwrap();
    assert!(stored.iter().all(|i| !i.isolate));
    // 8080 的令牌没有被这次请求消耗
    assert_ok!(server.register_instance(&ctx, echo(8080)).await);
}

// ============================================================
// 服务与别名
// ============================================================

#[tokio::test]
async fn alias_cannot_own_instances() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    server
        .create_service(&ctx, ServiceRequest::new("default", "echo"))
        .await
        .unwrap();
    server
        .create_service_alias(&ctx, alias_request("echo-alias"))
        .await
        .unwrap();

    let err = server
        .register_instance(&ctx, InstanceRequest::new("default", "echo-alias", "10.0.0.1", 8080))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AliasNotSupportInstance);

    let mut chained = alias_request("echo-alias-2");
    chained.source_service = "echo-alias".to_string();
    let err = server.create_service_alias(&ctx, chained).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AliasOfAlias);
}

#[tokio::test]
async fn delete_service_refuses_while_referenced() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    server.register_instance(&ctx, echo(8080)).await.unwrap();

    let err = server.delete_service(&ctx, "default", "echo").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ServiceExistedInstances);

    server
        .deregister_instance(&ctx, InstanceRef::from(echo(8080).key()))
        .await
        .unwrap();
    server
        .create_service_alias(&ctx, alias_request("echo-alias"))
        .await
        .unwrap();
    let err = server.delete_service(&ctx, "default", "echo").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ServiceExistedAlias);

    server
        .delete_service(&ctx, "default", "echo-alias")
        .await
        .unwrap();
    let deleted = server.delete_service(&ctx, "default", "echo").await.unwrap();
    assert_eq!(deleted.code, ErrorCode::ExecuteSuccess);
    assert!(deleted.entity.unwrap().token.is_empty());

    let again = server.delete_service(&ctx, "default", "echo").await.unwrap();
    assert!(again.entity.is_none());
}

#[tokio::test]
async fn create_requires_existing_namespace() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();

    let err = server
        .create_service(&ctx, ServiceRequest::new("prod", "echo"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFoundNamespace);

    assert_ok!(server.create_namespace(&ctx, "prod", None).await);
    assert_ok!(
        server
            .create_service(&ctx, ServiceRequest::new("prod", "echo"))
            .await
    );
    let err = assert_err!(
        server
            .create_service(&ctx, ServiceRequest::new("prod", "echo"))
            .await
    );
    assert_eq!(err.code(), ErrorCode::ExistedResource);

    let err = assert_err!(server.create_namespace(&ctx, "prod", None).await);
    assert_eq!(err.code(), ErrorCode::ExistedResource);
}

#[tokio::test]
async fn disabled_auto_create_rejects_unknown_service() {
    let mut config = closed_config();
    config.naming.auto_create_service = false;
    let (server, _store) = setup(config).await;

    let err = server
        .register_instance(&AuthContext::anonymous(), echo(8080))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFoundService);
}

// ============================================================
// 准入
// ============================================================

#[tokio::test]
async fn per_instance_limiter_rejects_bursts() {
    let mut config = closed_config();
    config.limiter.open = true;
    config.limiter.max_burst = 2;
    config.limiter.refill_per_sec = 0.001;
    let (server, _store) = setup(config).await;
    let ctx = AuthContext::anonymous();

    assert_ok!(server.register_instance(&ctx, echo(8080)).await);
    assert_ok!(server.register_instance(&ctx, echo(8080)).await);
    let err = assert_err!(server.register_instance(&ctx, echo(8080)).await);
    assert_eq!(err.code(), ErrorCode::InstanceTooManyRequests);

    // 其他实例不受影响
    server.register_instance(&ctx, echo(8081)).await.unwrap();

    let status: tonic::Status = err.into();
    assert_eq!(status.code(), tonic::Code::ResourceExhausted);
}

#[tokio::test]
async fn tokens_are_checked_against_the_service() {
    let mut config = closed_config();
    config.auth.strict = true;
    let (server, _store) = setup(config).await;

    let service = server
        .create_service(&AuthContext::anonymous(), ServiceRequest::new("default", "echo"))
        .await
        .unwrap()
        .entity
        .unwrap();

    let err = server
        .register_instance(&AuthContext::anonymous(), echo(8080))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAllowedAccess);

    let err = server
        .register_instance(&AuthContext::with_token("wrong"), echo(8080))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidServiceToken);

    let ctx = AuthContext::with_token(service.token.clone()).operator("alice");
    let outcome = server.register_instance(&ctx, echo(8080)).await.unwrap();
    assert_eq!(outcome.code, ErrorCode::ExecuteSuccess);
}

#[tokio::test]
async fn custom_authority_replaces_token_checks() {
    let mut config = closed_config();
    config.auth.strict = true;
    let store = Arc::new(MemoryStore::new());
    store.add_namespace(Namespace::new("default")).await.unwrap();
    let server = NamingServer::builder(config)
        .store(store)
        .authority(Arc::new(AllowAll))
        .build();

    let outcome = server
        .register_instance(&AuthContext::anonymous(), echo(8080))
        .await
        .unwrap();
    assert_eq!(outcome.code, ErrorCode::ExecuteSuccess);
}

// ============================================================
// 批量请求
// ============================================================

#[tokio::test]
async fn batch_responses_follow_request_order() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();

    let response = server
        .register_instances(
            &ctx,
            vec![
                echo(8080),
                InstanceRequest::new("default", "echo", "", 8081),
                echo(8082),
            ],
        )
        .await;
    assert_eq!(response.len(), 3);
    assert!(response.responses[0].is_success());
    assert!(!response.responses[1].is_success());
    assert!(response.responses[2].is_success());
    assert_eq!(response.responses[0].data.as_ref().unwrap().port, 8080);
    assert_eq!(response.responses[2].data.as_ref().unwrap().port, 8082);
    assert_eq!(response.code, ErrorCode::BadRequest);

    let empty = server.register_instances(&ctx, Vec::new()).await;
    assert_eq!(empty.code, ErrorCode::EmptyRequest);
    assert!(empty.is_empty());

    let oversized = (0..101).map(echo).collect();
    let rejected = server.register_instances(&ctx, oversized).await;
    assert_eq!(rejected.code, ErrorCode::BatchSizeOverLimit);
    assert_eq!(rejected.len(), 101);
}

#[tokio::test]
async fn oversized_batches_answer_every_item() {
    let mut config = closed_config();
    config.naming.max_batch_request = 2;
    let (server, store) = setup(config).await;
    let ctx = AuthContext::anonymous();

    let registered = server
        .register_instances(&ctx, vec![echo(8080), echo(8081), echo(8082)])
        .await;
    assert_eq!(registered.code, ErrorCode::BatchSizeOverLimit);
    assert_eq!(registered.len(), 3);
    assert!(
        registered
            .responses
            .iter()
            .all(|r| r.code == ErrorCode::BatchSizeOverLimit && r.data.is_none())
    );
    assert_eq!(store.instance_write_calls(), 0);

    let targets = (8080..8083)
        .map(|port| InstanceRef::from(echo(port).key()))
        .collect::<Vec<_>>();
    assert_eq!(server.deregister_instances(&ctx, targets.clone()).await.len(), 3);
    assert_eq!(server.heartbeats(targets).await.len(), 3);
}

// ============================================================
// 心跳、健康检查与事件
// ============================================================

#[tokio::test]
async fn expired_instance_turns_unhealthy_and_recovers_on_heartbeat() {
    let mut config = closed_config();
    config.health.expire_multiplier = 1;
    let (server, _store) = setup(config).await;
    let ctx = AuthContext::anonymous();
    let mut events = server.events().subscribe();

    let mut req = echo(8080);
    req.health_check = Some(HealthCheck {
        enabled: true,
        ttl_secs: 1,
    });
    server.register_instance(&ctx, req).await.unwrap();
    let online = events.recv().await.unwrap();
    assert_eq!(online.kind, EventKind::Online);

    server.cache().refresh_all().await;
    assert_eq!(server.health_checker().check_once().await, 0);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(server.health_checker().check_once().await, 1);
    let unhealthy = events.recv().await.unwrap();
    assert_eq!(unhealthy.kind, EventKind::TurnUnhealthy);
    assert!(!unhealthy.instance.healthy);

    let beat = server
        .heartbeat(InstanceRef::from(echo(8080).key()))
        .await
        .unwrap();
    assert!(beat.entity.unwrap().healthy);
    let healthy = events.recv().await.unwrap();
    assert_eq!(healthy.kind, EventKind::TurnHealthy);

    // 心跳之后不再过期
    server.cache().refresh_all().await;
    assert_eq!(server.health_checker().check_once().await, 0);
}

#[tokio::test]
async fn heartbeat_requires_health_check() {
    let (server, _store) = setup(closed_config()).await;
    server
        .register_instance(&AuthContext::anonymous(), echo(8080))
        .await
        .unwrap();

    let err = server
        .heartbeat(InstanceRef::from(echo(8080).key()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::HeartbeatOnDisabledInstance);

    let err = server
        .heartbeat(InstanceRef::from(echo(9090).key()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFoundInstance);
}

#[tokio::test]
async fn instance_changes_are_published() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    let mut events = server.events().subscribe();

    server.register_instance(&ctx, echo(8080)).await.unwrap();
    let mut update = InstanceUpdate::new(echo(8080).key());
    update.isolate = Some(true);
    server.update_instance(&ctx, update).await.unwrap();
    server
        .deregister_instance(&ctx, InstanceRef::from(echo(8080).key()))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    for _ in 0..4 {
        kinds.push(events.recv().await.unwrap().kind);
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::Online,
            EventKind::Update,
            EventKind::Isolate,
            EventKind::Offline
        ]
    );
}

// ============================================================
// 查询与配置
// ============================================================

#[tokio::test]
async fn queries_page_through_store() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    for port in 8080..8085 {
        server.register_instance(&ctx, echo(port)).await.unwrap();
    }

    let (total, page) = server
        .list_instances(InstanceFilter {
            service: Some("echo".to_string()),
            offset: 1,
            limit: 2,
            ..InstanceFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 5);
    assert_eq!(page.iter().map(|i| i.port).collect::<Vec<_>>(), vec![8081, 8082]);

    let (total, services) = server.list_services(Default::default()).await.unwrap();
    assert_eq!(total, 1);
    assert!(services[0].token.is_empty());

    server.cache().refresh_all().await;
    let found = server.get_instance_by_id(&echo(8080).key().id()).unwrap();
    assert_eq!(found.port, 8080);
}

#[test]
fn config_sections_fall_back_to_defaults() {
    let config = NamingConfig::from_toml_str(
        r#"
        [naming]
        auto_create_service = false

        [batch.register]
        open = false
        max_batch_count = 16

        [cache]
        refresh_interval_ms = 250

        [auth]
        strict = true
        "#,
    )
    .unwrap();

    assert!(!config.naming.auto_create_service);
    assert_eq!(config.naming.max_batch_request, 100);
    assert!(!config.batch.register.open);
    assert_eq!(config.batch.register.max_batch_count, 16);
    assert_eq!(config.batch.register.wait_time_ms, 32);
    assert!(config.batch.heartbeat.open);
    assert_eq!(config.cache.refresh_interval(), Duration::from_millis(250));
    assert_eq!(config.cache.client_ttl_secs, 120);
    assert!(config.auth.strict);
    assert_eq!(config.logging.level, "info");
}
