//! 服务发现缓存集成测试
//!
//! 所有写操作关闭批处理同步执行，缓存通过 `refresh_all` 手动刷新。

use flare_naming::config::{BatchConfig, BatchSettings, NamingConfig};
use flare_naming::model::{Namespace, RuleFamily, RuleRecord};
use flare_naming::naming::{AliasRequest, ServiceRequest};
use flare_naming::store::Store;
use flare_naming::{
    AuthContext, CacheEntity, CacheState, Client, ErrorCode, InstanceRef, InstanceRequest,
    MemoryStore, NamingServer,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

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

async fn register(server: &NamingServer, port: u32) {
    let req = InstanceRequest::new("default", "echo", "10.0.0.1", port);
    let outcome = server
        .register_instance(&AuthContext::anonymous(), req)
        .await
        .unwrap();
    assert_eq!(outcome.code, ErrorCode::ExecuteSuccess);
}

#[tokio::test]
async fn reads_before_first_load_report_cache_not_ready() {
    let (server, _store) = setup(closed_config()).await;
    register(&server, 8080).await;

    let err = server
        .service_instances_cache("default", "echo", None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CacheNotReady);
    assert_eq!(server.cache().state(CacheEntity::Instances), CacheState::Empty);
}

#[tokio::test]
async fn unchanged_revision_returns_no_data() {
    let (server, _store) = setup(closed_config()).await;
    register(&server, 8080).await;
    server.cache().refresh_all().await;

    let first = server
        .service_instances_cache("default", "echo", None)
        .unwrap();
    assert_eq!(first.code, ErrorCode::ExecuteSuccess);
    assert_eq!(first.data.as_ref().map(Vec::len), Some(1));

    let again = server
        .service_instances_cache("default", "echo", None)
        .unwrap();
    assert_eq!(again.revision, first.revision);

    let unchanged = server
        .service_instances_cache("default", "echo", Some(&first.revision))
        .unwrap();
    assert!(unchanged.is_unchanged());
    assert_eq!(unchanged.code, ErrorCode::DataNoChange);
    assert!(unchanged.data.is_none());
    assert_eq!(unchanged.revision, first.revision);
}

#[tokio::test]
async fn stale_revision_returns_full_set() {
    let (server, _store) = setup(closed_config()).await;
    register(&server, 8080).await;
    server.cache().refresh_all().await;
    let before = server
        .service_instances_cache("default", "echo", None)
        .unwrap();

    register(&server, 8081).await;
    server.cache().refresh_all().await;

    let after = server
        .service_instances_cache("default", "echo", Some(&before.revision))
        .unwrap();
    assert_eq!(after.code, ErrorCode::ExecuteSuccess);
    assert_ne!(after.revision, before.revision);
    assert_eq!(after.data.map(|d| d.len()), Some(2));
}

#[tokio::test]
async fn isolated_instances_stay_visible_with_flag() {
    let (server, _store) = setup(closed_config()).await;
    let mut req = InstanceRequest::new("default", "echo", "10.0.0.1", 8080);
    req.isolate = Some(true);
    server
        .register_instance(&AuthContext::anonymous(), req)
        .await
        .unwrap();
    register(&server, 8081).await;
    server.cache().refresh_all().await;

    let instances = server
        .service_instances_cache("default", "echo", None)
        .unwrap()
        .data
        .unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances.iter().filter(|i| i.isolate).count(), 1);
}

#[tokio::test]
async fn failed_refresh_keeps_serving_last_snapshot() {
    let (server, store) = setup(closed_config()).await;
    register(&server, 8080).await;
    server.cache().refresh_all().await;
    let before = server
        .service_instances_cache("default", "echo", None)
        .unwrap();

    store.set_unavailable(true);
    assert!(server.cache().refresh(CacheEntity::Instances).await.is_err());
    assert_eq!(server.cache().state(CacheEntity::Instances), CacheState::Ready);

    let during = server
        .service_instances_cache("default", "echo", None)
        .unwrap();
    assert_eq!(during.revision, before.revision);
    assert_eq!(during.data.map(|d| d.len()), Some(1));

    let metrics = server.metrics().get_metrics();
    assert_eq!(metrics.cache_refresh_failures, 1);

    store.set_unavailable(false);
    assert!(server.cache().refresh(CacheEntity::Instances).await.is_ok());
}

#[tokio::test]
async fn deregistered_instance_leaves_the_snapshot() {
    let (server, _store) = setup(closed_config()).await;
    register(&server, 8080).await;
    register(&server, 8081).await;
    server.cache().refresh_all().await;

    let id = InstanceRequest::new("default", "echo", "10.0.0.1", 8080)
        .key()
        .id();
    server
        .deregister_instance(&AuthContext::anonymous(), InstanceRef::Id(id.clone()))
        .await
        .unwrap();
    server.cache().refresh_all().await;

    let instances = server
        .service_instances_cache("default", "echo", None)
        .unwrap()
        .data
        .unwrap();
    assert_eq!(instances.len(), 1);
    assert!(instances.iter().all(|i| i.id != id));
    assert!(server.get_instance_by_id(&id).is_err());
}

#[tokio::test]
async fn alias_reads_resolve_to_source_service() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    server
        .create_service(&ctx, ServiceRequest::new("default", "echo"))
        .await
        .unwrap();
    server
        .create_service_alias(
            &ctx,
            AliasRequest {
                namespace: "default".to_string(),
                alias: "echo-alias".to_string(),
                source_namespace: "default".to_string(),
                source_service: "echo".to_string(),
            },
        )
        .await
        .unwrap();
    register(&server, 8080).await;
    server.cache().refresh_all().await;

    let direct = server
        .service_instances_cache("default", "echo", None)
        .unwrap();
    let aliased = server
        .service_instances_cache("default", "echo-alias", None)
        .unwrap();
    assert_eq!(aliased.service, "echo-alias");
    assert_eq!(aliased.revision, direct.revision);
    assert_eq!(aliased.data.map(|d| d.len()), Some(1));

    let missing = server
        .service_instances_cache("default", "nope", None)
        .unwrap_err();
    assert_eq!(missing.code(), ErrorCode::NotFoundService);
}

#[tokio::test]
async fn service_list_hides_tokens() {
    let (server, _store) = setup(closed_config()).await;
    let ctx = AuthContext::anonymous();
    for name in ["alpha", "beta"] {
        let created = server
            .create_service(&ctx, ServiceRequest::new("default", name))
            .await
            .unwrap();
        assert!(!created.entity.unwrap().token.is_empty());
    }
    server.cache().refresh_all().await;

    let listed = server.get_service_with_cache("default", None).unwrap();
    let services = listed.data.unwrap();
    assert_eq!(services.len(), 2);
    assert!(services.iter().all(|s| s.token.is_empty()));

    let unchanged = server
        .get_service_with_cache("default", Some(&listed.revision))
        .unwrap();
    assert!(unchanged.is_unchanged());
}

#[tokio::test]
async fn rule_families_change_independently() {
    let (server, store) = setup(closed_config()).await;
    server
        .create_service(&AuthContext::anonymous(), ServiceRequest::new("default", "echo"))
        .await
        .unwrap();
    store
        .upsert_rule(RuleRecord::new(
            RuleFamily::Routing,
            "default",
            "echo",
            "canary",
            json!({"weight": 10}),
        ))
        .await
        .unwrap();
    server.cache().refresh_all().await;

    let routing = server
        .get_routing_config_with_cache("default", "echo", None)
        .unwrap();
    assert_eq!(routing.data.as_ref().map(Vec::len), Some(1));
    let limits = server
        .get_rate_limit_with_cache("default", "echo", None)
        .unwrap();
    assert_eq!(limits.data.as_ref().map(Vec::len), Some(0));

    store
        .upsert_rule(RuleRecord::new(
            RuleFamily::Routing,
            "default",
            "*",
            "namespace-wide",
            json!({}),
        ))
        .await
        .unwrap();
    server.cache().refresh_all().await;

    let routing_after = server
        .get_routing_config_with_cache("default", "echo", Some(&routing.revision))
        .unwrap();
    assert_eq!(routing_after.code, ErrorCode::ExecuteSuccess);
    assert_eq!(routing_after.data.map(|d| d.len()), Some(2));

    let limits_after = server
        .get_rate_limit_with_cache("default", "echo", Some(&limits.revision))
        .unwrap();
    assert!(limits_after.is_unchanged());
    assert!(
        server
            .get_circuit_breaker_with_cache("default", "echo", None)
            .unwrap()
            .data
            .unwrap()
            .is_empty()
    );
    assert!(
        server
            .get_fault_detect_with_cache("default", "echo", None)
            .unwrap()
            .data
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn deleted_rule_disappears_after_refresh() {
    let (server, store) = setup(closed_config()).await;
    server
        .create_service(&AuthContext::anonymous(), ServiceRequest::new("default", "echo"))
        .await
        .unwrap();
    let rule = RuleRecord::new(RuleFamily::FaultDetect, "*", "*", "global", json!({}));
    let rule_id = rule.id.clone();
    store.upsert_rule(rule).await.unwrap();
    server.cache().refresh_all().await;
    let before = server
        .get_fault_detect_with_cache("default", "echo", None)
        .unwrap();
    assert_eq!(before.data.as_ref().map(Vec::len), Some(1));

    store
        .delete_rule(RuleFamily::FaultDetect, &rule_id)
        .await
        .unwrap();
    server.cache().refresh_all().await;
    let after = server
        .get_fault_detect_with_cache("default", "echo", Some(&before.revision))
        .unwrap();
    assert_ne!(after.revision, before.revision);
    assert_eq!(after.data.map(|d| d.len()), Some(0));
}

#[tokio::test]
async fn reported_clients_expire_after_ttl() {
    let mut config = closed_config();
    config.cache.client_ttl_secs = 0;
    let (server, _store) = setup(config).await;

    let outcome = server
        .report_client(Client::new("sdk-1", "10.0.0.9"))
        .await
        .unwrap();
    assert_eq!(outcome.code, ErrorCode::ExecuteSuccess);

    let batch = server
        .report_clients(vec![Client::new("sdk-2", "10.0.0.10"), Client::new("", "10.0.0.11")])
        .await;
    assert!(batch.responses[0].is_success());
    assert!(!batch.responses[1].is_success());
    assert_eq!(server.list_clients(0, 10).0, 2);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.cache().evict_clients(), 2);
    assert_eq!(server.list_clients(0, 10).0, 0);
}
