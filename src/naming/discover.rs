//! 带 revision 的发现类读操作
//!
//! 全部从缓存读取；别名先解析为源服务，响应中的命名空间与服务名
//! 保持为请求中的名字。

use super::{NamingServer, validate};
use crate::api::{DiscoverResponse, DiscoverType};
use crate::cache::{CacheEntity, compare_revision, revision};
use crate::error::{NamingError, Result};
use crate::model::{Instance, RuleFamily, RuleRecord, Service};
use std::sync::Arc;

impl NamingServer {
    fn resolve_cached(&self, namespace: &str, service: &str) -> Result<Arc<Service>> {
        validate::check_namespace(namespace)?;
        validate::check_service(service)?;
        self.ensure_loaded(CacheEntity::Services)?;
        self.cache
            .services()
            .resolve(namespace, service)
            .ok_or_else(|| NamingError::not_found_service(namespace, service))
    }

    /// 命名空间下的服务列表（不含 token）
    pub fn get_service_with_cache(
        &self,
        namespace: &str,
        client_revision: Option<&str>,
    ) -> Result<DiscoverResponse<Vec<Service>>> {
        validate::check_namespace(namespace)?;
        self.ensure_loaded(CacheEntity::Services)?;

        let group = self.cache.services().namespace_services(namespace);
        let current = match &group {
            Some(group) => group.revision().to_string(),
            None => revision::services_digest(&[]),
        };
        let compared = compare_revision(client_revision, &current, || {
            group
                .as_ref()
                .map(|g| g.services().iter().map(|s| s.without_token()).collect())
                .unwrap_or_default()
        });
        Ok(DiscoverResponse::from_compared(
            DiscoverType::Services,
            namespace,
            "",
            &current,
            compared,
        ))
    }

    /// 服务实例列表
    ///
    /// 返回全部有效实例，隔离与不健康的实例带着对应标记一起返回。
    pub fn service_instances_cache(
        &self,
        namespace: &str,
        service: &str,
        client_revision: Option<&str>,
    ) -> Result<DiscoverResponse<Vec<Instance>>> {
        let source = self.resolve_cached(namespace, service)?;
        self.ensure_loaded(CacheEntity::Instances)?;

        let group = self.cache.instances().by_service(&source.id);
        let current = revision::service_instances_revision(&source.revision, group.digest());
        let compared = compare_revision(client_revision, &current, || {
            group.instances().iter().map(|i| i.as_ref().clone()).collect()
        });
        Ok(DiscoverResponse::from_compared(
            DiscoverType::Instances,
            namespace,
            service,
            &current,
            compared,
        ))
    }

    fn rules_with_cache(
        &self,
        family: RuleFamily,
        kind: DiscoverType,
        namespace: &str,
        service: &str,
        client_revision: Option<&str>,
    ) -> Result<DiscoverResponse<Vec<RuleRecord>>> {
        let source = self.resolve_cached(namespace, service)?;
        self.ensure_loaded(CacheEntity::Rules(family))?;

        let scoped = self
            .cache
            .rules(family)
            .for_service(&source.namespace, &source.name);
        let current = scoped.revision;
        let rules = scoped.rules;
        let compared = compare_revision(client_revision, &current, || {
            rules.iter().map(|r| r.as_ref().clone()).collect()
        });
        Ok(DiscoverResponse::from_compared(
            kind, namespace, service, &current, compared,
        ))
    }

    pub fn get_routing_config_with_cache(
        &self,
        namespace: &str,
        service: &str,
        client_revision: Option<&str>,
    ) -> Result<DiscoverResponse<Vec<RuleRecord>>> {
        self.rules_with_cache(
            RuleFamily::Routing,
            DiscoverType::Routing,
            namespace,
            service,
            client_revision,
        )
    }

    pub fn get_rate_limit_with_cache(
        &self,
        namespace: &str,
        service: &str,
        client_revision: Option<&str>,
    ) -> Result<DiscoverResponse<Vec<RuleRecord>>> {
        self.rules_with_cache(
            RuleFamily::RateLimit,
            DiscoverType::RateLimit,
            namespace,
            service,
            client_revision,
        )
    }

    pub fn get_circuit_breaker_with_cache(
        &self,
        namespace: &str,
        service: &str,
        client_revision: Option<&str>,
    ) -> Result<DiscoverResponse<Vec<RuleRecord>>> {
        self.rules_with_cache(
            RuleFamily::CircuitBreaker,
            DiscoverType::CircuitBreaker,
            namespace,
            service,
            client_revision,
        )
    }

    pub fn get_fault_detect_with_cache(
        &self,
        namespace: &str,
        service: &str,
        client_revision: Option<&str>,
    ) -> Result<DiscoverResponse<Vec<RuleRecord>>> {
        self.rules_with_cache(
            RuleFamily::FaultDetect,
            DiscoverType::FaultDetect,
            namespace,
            service,
            client_revision,
        )
    }
}
