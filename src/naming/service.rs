//! 命名空间、服务与别名的写操作

use super::{NamingServer, log_failure, validate};
use crate::auth::{AuthContext, Operation};
use crate::batch::Outcome;
use crate::error::{ErrorCode, NamingError, Result};
use crate::event::record_history;
use crate::model::{Namespace, Service};
use crate::store::StoreError;
use std::collections::BTreeMap;
use tracing::info;

/// 创建服务请求
#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    pub namespace: String,
    pub name: String,
    pub owners: Option<String>,
    pub business: Option<String>,
    pub department: Option<String>,
    pub comment: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ServiceRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// 创建别名请求
#[derive(Debug, Clone)]
pub struct AliasRequest {
    pub namespace: String,
    pub alias: String,
    pub source_namespace: String,
    pub source_service: String,
}

fn existed(what: &str, name: &str) -> NamingError {
    NamingError::coded(ErrorCode::ExistedResource, format!("{} {} already exists", what, name))
}

fn not_found_namespace(namespace: &str) -> NamingError {
    NamingError::coded(
        ErrorCode::NotFoundNamespace,
        format!("namespace {} not found", namespace),
    )
}

impl NamingServer {
    pub async fn create_namespace(
        &self,
        ctx: &AuthContext,
        name: &str,
        comment: Option<String>,
    ) -> Result<Outcome<Namespace>> {
        validate::check_namespace(name)?;
        let mut namespace = Namespace::new(name);
        namespace.comment = comment;
        match self.store.add_namespace(namespace.clone()).await {
            Ok(()) => {
                info!(namespace = name, "Namespace created");
                record_history("namespace", "create", name, ctx.operator.as_deref());
                Ok(Outcome::success(namespace))
            }
            Err(StoreError::Duplicate(_)) => Err(existed("namespace", name)),
            Err(err) => {
                let err = NamingError::from(err);
                log_failure("create_namespace", name, &err);
                Err(err)
            }
        }
    }

    /// 创建服务，返回值包含服务 token
    pub async fn create_service(&self, ctx: &AuthContext, req: ServiceRequest) -> Result<Outcome<Service>> {
        validate::check_namespace(&req.namespace)?;
        validate::check_service(&req.name)?;
        validate::check_metadata(&req.metadata)?;
        if self.store.get_namespace(&req.namespace).await?.is_none() {
            return Err(not_found_namespace(&req.namespace));
        }

        let mut service = Service::new(&req.namespace, &req.name);
        service.owners = req.owners;
        service.business = req.business;
        service.department = req.department;
        service.comment = req.comment;
        service.metadata = req.metadata;

        match self.store.add_service(service.clone()).await {
            Ok(()) => {
                info!(service_id = %service.id, namespace = %service.namespace, service = %service.name, "Service created");
                record_history("service", "create", &service.id, ctx.operator.as_deref());
                Ok(Outcome::success(service))
            }
            Err(StoreError::Duplicate(_)) => Err(existed("service", &req.name)),
            Err(StoreError::NotFound(_)) => Err(not_found_namespace(&service.namespace)),
            Err(err) => {
                let err = NamingError::from(err);
                log_failure("create_service", &service.name, &err);
                Err(err)
            }
        }
    }

    /// 创建指向直连服务的别名
    pub async fn create_service_alias(
        &self,
        ctx: &AuthContext,
        req: AliasRequest,
    ) -> Result<Outcome<Service>> {
        validate::check_namespace(&req.namespace)?;
        validate::check_service(&req.alias)?;
        validate::check_namespace(&req.source_namespace)?;
        validate::check_service(&req.source_service)?;
        if self.store.get_namespace(&req.namespace).await?.is_none() {
            return Err(not_found_namespace(&req.namespace));
        }

        let source = self
            .store
            .get_service(&req.source_namespace, &req.source_service)
            .await?
            .ok_or_else(|| {
                NamingError::coded(ErrorCode::NotFoundSourceService, "source service not found")
            })?;
        if source.is_alias() {
            return Err(NamingError::coded(
                ErrorCode::AliasOfAlias,
                "an alias cannot point to another alias",
            ));
        }
        self.authorize(ctx, &source, Operation::CreateAlias).await?;

        let _lock = self.store.lock_service(&source.id).await?;
        let alias = Service::alias_of(&req.namespace, &req.alias, &source);
        match self.store.add_service(alias.clone()).await {
            Ok(()) => {
                info!(alias_id = %alias.id, source_id = %source.id, alias = %req.alias, "Service alias created");
                record_history("service_alias", "create", &alias.id, ctx.operator.as_deref());
                Ok(Outcome::success(alias.without_token()))
            }
            Err(StoreError::Duplicate(_)) => Err(existed("service", &req.alias)),
            Err(StoreError::NotFound(_)) => Err(NamingError::coded(
                ErrorCode::NotFoundSourceService,
                "source service not found",
            )),
            Err(err) => {
                let err = NamingError::from(err);
                log_failure("create_service_alias", &req.alias, &err);
                Err(err)
            }
        }
    }

    /// 删除服务或别名
    ///
    /// 服务下仍有实例或别名时拒绝删除；服务不存在时返回成功。
    pub async fn delete_service(
        &self,
        ctx: &AuthContext,
        namespace: &str,
        name: &str,
    ) -> Result<Outcome<Service>> {
        validate::check_namespace(namespace)?;
        validate::check_service(name)?;
        let Some(service) = self.store.get_service(namespace, name).await? else {
            return Ok(Outcome::new(ErrorCode::ExecuteSuccess, None));
        };
        let guard_id = service.reference().unwrap_or(&service.id).to_string();
        let auth_target = match service.reference() {
            Some(source_id) => self.service_by_id(source_id).await?.map(|s| s.as_ref().clone()),
            None => Some(service.clone()),
        };
        if let Some(target) = &auth_target {
            self.authorize(ctx, target, Operation::DeleteService).await?;
        }

        let _lock = self.store.lock_service(&guard_id).await?;
        if !service.is_alias() {
            if self.store.count_instances(&service.id).await? > 0 {
                return Err(NamingError::coded(
                    ErrorCode::ServiceExistedInstances,
                    format!("service {} still has instances", name),
                ));
            }
            if self.store.count_aliases(&service.id).await? > 0 {
                return Err(NamingError::coded(
                    ErrorCode::ServiceExistedAlias,
                    format!("service {} still has aliases", name),
                ));
            }
        }

        match self.store.delete_service(&service.id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {
                info!(service_id = %service.id, namespace, service = name, "Service deleted");
                record_history("service", "delete", &service.id, ctx.operator.as_deref());
                Ok(Outcome::success(service.without_token()))
            }
            Err(err) => {
                let err = NamingError::from(err);
                log_failure("delete_service", name, &err);
                Err(err)
            }
        }
    }
}
