//! 实例写操作

use super::{NamingServer, log_failure, validate};
use crate::api::{BatchResponse, InstanceRef, InstanceRequest, InstanceUpdate, IsolateTarget, Response};
use crate::auth::{AuthContext, Operation};
use crate::batch::{BatchResult, CreateRequest, Outcome};
use crate::error::{ErrorCode, NamingError, Result};
use crate::event::{EventKind, InstanceEvent, record_history};
use crate::model::{Client, Instance, Service, new_revision, service_key};
use crate::store::{InstanceFilter, StoreError};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

fn request_span(operation: &'static str, target: &str) -> tracing::Span {
    info_span!("naming", op = operation, target_id = target, request_id = %Uuid::new_v4().simple())
}

fn isolate_event(isolate: bool) -> EventKind {
    if isolate {
        EventKind::Isolate
    } else {
        EventKind::CloseIsolate
    }
}

impl NamingServer {
    // ============================================================
    // 注册
    // ============================================================

    /// 注册实例
    ///
    /// 服务不存在且允许自动创建时，同一服务的并发注册只会创建一次服务。
    pub async fn register_instance(
        &self,
        ctx: &AuthContext,
        req: InstanceRequest,
    ) -> Result<Outcome<Instance>> {
        let target = req.key().id();
        let span = request_span("register_instance", &target);
        async {
            let result = self.register_instance_inner(ctx, req).await;
            if let Err(err) = &result {
                log_failure("register_instance", &target, err);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn register_instance_inner(
        &self,
        ctx: &AuthContext,
        req: InstanceRequest,
    ) -> Result<Outcome<Instance>> {
        validate::check_instance_request(&req)?;
        let id = req.key().id();
        self.admit(&id)?;

        let service = self.resolve_or_create_service(&req.namespace, &req.service).await?;
        if service.is_alias() {
            return Err(NamingError::coded(
                ErrorCode::AliasNotSupportInstance,
                format!("{} is an alias and cannot own instances", req.service),
            ));
        }
        self.authorize(ctx, &service, Operation::RegisterInstance).await?;

        let request = CreateRequest {
            instance: req.to_instance(&service.id),
            isolate: req.isolate,
        };
        let outcome = self.batch.create_instance(request).await?;
        if outcome.code == ErrorCode::ExecuteSuccess {
            if let Some(instance) = &outcome.entity {
                info!(
                    instance_id = %instance.id,
                    service_id = %service.id,
                    host = %instance.host,
                    port = instance.port,
                    "Instance registered"
                );
                self.events
                    .publish(InstanceEvent::new(EventKind::Online, instance.clone()));
                record_history("instance", "create", &instance.id, ctx.operator.as_deref());
            }
        }
        Ok(outcome)
    }

    /// 批量注册，结果顺序与请求顺序一致
    pub async fn register_instances(
        &self,
        ctx: &AuthContext,
        reqs: Vec<InstanceRequest>,
    ) -> BatchResponse<Instance> {
        if let Err(err) = validate::check_batch_size(reqs.len(), self.config.naming.max_batch_request) {
            return BatchResponse::rejected(&err, reqs.len());
        }
        let results = join_all(reqs.into_iter().map(|req| self.register_instance(ctx, req))).await;
        BatchResponse::new(results.into_iter().map(Response::from).collect())
    }

    /// 查找服务，缓存和存储都没有时按配置自动创建
    async fn resolve_or_create_service(&self, namespace: &str, name: &str) -> Result<Arc<Service>> {
        if let Some(service) = self.cache.services().get_by_name(namespace, name) {
            return Ok(service);
        }
        let key = service_key(namespace, name);
        let (result, shared) = self
            .service_flight
            .work(&key, || self.load_or_create_service(namespace, name))
            .await;
        if shared {
            debug!(service = %key, "Joined in-flight service resolution");
        }
        result
    }

    async fn load_or_create_service(&self, namespace: &str, name: &str) -> Result<Arc<Service>> {
        if let Some(service) = self.store.get_service(namespace, name).await? {
            return Ok(Arc::new(service));
        }
        if !self.config.naming.auto_create_service {
            return Err(NamingError::not_found_service(namespace, name));
        }

        let service = Service::new(namespace, name);
        match self.store.add_service(service.clone()).await {
            Ok(()) => {
                info!(service_id = %service.id, namespace, service = name, "Service auto created");
                record_history("service", "create", &service.id, None);
                Ok(Arc::new(service))
            }
            // 并发创建，以已存在的服务为准
            Err(StoreError::Duplicate(_)) => self
                .store
                .get_service(namespace, name)
                .await?
                .map(Arc::new)
                .ok_or_else(|| NamingError::not_found_service(namespace, name)),
            Err(StoreError::NotFound(_)) => Err(NamingError::coded(
                ErrorCode::NotFoundNamespace,
                format!("namespace {} not found", namespace),
            )),
            Err(err) => Err(err.into()),
        }
    }

    // ============================================================
    // 反注册
    // ============================================================

    /// 反注册实例，实例不存在时同样返回成功
    pub async fn deregister_instance(
        &self,
        ctx: &AuthContext,
        target: InstanceRef,
    ) -> Result<Outcome<Instance>> {
        let id = target.id();
        let span = request_span("deregister_instance", &id);
        async {
            let result = self.deregister_instance_inner(ctx, &id).await;
            if let Err(err) = &result {
                log_failure("deregister_instance", &id, err);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn deregister_instance_inner(&self, ctx: &AuthContext, id: &str) -> Result<Outcome<Instance>> {
        validate::check_instance_id(id)?;
        self.admit(id)?;

        let existing = match self.cache.instances().get(id) {
            Some(instance) => Some(instance.as_ref().clone()),
            None => self.load_instance(id).await?,
        };
        let Some(existing) = existing else {
            return Ok(Outcome::new(ErrorCode::ExecuteSuccess, None));
        };
        if let Some(service) = self.service_by_id(&existing.service_id).await? {
            self.authorize(ctx, &service, Operation::DeregisterInstance).await?;
        }

        let outcome = self.batch.delete_instance(id).await?;
        if let Some(deleted) = &outcome.entity {
            info!(instance_id = %deleted.id, host = %deleted.host, port = deleted.port, "Instance deregistered");
            self.records.remove(&deleted.id);
            self.events
                .publish(InstanceEvent::new(EventKind::Offline, deleted.clone()));
            record_history("instance", "delete", &deleted.id, ctx.operator.as_deref());
        }
        Ok(outcome)
    }

    pub async fn deregister_instances(
        &self,
        ctx: &AuthContext,
        targets: Vec<InstanceRef>,
    ) -> BatchResponse<Instance> {
        if let Err(err) = validate::check_batch_size(targets.len(), self.config.naming.max_batch_request) {
            return BatchResponse::rejected(&err, targets.len());
        }
        let results = join_all(targets.into_iter().map(|t| self.deregister_instance(ctx, t))).await;
        BatchResponse::new(results.into_iter().map(Response::from).collect())
    }

    /// 删除主机上的全部实例，可限定命名空间
    pub async fn delete_instances_by_host(
        &self,
        ctx: &AuthContext,
        namespace: Option<&str>,
        host: &str,
    ) -> BatchResponse<Instance> {
        let instances = match self.instances_on_host(namespace, host).await {
            Ok(instances) => instances,
            Err(err) => {
                log_failure("delete_instances_by_host", host, &err);
                return BatchResponse::rejected(&err, 0);
            }
        };
        let results = join_all(
            instances
                .into_iter()
                .map(|i| self.deregister_instance(ctx, InstanceRef::Id(i.id))),
        )
        .await;
        BatchResponse::new(results.into_iter().map(Response::from).collect())
    }

    async fn instances_on_host(&self, namespace: Option<&str>, host: &str) -> Result<Vec<Instance>> {
        validate::check_host(host)?;
        if let Some(namespace) = namespace {
            validate::check_namespace(namespace)?;
        }
        let filter = InstanceFilter {
            namespace: namespace.map(str::to_string),
            host: Some(host.to_string()),
            ..InstanceFilter::default()
        };
        let (_, instances) = self.store.list_instances(&filter).await?;
        Ok(instances)
    }

    // ============================================================
    // 修改
    // ============================================================

    /// 修改实例属性
    ///
    /// 没有任何属性变化时返回 `NoNeedUpdate`，revision 保持不变。
    pub async fn update_instance(
        &self,
        ctx: &AuthContext,
        update: InstanceUpdate,
    ) -> Result<Outcome<Instance>> {
        let id = update.target.id();
        let span = request_span("update_instance", &id);
        async {
            let result = self.update_instance_inner(ctx, &id, &update).await;
            if let Err(err) = &result {
                log_failure("update_instance", &id, err);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn update_instance_inner(
        &self,
        ctx: &AuthContext,
        id: &str,
        update: &InstanceUpdate,
    ) -> Result<Outcome<Instance>> {
        validate::check_instance_id(id)?;
        validate::check_instance_update(update)?;
        self.admit(id)?;

        let current = self
            .load_instance(id)
            .await?
            .ok_or_else(|| NamingError::not_found_instance(id))?;
        if let Some(service) = self.service_by_id(&current.service_id).await? {
            self.authorize(ctx, &service, Operation::UpdateInstance).await?;
        }

        let mut next = current.clone();
        update.apply(&mut next);
        if next.same_attributes(&current) {
            return Ok(Outcome::new(ErrorCode::NoNeedUpdate, Some(current)));
        }

        next.revision = new_revision();
        self.store.update_instance(&next).await.map_err(|err| match err {
            StoreError::NotFound(_) => NamingError::not_found_instance(id),
            other => other.into(),
        })?;

        info!(instance_id = %next.id, revision = %next.revision, "Instance updated");
        self.events
            .publish(InstanceEvent::new(EventKind::Update, next.clone()));
        if next.isolate != current.isolate {
            self.events
                .publish(InstanceEvent::new(isolate_event(next.isolate), next.clone()));
        }
        record_history("instance", "update", &next.id, ctx.operator.as_deref());
        Ok(Outcome::success(next))
    }

    pub async fn update_instances(
        &self,
        ctx: &AuthContext,
        updates: Vec<InstanceUpdate>,
    ) -> BatchResponse<Instance> {
        if let Err(err) = validate::check_batch_size(updates.len(), self.config.naming.max_batch_request) {
            return BatchResponse::rejected(&err, updates.len());
        }
        let results = join_all(updates.into_iter().map(|u| self.update_instance(ctx, u))).await;
        BatchResponse::new(results.into_iter().map(Response::from).collect())
    }

    /// 修改隔离状态
    ///
    /// 目标解析、限流或鉴权失败时整个请求被拒绝，不会写入任何实例；
    /// 之后每个目标实例各自一条结果。全部目标都已是期望状态时整体为 `NoNeedUpdate`。
    pub async fn update_instance_isolate(
        &self,
        ctx: &AuthContext,
        target: IsolateTarget,
        isolate: bool,
    ) -> Result<BatchResponse<Instance>> {
        let label = match &target {
            IsolateTarget::Instance(r) => r.id(),
            IsolateTarget::Host { host, .. } => host.clone(),
        };
        let span = request_span("update_instance_isolate", &label);
        async {
            let result = self.update_isolate_inner(ctx, target, isolate).await;
            match &result {
                Err(err) => log_failure("update_instance_isolate", &label, err),
                Ok(response) => {
                    for failed in response.responses.iter().filter(|r| !r.is_success()) {
                        debug!(target_id = %label, code = failed.code.as_str(), "Isolate item failed");
                    }
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn update_isolate_inner(
        &self,
        ctx: &AuthContext,
        target: IsolateTarget,
        isolate: bool,
    ) -> Result<BatchResponse<Instance>> {
        let targets = match target {
            IsolateTarget::Instance(r) => {
                let id = r.id();
                validate::check_instance_id(&id)?;
                let instance = self
                    .load_instance(&id)
                    .await?
                    .ok_or_else(|| NamingError::not_found_instance(&id))?;
                vec![instance]
            }
            IsolateTarget::Host { namespace, host } => {
                self.instances_on_host(namespace.as_deref(), &host).await?
            }
        };
        if targets.is_empty() {
            return Err(NamingError::coded(
                ErrorCode::NotFoundInstance,
                "no instance matches the isolate target",
            ));
        }

        let mut authorized: HashSet<String> = HashSet::new();
        for instance in &targets {
            if authorized.insert(instance.service_id.clone()) {
                if let Some(service) = self.service_by_id(&instance.service_id).await? {
                    self.authorize(ctx, &service, Operation::UpdateIsolate).await?;
                }
            }
        }
        self.admit_all(targets.iter().map(|instance| instance.id.as_str()))?;

        let results: Vec<BatchResult<Instance>> = join_all(
            targets
                .iter()
                .map(|instance| self.batch.update_isolate(instance.id.clone(), isolate)),
        )
        .await;

        for result in &results {
            if let Ok(Outcome {
                code: ErrorCode::ExecuteSuccess,
                entity: Some(instance),
            }) = result
            {
                self.events
                    .publish(InstanceEvent::new(isolate_event(isolate), instance.clone()));
                record_history("instance", "update_isolate", &instance.id, ctx.operator.as_deref());
            }
        }
        Ok(BatchResponse::new(results.into_iter().map(Response::from).collect()))
    }

    // ============================================================
    // 心跳与客户端上报
    // ============================================================

    /// 实例心跳
    pub async fn heartbeat(&self, target: InstanceRef) -> Result<Outcome<Instance>> {
        let id = target.id();
        let result: Result<Outcome<Instance>> = async {
            validate::check_instance_id(&id)?;
            let outcome = self.batch.heartbeat(id.clone()).await?;
            let Some(ack) = outcome.entity else {
                return Ok(Outcome::new(outcome.code, None));
            };
            if ack.turned_healthy {
                info!(instance_id = %ack.instance.id, "Heartbeat received, instance turned healthy");
                self.events
                    .publish(InstanceEvent::new(EventKind::TurnHealthy, ack.instance.clone()));
            }
            Ok(Outcome::new(outcome.code, Some(ack.instance)))
        }
        .await;
        if let Err(err) = &result {
            log_failure("heartbeat", &id, err);
        }
        result
    }

    pub async fn heartbeats(&self, targets: Vec<InstanceRef>) -> BatchResponse<Instance> {
        if let Err(err) = validate::check_batch_size(targets.len(), self.config.naming.max_batch_request) {
            return BatchResponse::rejected(&err, targets.len());
        }
        let results = join_all(targets.into_iter().map(|t| self.heartbeat(t))).await;
        BatchResponse::new(results.into_iter().map(Response::from).collect())
    }

    /// 客户端上报，只写入缓存
    pub async fn report_client(&self, client: Client) -> Result<Outcome<Client>> {
        if client.id.is_empty() || client.id.len() > validate::MAX_NAME_LENGTH {
            return Err(NamingError::invalid_parameter("invalid client id"));
        }
        validate::check_host(&client.host)?;
        let id = client.id.clone();
        let result = self.batch.report_client(client).await;
        if let Err(err) = &result {
            log_failure("report_client", &id, err);
        }
        result
    }

    pub async fn report_clients(&self, clients: Vec<Client>) -> BatchResponse<Client> {
        if let Err(err) = validate::check_batch_size(clients.len(), self.config.naming.max_batch_request) {
            return BatchResponse::rejected(&err, clients.len());
        }
        let results = join_all(clients.into_iter().map(|c| self.report_client(c))).await;
        BatchResponse::new(results.into_iter().map(Response::from).collect())
    }
}
