//! 内存存储实现
//!
//! 适用于开发和测试。批量写入在同一把写锁内完成，保证原子性；
//! 删除为软删除，便于缓存增量刷新感知。

use super::{FlagUpdate, InstanceFilter, ServiceFilter, ServiceLock, Store, StoreError, StoreResult};
use crate::model::{Instance, Namespace, RuleFamily, RuleRecord, Service};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
struct Tables {
    namespaces: HashMap<String, Namespace>,
    services: HashMap<String, Service>,
    /// (namespace, name) -> service id，只索引有效服务
    service_names: HashMap<(String, String), String>,
    instances: HashMap<String, Instance>,
    rules: HashMap<(RuleFamily, String), RuleRecord>,
}

impl Tables {
    fn require_direct_service(&self, service_id: &str) -> StoreResult<()> {
        match self.services.get(service_id) {
            Some(s) if s.valid && !s.is_alias() => Ok(()),
            _ => Err(StoreError::NotFound(format!("service {}", service_id))),
        }
    }

    fn valid_instance_mut(&mut self, id: &str) -> Option<&mut Instance> {
        self.instances.get_mut(id).filter(|i| i.valid)
    }
}

/// 内存存储
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// 写入时会失败的实例 ID（故障注入）
    failing_ids: DashSet<String>,
    unavailable: AtomicBool,
    instance_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后任何包含该实例 ID 的批量写入都会以 `Duplicate` 失败
    pub fn inject_failure(&self, instance_id: impl Into<String>) {
        self.failing_ids.insert(instance_id.into());
    }

    pub fn clear_failures(&self) {
        self.failing_ids.clear();
    }

    /// 模拟后端不可用
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 实例写调用次数（含失败的调用）
    pub fn instance_write_calls(&self) -> u64 {
        self.instance_writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_injected<'a>(&self, mut ids: impl Iterator<Item = &'a str>) -> StoreResult<()> {
        match ids.find(|id| self.failing_ids.contains(*id)) {
            Some(id) => Err(StoreError::Duplicate(id.to_string())),
            None => Ok(()),
        }
    }

    fn begin_instance_write(&self) -> StoreResult<()> {
        self.instance_writes.fetch_add(1, Ordering::SeqCst);
        self.check_available()
    }

    fn set_flags(
        &self,
        updates: &[FlagUpdate],
        apply: impl Fn(&mut Instance, bool),
    ) -> StoreResult<()> {
        self.begin_instance_write()?;
        self.check_injected(updates.iter().map(|u| u.id.as_str()))?;
        let now = Utc::now();
        let mut tables = self.tables.write();
        for update in updates {
            if let Some(instance) = tables.valid_instance_mut(&update.id) {
                apply(instance, update.value);
                instance.revision = update.revision.clone();
                instance.mtime = now;
            }
        }
        Ok(())
    }
}

fn page<T: Clone>(items: Vec<T>, offset: usize, limit: usize) -> (usize, Vec<T>) {
    let total = items.len();
    let limit = if limit == 0 { total } else { limit };
    (total, items.into_iter().skip(offset).take(limit).collect())
}

#[async_trait]
impl Store for MemoryStore {
    async fn add_namespace(&self, namespace: Namespace) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if tables.namespaces.contains_key(&namespace.name) {
            return Err(StoreError::Duplicate(namespace.name));
        }
        tables.namespaces.insert(namespace.name.clone(), namespace);
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> StoreResult<Option<Namespace>> {
        self.check_available()?;
        Ok(self.tables.read().namespaces.get(name).cloned())
    }

    async fn add_service(&self, mut service: Service) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if !tables.namespaces.contains_key(&service.namespace) {
            return Err(StoreError::NotFound(format!("namespace {}", service.namespace)));
        }
        let name_key = (service.namespace.clone(), service.name.clone());
        if tables.service_names.contains_key(&name_key) {
            return Err(StoreError::Duplicate(format!(
                "{}/{}",
                service.namespace, service.name
            )));
        }
        if let Some(reference) = service.reference() {
            tables.require_direct_service(reference)?;
        }
        service.mtime = Utc::now();
        tables.service_names.insert(name_key, service.id.clone());
        tables.services.insert(service.id.clone(), service);
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> StoreResult<Option<Service>> {
        self.check_available()?;
        let tables = self.tables.read();
        Ok(tables
            .service_names
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|id| tables.services.get(id))
            .cloned())
    }

    async fn get_service_by_id(&self, id: &str) -> StoreResult<Option<Service>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .services
            .get(id)
            .filter(|s| s.valid)
            .cloned())
    }

    async fn delete_service(&self, id: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let Some(service) = tables.services.get_mut(id).filter(|s| s.valid) else {
            return Ok(());
        };
        service.valid = false;
        service.mtime = Utc::now();
        let name_key = (service.namespace.clone(), service.name.clone());
        tables.service_names.remove(&name_key);
        Ok(())
    }

    async fn count_aliases(&self, source_id: &str) -> StoreResult<usize> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .services
            .values()
            .filter(|s| s.valid && s.reference() == Some(source_id))
            .count())
    }

    async fn count_instances(&self, service_id: &str) -> StoreResult<usize> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .instances
            .values()
            .filter(|i| i.valid && i.service_id == service_id)
            .count())
    }

    async fn lock_service(&self, id: &str) -> StoreResult<ServiceLock> {
        self.check_available()?;
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        Ok(ServiceLock::new(lock.lock_owned().await))
    }

    async fn services_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Service>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .services
            .values()
            .filter(|s| s.mtime >= since)
            .cloned()
            .collect())
    }

    async fn list_services(&self, filter: &ServiceFilter) -> StoreResult<(usize, Vec<Service>)> {
        self.check_available()?;
        let mut services: Vec<Service> = self
            .tables
            .read()
            .services
            .values()
            .filter(|s| s.valid && filter.matches(s))
            .cloned()
            .collect();
        services.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(page(services, filter.offset, filter.limit))
    }

    async fn get_instances_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Instance>> {
        self.check_available()?;
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.instances.get(id))
            .filter(|i| i.valid)
            .cloned()
            .collect())
    }

    async fn batch_add_instances(&self, instances: &[Instance]) -> StoreResult<()> {
        self.begin_instance_write()?;
        self.check_injected(instances.iter().map(|i| i.id.as_str()))?;
        let now = Utc::now();
        let mut tables = self.tables.write();
        for instance in instances {
            tables.require_direct_service(&instance.service_id)?;
        }
        for instance in instances {
            let mut row = instance.clone();
            row.valid = true;
            row.mtime = now;
            tables.instances.insert(row.id.clone(), row);
        }
        Ok(())
    }

    async fn update_instance(&self, instance: &Instance) -> StoreResult<()> {
        self.begin_instance_write()?;
        self.check_injected(std::iter::once(instance.id.as_str()))?;
        let mut tables = self.tables.write();
        let Some(row) = tables.valid_instance_mut(&instance.id) else {
            return Err(StoreError::NotFound(format!("instance {}", instance.id)));
        };
        *row = instance.clone();
        row.mtime = Utc::now();
        Ok(())
    }

    async fn batch_delete_instances(&self, ids: &[String]) -> StoreResult<()> {
        self.begin_instance_write()?;
        self.check_injected(ids.iter().map(|id| id.as_str()))?;
        let now = Utc::now();
        let mut tables = self.tables.write();
        for id in ids {
            if let Some(instance) = tables.valid_instance_mut(id) {
                instance.valid = false;
                instance.mtime = now;
            }
        }
        Ok(())
    }

    async fn batch_set_isolate(&self, updates: &[FlagUpdate]) -> StoreResult<()> {
        self.set_flags(updates, |instance, value| instance.isolate = value)
    }

    async fn batch_set_health(&self, updates: &[FlagUpdate]) -> StoreResult<()> {
        self.set_flags(updates, |instance, value| instance.healthy = value)
    }

    async fn instances_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Instance>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .instances
            .values()
            .filter(|i| i.mtime >= since)
            .cloned()
            .collect())
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> StoreResult<(usize, Vec<Instance>)> {
        self.check_available()?;
        let mut instances: Vec<Instance> = self
            .tables
            .read()
            .instances
            .values()
            .filter(|i| i.valid && filter.matches(i))
            .cloned()
            .collect();
        instances.sort_by(|a, b| {
            (&a.namespace, &a.service, &a.host, a.port).cmp(&(&b.namespace, &b.service, &b.host, b.port))
        });
        Ok(page(instances, filter.offset, filter.limit))
    }

    async fn upsert_rule(&self, mut rule: RuleRecord) -> StoreResult<()> {
        self.check_available()?;
        rule.valid = true;
        rule.mtime = Utc::now();
        self.tables
            .write()
            .rules
            .insert((rule.family, rule.id.clone()), rule);
        Ok(())
    }

    async fn delete_rule(&self, family: RuleFamily, id: &str) -> StoreResult<()> {
        self.check_available()?;
        if let Some(rule) = self.tables.write().rules.get_mut(&(family, id.to_string())) {
            rule.valid = false;
            rule.mtime = Utc::now();
        }
        Ok(())
    }

    async fn rules_since(
        &self,
        family: RuleFamily,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<RuleRecord>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .rules
            .values()
            .filter(|r| r.family == family && r.mtime >= since)
            .cloned()
            .collect())
    }
}
