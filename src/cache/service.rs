//! 服务缓存

use super::refresh::{Applied, RefreshControl, RefreshPlan};
use super::revision::services_digest;
use crate::model::{Service, service_key};
use crate::store::{Store, StoreResult};
use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// 命名空间下的全部服务，摘要按需计算一次
#[derive(Default)]
pub struct ServiceGroup {
    services: Vec<Arc<Service>>,
    digest: OnceLock<String>,
}

impl ServiceGroup {
    fn new(mut services: Vec<Arc<Service>>) -> Self {
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            services,
            digest: OnceLock::new(),
        }
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn revision(&self) -> &str {
        self.digest.get_or_init(|| services_digest(&self.services))
    }
}

#[derive(Default, Clone)]
struct ServiceSnapshot {
    by_id: HashMap<String, Arc<Service>>,
    by_name: HashMap<String, Arc<Service>>,
    by_namespace: HashMap<String, Arc<ServiceGroup>>,
}

pub struct ServiceCache {
    control: RefreshControl,
    snapshot: ArcSwap<ServiceSnapshot>,
}

impl ServiceCache {
    pub(crate) fn new(full_reload_every: u64) -> Self {
        Self {
            control: RefreshControl::new(full_reload_every),
            snapshot: ArcSwap::from_pointee(ServiceSnapshot::default()),
        }
    }

    pub(crate) fn control(&self) -> &RefreshControl {
        &self.control
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<Service>> {
        self.snapshot.load().by_id.get(id).cloned()
    }

    pub fn get_by_name(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.snapshot
            .load()
            .by_name
            .get(&service_key(namespace, name))
            .cloned()
    }

    /// 按名称查找服务，别名解析为源服务（最多一跳）
    pub fn resolve(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        let snapshot = self.snapshot.load();
        let service = snapshot.by_name.get(&service_key(namespace, name))?;
        match service.reference() {
            Some(source) => snapshot.by_id.get(source).cloned(),
            None => Some(service.clone()),
        }
    }

    /// 命名空间下的服务列表
    pub fn namespace_services(&self, namespace: &str) -> Option<Arc<ServiceGroup>> {
        self.snapshot.load().by_namespace.get(namespace).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) async fn refresh(&self, store: &dyn Store, plan: RefreshPlan) -> StoreResult<Applied> {
        let rows = store.services_since(plan.since()).await?;
        let max_mtime = rows.iter().map(|s| s.mtime).max();
        let changed = self.apply(rows, plan.is_full());
        Ok(Applied { changed, max_mtime })
    }

    fn apply(&self, rows: Vec<Service>, full: bool) -> usize {
        let current = self.snapshot.load_full();
        let mut next = if full {
            ServiceSnapshot::default()
        } else {
            (*current).clone()
        };

        let mut touched: HashSet<String> = HashSet::new();
        let mut changed = 0;
        for row in rows {
            if !full {
                let unchanged = match next.by_id.get(&row.id) {
                    Some(existing) => {
                        row.valid
                            && existing.revision == row.revision
                            && existing.mtime == row.mtime
                    }
                    None => !row.valid,
                };
                if unchanged {
                    continue;
                }
            }
            changed += 1;
            touched.insert(row.namespace.clone());
            if let Some(old) = next.by_id.remove(&row.id) {
                next.by_name.remove(&service_key(&old.namespace, &old.name));
                touched.insert(old.namespace.clone());
            }
            if row.valid {
                let service = Arc::new(row);
                next.by_name
                    .insert(service_key(&service.namespace, &service.name), service.clone());
                next.by_id.insert(service.id.clone(), service);
            }
        }

        if full {
            let mut grouped: HashMap<String, Vec<Arc<Service>>> = HashMap::new();
            for service in next.by_id.values() {
                grouped.entry(service.namespace.clone()).or_default().push(service.clone());
            }
            next.by_namespace = grouped
                .into_iter()
                .map(|(ns, services)| (ns, Arc::new(ServiceGroup::new(services))))
                .collect();
            self.snapshot.store(Arc::new(next));
            return changed;
        }

        if changed == 0 {
            return 0;
        }
        let mut regrouped: HashMap<String, Vec<Arc<Service>>> =
            touched.into_iter().map(|ns| (ns, Vec::new())).collect();
        for service in next.by_id.values() {
            if let Some(list) = regrouped.get_mut(&service.namespace) {
                list.push(service.clone());
            }
        }
        for (namespace, services) in regrouped {
            if services.is_empty() {
                next.by_namespace.remove(&namespace);
            } else {
                next.by_namespace.insert(namespace, Arc::new(ServiceGroup::new(services)));
            }
        }
        self.snapshot.store(Arc::new(next));
        changed
    }
}
