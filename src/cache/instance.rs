//! 实例缓存
//!
//! 按服务 ID 分组，每组的摘要在首次读取 revision 时计算并缓存；
//! 组内实例变化时整组替换，摘要随之失效。

use super::refresh::{Applied, RefreshControl, RefreshPlan};
use super::revision::instances_digest;
use super::service::ServiceCache;
use crate::model::Instance;
use crate::store::{Store, StoreResult};
use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// 单个服务下的实例集合
#[derive(Default)]
pub struct InstanceGroup {
    instances: Vec<Arc<Instance>>,
    digest: OnceLock<String>,
}

impl InstanceGroup {
    fn new(mut instances: Vec<Arc<Instance>>) -> Self {
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            instances,
            digest: OnceLock::new(),
        }
    }

    pub fn instances(&self) -> &[Arc<Instance>] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// 实例集合摘要
    pub fn digest(&self) -> &str {
        self.digest.get_or_init(|| instances_digest(&self.instances))
    }
}

#[derive(Default, Clone)]
struct InstanceSnapshot {
    by_id: HashMap<String, Arc<Instance>>,
    by_service: HashMap<String, Arc<InstanceGroup>>,
}

pub struct InstanceCache {
    control: RefreshControl,
    snapshot: ArcSwap<InstanceSnapshot>,
    empty: Arc<InstanceGroup>,
}

impl InstanceCache {
    pub(crate) fn new(full_reload_every: u64) -> Self {
        Self {
            control: RefreshControl::new(full_reload_every),
            snapshot: ArcSwap::from_pointee(InstanceSnapshot::default()),
            empty: Arc::new(InstanceGroup::default()),
        }
    }

    pub(crate) fn control(&self) -> &RefreshControl {
        &self.control
    }

    pub fn get(&self, id: &str) -> Option<Arc<Instance>> {
        self.snapshot.load().by_id.get(id).cloned()
    }

    /// 服务下的实例，服务不存在或没有实例时返回空集合
    pub fn by_service(&self, service_id: &str) -> Arc<InstanceGroup> {
        self.snapshot
            .load()
            .by_service
            .get(service_id)
            .cloned()
            .unwrap_or_else(|| self.empty.clone())
    }

    pub fn all(&self) -> Vec<Arc<Instance>> {
        self.snapshot.load().by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 拉取并应用一次变更
    ///
    /// 出现所属服务未知的实例时，下一次刷新改为全量加载。
    pub(crate) async fn refresh(
        &self,
        store: &dyn Store,
        plan: RefreshPlan,
        services: &ServiceCache,
    ) -> StoreResult<Applied> {
        let rows = store.instances_since(plan.since()).await?;
        let max_mtime = rows.iter().map(|i| i.mtime).max();

        let orphans = rows
            .iter()
            .filter(|i| i.valid && services.get_by_id(&i.service_id).is_none())
            .count();
        if orphans > 0 {
            warn!(orphans, "Instances reference unknown services, scheduling full reload");
            self.control.request_full();
        }

        let changed = self.apply(rows, plan.is_full());
        Ok(Applied { changed, max_mtime })
    }

    fn apply(&self, rows: Vec<Instance>, full: bool) -> usize {
        let mut next = if full {
            InstanceSnapshot::default()
        } else {
            (**self.snapshot.load()).clone()
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
            touched.insert(row.service_id.clone());
            if let Some(old) = next.by_id.remove(&row.id) {
                touched.insert(old.service_id.clone());
            }
            if row.valid {
                next.by_id.insert(row.id.clone(), Arc::new(row));
            }
        }

        if full {
            let mut grouped: HashMap<String, Vec<Arc<Instance>>> = HashMap::new();
            for instance in next.by_id.values() {
                grouped
                    .entry(instance.service_id.clone())
                    .or_default()
                    .push(instance.clone());
            }
            next.by_service = grouped
                .into_iter()
                .map(|(id, instances)| (id, Arc::new(InstanceGroup::new(instances))))
                .collect();
            self.snapshot.store(Arc::new(next));
            return changed;
        }

        if changed == 0 {
            return 0;
        }
        let mut regrouped: HashMap<String, Vec<Arc<Instance>>> =
            touched.into_iter().map(|id| (id, Vec::new())).collect();
        for instance in next.by_id.values() {
            if let Some(list) = regrouped.get_mut(&instance.service_id) {
                list.push(instance.clone());
            }
        }
        for (service_id, instances) in regrouped {
            if instances.is_empty() {
                next.by_service.remove(&service_id);
            } else {
                next.by_service
                    .insert(service_id, Arc::new(InstanceGroup::new(instances)));
            }
        }
        self.snapshot.store(Arc::new(next));
        changed
    }
}
