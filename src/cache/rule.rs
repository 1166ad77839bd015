//! 治理规则缓存
//!
//! 每个规则族独立刷新、独立计算 revision。查询某个服务时合并
//! 三个作用域：`(namespace, service)`、`(namespace, *)`、`(*, *)`。

use super::refresh::{Applied, RefreshControl, RefreshPlan};
use super::revision::{combine_digests, rules_digest};
use crate::model::{MATCH_ALL, RuleFamily, RuleRecord};
use crate::store::{Store, StoreResult};
use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

type Scope = (String, String);

/// 单个作用域下启用的规则
#[derive(Default)]
pub struct RuleGroup {
    rules: Vec<Arc<RuleRecord>>,
    digest: OnceLock<String>,
}

impl RuleGroup {
    fn new(mut rules: Vec<Arc<RuleRecord>>) -> Self {
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Self {
            rules,
            digest: OnceLock::new(),
        }
    }

    pub fn rules(&self) -> &[Arc<RuleRecord>] {
        &self.rules
    }

    pub fn digest(&self) -> &str {
        self.digest.get_or_init(|| rules_digest(&self.rules))
    }
}

/// 某个服务可见的规则集合
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedRules {
    pub rules: Vec<Arc<RuleRecord>>,
    pub revision: String,
}

#[derive(Default, Clone)]
struct RuleSnapshot {
    by_id: HashMap<String, Arc<RuleRecord>>,
    by_scope: HashMap<Scope, Arc<RuleGroup>>,
}

/// 单个规则族的缓存
pub struct RuleFamilyCache {
    family: RuleFamily,
    control: RefreshControl,
    snapshot: ArcSwap<RuleSnapshot>,
}

impl RuleFamilyCache {
    fn new(family: RuleFamily, full_reload_every: u64) -> Self {
        Self {
            family,
            control: RefreshControl::new(full_reload_every),
            snapshot: ArcSwap::from_pointee(RuleSnapshot::default()),
        }
    }

    pub fn family(&self) -> RuleFamily {
        self.family
    }

    pub(crate) fn control(&self) -> &RefreshControl {
        &self.control
    }

    pub fn get(&self, id: &str) -> Option<Arc<RuleRecord>> {
        self.snapshot.load().by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 对某个服务生效的规则及其 revision
    pub fn for_service(&self, namespace: &str, service: &str) -> ScopedRules {
        let snapshot = self.snapshot.load();
        let scopes = [
            (namespace.to_string(), service.to_string()),
            (namespace.to_string(), MATCH_ALL.to_string()),
            (MATCH_ALL.to_string(), MATCH_ALL.to_string()),
        ];

        let mut seen = HashSet::new();
        let groups: Vec<Option<&Arc<RuleGroup>>> = scopes
            .iter()
            .map(|scope| {
                // 命名空间或服务本身就是通配符时，作用域会重复
                if seen.insert(scope.clone()) {
                    snapshot.by_scope.get(scope)
                } else {
                    None
                }
            })
            .collect();

        let revision = combine_digests(groups.iter().map(|g| g.map(|g| g.digest())));
        let rules = groups
            .iter()
            .flatten()
            .flat_map(|g| g.rules().iter().cloned())
            .collect();
        ScopedRules { rules, revision }
    }

    pub(crate) async fn refresh(&self, store: &dyn Store, plan: RefreshPlan) -> StoreResult<Applied> {
        let rows = store.rules_since(self.family, plan.since()).await?;
        let max_mtime = rows.iter().map(|r| r.mtime).max();
        let changed = self.apply(rows, plan.is_full());
        Ok(Applied { changed, max_mtime })
    }

    fn apply(&self, rows: Vec<RuleRecord>, full: bool) -> usize {
        let mut next = if full {
            RuleSnapshot::default()
        } else {
            (**self.snapshot.load()).clone()
        };

        let mut touched: HashSet<Scope> = HashSet::new();
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
            touched.insert(row.scope());
            if let Some(old) = next.by_id.remove(&row.id) {
                touched.insert(old.scope());
            }
            if row.valid {
                next.by_id.insert(row.id.clone(), Arc::new(row));
            }
        }

        if !full && changed == 0 {
            return 0;
        }

        let mut regrouped: HashMap<Scope, Vec<Arc<RuleRecord>>> = if full {
            HashMap::new()
        } else {
            touched.into_iter().map(|scope| (scope, Vec::new())).collect()
        };
        for rule in next.by_id.values().filter(|r| !r.disable) {
            match regrouped.get_mut(&rule.scope()) {
                Some(list) => list.push(rule.clone()),
                None if full => {
                    regrouped.insert(rule.scope(), vec![rule.clone()]);
                }
                None => {}
            }
        }
        if full {
            next.by_scope.clear();
        }
        for (scope, rules) in regrouped {
            if rules.is_empty() {
                next.by_scope.remove(&scope);
            } else {
                next.by_scope.insert(scope, Arc::new(RuleGroup::new(rules)));
            }
        }
        self.snapshot.store(Arc::new(next));
        changed
    }
}

/// 全部规则族，按 `RuleFamily::ALL` 的顺序存放
pub struct RuleCache {
    families: [RuleFamilyCache; 4],
}

impl RuleCache {
    pub(crate) fn new(full_reload_every: u64) -> Self {
        Self {
            families: RuleFamily::ALL.map(|family| RuleFamilyCache::new(family, full_reload_every)),
        }
    }

    pub fn family(&self, family: RuleFamily) -> &RuleFamilyCache {
        &self.families[family as usize]
    }

    pub fn families(&self) -> &[RuleFamilyCache] {
        &self.families
    }
}
