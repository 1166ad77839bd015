//! Revision 计算
//!
//! revision 是对可见内容的 SHA-256 摘要（十六进制）。输入先按 ID 排序，
//! 因此与缓存内部的存放顺序无关；内容不变则 revision 不变。

use crate::model::{Instance, RuleRecord, Service};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// 对比结果
#[derive(Debug, Clone, PartialEq)]
pub enum Compared<T> {
    /// 客户端持有的 revision 仍然有效
    Unchanged,
    /// 数据已变化，返回完整数据与新的 revision
    Changed { payload: T, revision: String },
}

impl<T> Compared<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Compared::Unchanged)
    }
}

/// 用客户端 revision 与当前 revision 决定返回内容
///
/// 只有不一致时才构建 payload。
pub fn compare_revision<T>(
    client_revision: Option<&str>,
    current: &str,
    payload: impl FnOnce() -> T,
) -> Compared<T> {
    match client_revision {
        Some(seen) if !seen.is_empty() && seen == current => Compared::Unchanged,
        _ => Compared::Changed {
            payload: payload(),
            revision: current.to_string(),
        },
    }
}

struct FieldHasher(Sha256);

impl FieldHasher {
    fn new() -> Self {
        Self(Sha256::new())
    }

    // 每个字段都带长度前缀，避免拼接产生歧义
    fn field(&mut self, value: &str) -> &mut Self {
        self.0.update((value.len() as u64).to_be_bytes());
        self.0.update(value.as_bytes());
        self
    }

    fn opt(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) => {
                self.0.update([1u8]);
                self.field(v)
            }
            None => {
                self.0.update([0u8]);
                self
            }
        }
    }

    fn num(&mut self, value: u64) -> &mut Self {
        self.0.update(value.to_be_bytes());
        self
    }

    fn flag(&mut self, value: bool) -> &mut Self {
        self.0.update([value as u8]);
        self
    }

    fn finish(self) -> String {
        hex::encode(self.0.finalize())
    }
}

fn hash_instance(h: &mut FieldHasher, instance: &Instance) {
    h.field(&instance.id)
        .field(&instance.revision)
        .field(&instance.host)
        .num(u64::from(instance.port))
        .opt(instance.vpc_id.as_deref())
        .opt(instance.protocol.as_deref())
        .opt(instance.version.as_deref())
        .num(u64::from(instance.weight))
        .num(u64::from(instance.priority))
        .flag(instance.healthy)
        .flag(instance.isolate)
        .flag(instance.health_check.enabled)
        .num(u64::from(instance.health_check.ttl_secs))
        .opt(instance.logic_set.as_deref());
    h.num(instance.metadata.len() as u64);
    for (key, value) in &instance.metadata {
        h.field(key).field(value);
    }
    match &instance.location {
        Some(location) => {
            h.flag(true)
                .field(&location.region)
                .field(&location.zone)
                .field(&location.campus);
        }
        None => {
            h.flag(false);
        }
    }
}

/// 一组实例的摘要，与输入顺序无关
pub fn instances_digest(instances: &[Arc<Instance>]) -> String {
    let mut sorted: Vec<&Instance> = instances.iter().map(|i| i.as_ref()).collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut h = FieldHasher::new();
    h.num(sorted.len() as u64);
    for instance in sorted {
        hash_instance(&mut h, instance);
    }
    h.finish()
}

/// 服务实例的最终 revision：服务自身 revision 与实例摘要的组合
pub fn service_instances_revision(service_revision: &str, digest: &str) -> String {
    let mut h = FieldHasher::new();
    h.field(service_revision).field(digest);
    h.finish()
}

/// 一组服务的摘要（命名空间级服务列表使用）
pub fn services_digest(services: &[Arc<Service>]) -> String {
    let mut sorted: Vec<&Service> = services.iter().map(|s| s.as_ref()).collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut h = FieldHasher::new();
    h.num(sorted.len() as u64);
    for service in sorted {
        h.field(&service.id)
            .field(&service.name)
            .field(&service.revision)
            .opt(service.reference());
    }
    h.finish()
}

/// 一组规则的摘要
pub fn rules_digest(rules: &[Arc<RuleRecord>]) -> String {
    let mut sorted: Vec<&RuleRecord> = rules.iter().map(|r| r.as_ref()).collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut h = FieldHasher::new();
    h.num(sorted.len() as u64);
    for rule in sorted {
        h.field(&rule.id)
            .field(&rule.revision)
            .field(&rule.name)
            .num(u64::from(rule.priority))
            .flag(rule.disable)
            .field(&rule.content.to_string());
    }
    h.finish()
}

/// 多个作用域摘要合并为一个 revision，缺失的作用域也参与计算
pub fn combine_digests<'a>(digests: impl IntoIterator<Item = Option<&'a str>>) -> String {
    let mut h = FieldHasher::new();
    for digest in digests {
        h.opt(digest);
    }
    h.finish()
}
