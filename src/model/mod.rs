//! 注册中心数据模型

pub mod client;
pub mod instance;
pub mod rule;
pub mod service;

pub use client::{Client, ClientType, StatTarget};
pub use instance::{HealthCheck, Instance, InstanceKey, Location, compute_instance_id};
pub use rule::{MATCH_ALL, RuleFamily, RuleRecord};
pub use service::{Namespace, Service, ServiceKind, service_key};

/// 生成新的 revision
pub fn new_revision() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
