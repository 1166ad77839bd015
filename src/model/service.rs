//! 命名空间与服务定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 命名空间
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,
    pub comment: Option<String>,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            comment: None,
            ctime: now,
            mtime: now,
        }
    }
}

/// 服务类型
///
/// 别名只保存源服务 ID，解析时最多跳转一次；
/// 创建别名时要求源服务为 `Direct`，因此不会出现别名的别名。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceKind {
    #[default]
    Direct,
    Alias {
        /// 源服务 ID
        reference: String,
    },
}

/// 服务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub namespace: String,
    pub name: String,
    /// 修改服务及其实例所需的密钥，永远不对外返回
    pub token: String,
    pub kind: ServiceKind,
    pub owners: Option<String>,
    pub business: Option<String>,
    pub department: Option<String>,
    pub comment: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub revision: String,
    pub valid: bool,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

impl Service {
    /// 创建直连服务，ID 与 token 随机生成
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            namespace: namespace.into(),
            name: name.into(),
            token: uuid::Uuid::new_v4().simple().to_string(),
            kind: ServiceKind::Direct,
            owners: None,
            business: None,
            department: None,
            comment: None,
            metadata: BTreeMap::new(),
            revision: super::new_revision(),
            valid: true,
            ctime: now,
            mtime: now,
        }
    }

    /// 创建指向 `source` 的别名
    pub fn alias_of(namespace: impl Into<String>, name: impl Into<String>, source: &Service) -> Self {
        let mut alias = Self::new(namespace, name);
        alias.kind = ServiceKind::Alias {
            reference: source.id.clone(),
        };
        alias
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.kind, ServiceKind::Alias { .. })
    }

    /// 别名指向的源服务 ID
    pub fn reference(&self) -> Option<&str> {
        match &self.kind {
            ServiceKind::Alias { reference } => Some(reference),
            ServiceKind::Direct => None,
        }
    }

    /// 去掉 token 后的副本，用于对外返回
    pub fn without_token(&self) -> Service {
        Service {
            token: String::new(),
            ..self.clone()
        }
    }
}

/// 单飞与日志使用的服务键
pub fn service_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
