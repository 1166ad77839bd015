//! 写操作鉴权
//!
//! 门面在提交任何写请求之前调用 [`Authority::check`]，
//! 拒绝时直接返回，不会进入批处理。

use crate::error::{ErrorCode, NamingError, Result};
use crate::model::Service;
use async_trait::async_trait;
use std::fmt;
use tracing::warn;

/// 需要鉴权的写操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RegisterInstance,
    DeregisterInstance,
    UpdateInstance,
    UpdateIsolate,
    DeleteService,
    CreateAlias,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::RegisterInstance => "register_instance",
            Operation::DeregisterInstance => "deregister_instance",
            Operation::UpdateInstance => "update_instance",
            Operation::UpdateIsolate => "update_isolate",
            Operation::DeleteService => "delete_service",
            Operation::CreateAlias => "create_alias",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求携带的身份信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// 服务 token
    pub token: Option<String>,
    /// 操作人，写入操作历史
    pub operator: Option<String>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            operator: None,
        }
    }

    #[must_use]
    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }
}

/// 权限检查钩子
#[async_trait]
pub trait Authority: Send + Sync {
    async fn check(&self, ctx: &AuthContext, service: &Service, operation: Operation) -> Result<()>;
}

/// 不做任何检查
pub struct AllowAll;

#[async_trait]
impl Authority for AllowAll {
    async fn check(&self, _ctx: &AuthContext, _service: &Service, _operation: Operation) -> Result<()> {
        Ok(())
    }
}

/// 基于服务 token 的鉴权
///
/// 携带 token 时必须与服务 token 一致；严格模式下必须携带 token。
pub struct TokenAuthority {
    strict: bool,
}

impl TokenAuthority {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }
}

#[async_trait]
impl Authority for TokenAuthority {
    async fn check(&self, ctx: &AuthContext, service: &Service, operation: Operation) -> Result<()> {
        match ctx.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) if token == service.token => Ok(()),
            Some(_) => {
                warn!(
                    service_id = %service.id,
                    operation = %operation,
                    operator = ctx.operator.as_deref().unwrap_or("anonymous"),
                    "Service token mismatch"
                );
                Err(NamingError::coded(
                    ErrorCode::InvalidServiceToken,
                    "invalid service token",
                ))
            }
            None if self.strict => Err(NamingError::not_allowed(format!(
                "{} requires a service token",
                operation
            ))),
            None => Ok(()),
        }
    }
}
