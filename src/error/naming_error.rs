//! 注册中心统一错误类型

use super::code::{ErrorCategory, ErrorCode};
use std::collections::HashMap;
use thiserror::Error;

/// 注册中心统一错误类型
#[derive(Error, Debug, Clone)]
pub enum NamingError {
    /// 带结果代码的错误（用于暴露给调用方）
    #[error("错误 [{code}] {reason}", code = .code.as_str())]
    Coded {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
        params: Option<HashMap<String, String>>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// 系统错误（用于内部错误，不暴露细节给调用方）
    #[error("系统错误: {0}")]
    System(String),
}

impl NamingError {
    /// 创建带代码的错误
    pub fn coded(code: ErrorCode, reason: impl Into<String>) -> Self {
        NamingError::Coded {
            code,
            reason: reason.into(),
            details: None,
            params: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        NamingError::System(msg.into())
    }

    // ============================================================
    // 便捷方法：参数校验
    // ============================================================

    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::InvalidParameter, reason)
    }

    // ============================================================
    // 便捷方法：资源不存在
    // ============================================================

    pub fn not_found_service(namespace: &str, service: &str) -> Self {
        let mut params = HashMap::new();
        params.insert("namespace".to_string(), namespace.to_string());
        params.insert("service".to_string(), service.to_string());
        NamingError::Coded {
            code: ErrorCode::NotFoundService,
            reason: "service not found".to_string(),
            details: None,
            params: Some(params),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn not_found_instance(instance_id: impl Into<String>) -> Self {
        let mut params = HashMap::new();
        params.insert("instance_id".to_string(), instance_id.into());
        NamingError::Coded {
            code: ErrorCode::NotFoundInstance,
            reason: "instance not found".to_string(),
            details: None,
            params: Some(params),
            timestamp: chrono::Utc::now(),
        }
    }

    // ============================================================
    // 便捷方法：准入、基础设施、超时
    // ============================================================

    pub fn not_allowed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::NotAllowedAccess, reason)
    }

    pub fn too_many_requests(instance_id: &str) -> Self {
        Self::coded(
            ErrorCode::InstanceTooManyRequests,
            format!("too many requests for instance {}", instance_id),
        )
    }

    pub fn store(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::StoreLayerException, reason)
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::OperationTimeout, reason)
    }

    // ============================================================
    // 信息获取方法
    // ============================================================

    /// 获取结果代码，系统错误统一归为 `ExecuteException`
    pub fn code(&self) -> ErrorCode {
        match self {
            NamingError::Coded { code, .. } => *code,
            NamingError::System(_) => ErrorCode::ExecuteException,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    /// 获取错误原因
    pub fn reason(&self) -> &str {
        match self {
            NamingError::Coded { reason, .. } => reason,
            NamingError::System(msg) => msg,
        }
    }

    /// 获取错误详情
    pub fn details(&self) -> Option<&str> {
        match self {
            NamingError::Coded { details, .. } => details.as_deref(),
            NamingError::System(_) => None,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, NamingError>;
