//! 结果代码和错误类别定义
//!
//! 注册中心所有对外结果（包括成功）共用同一套代码空间

use serde::{Deserialize, Serialize};
use std::fmt;

/// 结果代码枚举
///
/// 代码按类别分组，每个类别占用固定范围：
/// - 200000-200999: 成功
/// - 400000-400199: 参数校验错误
/// - 400200-400299: 资源冲突
/// - 400300-400399: 资源不存在
/// - 401000-401999 / 429000-429999: 准入（鉴权、限流）
/// - 500000-500999: 基础设施错误
/// - 504000-504999: 超时（结果未知）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 成功 (200000-200999)
    // ============================================================
    ExecuteSuccess = 200000,
    DataNoChange = 200001,
    NoNeedUpdate = 200002,

    // ============================================================
    // 参数校验错误 (400000-400199)
    // ============================================================
    BadRequest = 400000,
    InvalidParameter = 400001,
    EmptyRequest = 400002,
    BatchSizeOverLimit = 400003,
    InvalidNamespaceName = 400110,
    InvalidServiceName = 400111,
    InvalidInstanceId = 400112,
    InvalidInstanceHost = 400113,
    InvalidInstancePort = 400114,
    InvalidMetadata = 400115,
    InvalidHealthCheck = 400116,
    InvalidParameterLength = 400117,
    InvalidServiceAlias = 400118,

    // ============================================================
    // 资源冲突 (400200-400299)
    // ============================================================
    ExistedResource = 400201,
    ServiceExistedInstances = 400202,
    ServiceExistedAlias = 400203,
    AliasOfAlias = 400204,
    AliasNotSupportInstance = 400205,
    HeartbeatOnDisabledInstance = 400206,

    // ============================================================
    // 资源不存在 (400300-400399)
    // ============================================================
    NotFoundNamespace = 400301,
    NotFoundService = 400302,
    NotFoundInstance = 400303,
    NotFoundSourceService = 400304,
    NotFoundResource = 400305,

    // ============================================================
    // 准入 (401000-401999, 429000-429999)
    // ============================================================
    NotAllowedAccess = 401000,
    InvalidServiceToken = 401001,
    InstanceTooManyRequests = 429001,

    // ============================================================
    // 基础设施错误 (500000-500999)
    // ============================================================
    ExecuteException = 500000,
    StoreLayerException = 500001,
    CacheNotReady = 500002,

    // ============================================================
    // 超时 (504000-504999)
    // ============================================================
    OperationTimeout = 504001,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            200000 => Some(ErrorCode::ExecuteSuccess),
            200001 => Some(ErrorCode::DataNoChange),
            200002 => Some(ErrorCode::NoNeedUpdate),
            400000 => Some(ErrorCode::BadRequest),
            400001 => Some(ErrorCode::InvalidParameter),
            400002 => Some(ErrorCode::EmptyRequest),
            400003 => Some(ErrorCode::BatchSizeOverLimit),
            400110 => Some(ErrorCode::InvalidNamespaceName),
            400111 => Some(ErrorCode::InvalidServiceName),
            400112 => Some(ErrorCode::InvalidInstanceId),
            400113 => Some(ErrorCode::InvalidInstanceHost),
            400114 => Some(ErrorCode::InvalidInstancePort),
            400115 => Some(ErrorCode::InvalidMetadata),
            400116 => Some(ErrorCode::InvalidHealthCheck),
            400117 => Some(ErrorCode::InvalidParameterLength),
            400118 => Some(ErrorCode::InvalidServiceAlias),
            400201 => Some(ErrorCode::ExistedResource),
            400202 => Some(ErrorCode::ServiceExistedInstances),
            400203 => Some(ErrorCode::ServiceExistedAlias),
            400204 => Some(ErrorCode::AliasOfAlias),
            400205 => Some(ErrorCode::AliasNotSupportInstance),
            400206 => Some(ErrorCode::HeartbeatOnDisabledInstance),
            400301 => Some(ErrorCode::NotFoundNamespace),
            400302 => Some(ErrorCode::NotFoundService),
            400303 => Some(ErrorCode::NotFoundInstance),
            400304 => Some(ErrorCode::NotFoundSourceService),
            400305 => Some(ErrorCode::NotFoundResource),
            401000 => Some(ErrorCode::NotAllowedAccess),
            401001 => Some(ErrorCode::InvalidServiceToken),
            429001 => Some(ErrorCode::InstanceTooManyRequests),
            500000 => Some(ErrorCode::ExecuteException),
            500001 => Some(ErrorCode::StoreLayerException),
            500002 => Some(ErrorCode::CacheNotReady),
            504001 => Some(ErrorCode::OperationTimeout),
            _ => None,
        }
    }

    /// 获取代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ExecuteSuccess => "EXECUTE_SUCCESS",
            ErrorCode::DataNoChange => "DATA_NO_CHANGE",
            ErrorCode::NoNeedUpdate => "NO_NEED_UPDATE",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::EmptyRequest => "EMPTY_REQUEST",
            ErrorCode::BatchSizeOverLimit => "BATCH_SIZE_OVER_LIMIT",
            ErrorCode::InvalidNamespaceName => "INVALID_NAMESPACE_NAME",
            ErrorCode::InvalidServiceName => "INVALID_SERVICE_NAME",
            ErrorCode::InvalidInstanceId => "INVALID_INSTANCE_ID",
            ErrorCode::InvalidInstanceHost => "INVALID_INSTANCE_HOST",
            ErrorCode::InvalidInstancePort => "INVALID_INSTANCE_PORT",
            ErrorCode::InvalidMetadata => "INVALID_METADATA",
            ErrorCode::InvalidHealthCheck => "INVALID_HEALTH_CHECK",
            ErrorCode::InvalidParameterLength => "INVALID_PARAMETER_LENGTH",
            ErrorCode::InvalidServiceAlias => "INVALID_SERVICE_ALIAS",
            ErrorCode::ExistedResource => "EXISTED_RESOURCE",
            ErrorCode::ServiceExistedInstances => "SERVICE_EXISTED_INSTANCES",
            ErrorCode::ServiceExistedAlias => "SERVICE_EXISTED_ALIAS",
            ErrorCode::AliasOfAlias => "ALIAS_OF_ALIAS",
            ErrorCode::AliasNotSupportInstance => "ALIAS_NOT_SUPPORT_INSTANCE",
            ErrorCode::HeartbeatOnDisabledInstance => "HEARTBEAT_ON_DISABLED_INSTANCE",
            ErrorCode::NotFoundNamespace => "NOT_FOUND_NAMESPACE",
            ErrorCode::NotFoundService => "NOT_FOUND_SERVICE",
            ErrorCode::NotFoundInstance => "NOT_FOUND_INSTANCE",
            ErrorCode::NotFoundSourceService => "NOT_FOUND_SOURCE_SERVICE",
            ErrorCode::NotFoundResource => "NOT_FOUND_RESOURCE",
            ErrorCode::NotAllowedAccess => "NOT_ALLOWED_ACCESS",
            ErrorCode::InvalidServiceToken => "INVALID_SERVICE_TOKEN",
            ErrorCode::InstanceTooManyRequests => "INSTANCE_TOO_MANY_REQUESTS",
            ErrorCode::ExecuteException => "EXECUTE_EXCEPTION",
            ErrorCode::StoreLayerException => "STORE_LAYER_EXCEPTION",
            ErrorCode::CacheNotReady => "CACHE_NOT_READY",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
        }
    }

    /// 获取代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            200000..=200999 => ErrorCategory::Success,
            400000..=400199 => ErrorCategory::Validation,
            400200..=400299 => ErrorCategory::Conflict,
            400300..=400399 => ErrorCategory::NotFound,
            401000..=401999 | 429000..=429999 => ErrorCategory::Admission,
            504000..=504999 => ErrorCategory::Timeout,
            _ => ErrorCategory::Infrastructure,
        }
    }

    /// 是否为成功类代码
    #[inline]
    pub fn is_success(&self) -> bool {
        self.category() == ErrorCategory::Success
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ExecuteException
                | ErrorCode::StoreLayerException
                | ErrorCode::CacheNotReady
                | ErrorCode::OperationTimeout
                | ErrorCode::InstanceTooManyRequests
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Success,
    Validation,
    Conflict,
    NotFound,
    Admission,
    Infrastructure,
    Timeout,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Success => write!(f, "SUCCESS"),
            ErrorCategory::Validation => write!(f, "VALIDATION"),
            ErrorCategory::Conflict => write!(f, "CONFLICT"),
            ErrorCategory::NotFound => write!(f, "NOT_FOUND"),
            ErrorCategory::Admission => write!(f, "ADMISSION"),
            ErrorCategory::Infrastructure => write!(f, "INFRASTRUCTURE"),
            ErrorCategory::Timeout => write!(f, "TIMEOUT"),
        }
    }
}
