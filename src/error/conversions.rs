//! 错误类型转换实现
//!
//! 存储层错误、序列化错误与 gRPC 状态之间的转换

use super::{ErrorCategory, ErrorCode, ErrorBuilder, NamingError};
use crate::store::StoreError;
use tonic::{Code, Status};

impl From<StoreError> for NamingError {
    fn from(err: StoreError) -> Self {
        let (code, reason) = match &err {
            StoreError::Duplicate(_) => (ErrorCode::ExistedResource, "resource already exists"),
            StoreError::NotFound(_) => (ErrorCode::NotFoundResource, "resource not found"),
            StoreError::Unavailable(_) | StoreError::Internal(_) => {
                (ErrorCode::StoreLayerException, "store layer exception")
            }
        };
        ErrorBuilder::new(code, reason).details(err.to_string()).build()
    }
}

impl From<serde_json::Error> for NamingError {
    fn from(err: serde_json::Error) -> Self {
        NamingError::system(format!("JSON 序列化错误: {}", err))
    }
}

impl From<NamingError> for Status {
    fn from(err: NamingError) -> Self {
        match err {
            NamingError::Coded {
                code,
                reason,
                details,
                ..
            } => {
                let mut status = Status::new(map_error_code_to_grpc(code), reason);

                if let Some(details) = details {
                    if let Ok(value) = details.parse() {
                        status.metadata_mut().insert("error-details", value);
                    }
                }
                if let Ok(value) = code.as_u32().to_string().parse() {
                    status.metadata_mut().insert("error-code", value);
                }

                status
            }
            NamingError::System(msg) => Status::internal(msg),
        }
    }
}

/// 将结果代码映射到 gRPC 状态码
pub fn map_error_code_to_grpc(code: ErrorCode) -> Code {
    match code.category() {
        ErrorCategory::Success => Code::Ok,
        ErrorCategory::Validation => Code::InvalidArgument,
        ErrorCategory::Conflict => Code::AlreadyExists,
        ErrorCategory::NotFound => Code::NotFound,
        ErrorCategory::Admission => match code {
            ErrorCode::InstanceTooManyRequests => Code::ResourceExhausted,
            _ => Code::PermissionDenied,
        },
        ErrorCategory::Infrastructure => match code {
            ErrorCode::StoreLayerException | ErrorCode::CacheNotReady => Code::Unavailable,
            _ => Code::Internal,
        },
        ErrorCategory::Timeout => Code::DeadlineExceeded,
    }
}
