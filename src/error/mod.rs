//! 注册中心错误处理模块
//!
//! 提供统一的结果代码、错误类型和错误转换

pub mod builder;
pub mod code;
pub mod conversions;
pub mod naming_error;

pub use builder::ErrorBuilder;
pub use code::{ErrorCategory, ErrorCode};
pub use conversions::map_error_code_to_grpc;
pub use naming_error::{NamingError, Result};

/// 将基础设施错误转换为 `NamingError`，同时保留原始错误文本
pub fn map_infra_error<E, S>(error: E, code: ErrorCode, message: S) -> NamingError
where
    E: std::fmt::Display,
    S: Into<String>,
{
    ErrorBuilder::new(code, message.into())
        .details(error.to_string())
        .build()
}
