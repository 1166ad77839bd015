//! 请求字段校验

use crate::api::{InstanceRequest, InstanceUpdate};
use crate::error::{ErrorCode, NamingError, Result};
use crate::model::HealthCheck;
use std::collections::BTreeMap;

pub const MAX_NAME_LENGTH: usize = 128;
pub const MAX_HOST_LENGTH: usize = 128;
pub const MAX_PORT: u32 = 65535;
pub const MAX_WEIGHT: u32 = 10000;
pub const MAX_PROTOCOL_LENGTH: usize = 32;
pub const MAX_VERSION_LENGTH: usize = 32;
pub const MAX_METADATA_ENTRIES: usize = 64;
pub const MAX_METADATA_KEY_LENGTH: usize = 128;
pub const MAX_METADATA_VALUE_LENGTH: usize = 4096;
pub const MAX_HEARTBEAT_TTL_SECS: u32 = 60;

fn invalid(code: ErrorCode, reason: impl Into<String>) -> NamingError {
    NamingError::coded(code, reason)
}

fn check_name(value: &str, code: ErrorCode, field: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_NAME_LENGTH {
        return Err(invalid(
            code,
            format!("{} must be 1..={} characters", field, MAX_NAME_LENGTH),
        ));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | ':');
    if !value.chars().all(allowed) {
        return Err(invalid(code, format!("{} contains illegal characters", field)));
    }
    Ok(())
}

pub fn check_namespace(namespace: &str) -> Result<()> {
    check_name(namespace, ErrorCode::InvalidNamespaceName, "namespace")
}

pub fn check_service(service: &str) -> Result<()> {
    check_name(service, ErrorCode::InvalidServiceName, "service")
}

pub fn check_host(host: &str) -> Result<()> {
    if host.is_empty() || host.len() > MAX_HOST_LENGTH {
        return Err(invalid(
            ErrorCode::InvalidInstanceHost,
            format!("host must be 1..={} characters", MAX_HOST_LENGTH),
        ));
    }
    Ok(())
}

pub fn check_instance_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_NAME_LENGTH {
        return Err(invalid(ErrorCode::InvalidInstanceId, "invalid instance id"));
    }
    Ok(())
}

fn check_port(port: u32) -> Result<()> {
    if port > MAX_PORT {
        return Err(invalid(
            ErrorCode::InvalidInstancePort,
            format!("port {} is out of range", port),
        ));
    }
    Ok(())
}

fn check_weight(weight: Option<u32>) -> Result<()> {
    match weight {
        Some(w) if w > MAX_WEIGHT => Err(invalid(
            ErrorCode::InvalidParameter,
            format!("weight must not exceed {}", MAX_WEIGHT),
        )),
        _ => Ok(()),
    }
}

fn check_length(value: Option<&str>, max: usize, field: &str) -> Result<()> {
    match value {
        Some(v) if v.len() > max => Err(invalid(
            ErrorCode::InvalidParameterLength,
            format!("{} must not exceed {} characters", field, max),
        )),
        _ => Ok(()),
    }
}

pub fn check_metadata(metadata: &BTreeMap<String, String>) -> Result<()> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(invalid(
            ErrorCode::InvalidMetadata,
            format!("metadata must not exceed {} entries", MAX_METADATA_ENTRIES),
        ));
    }
    for (key, value) in metadata {
        if key.is_empty() || key.len() > MAX_METADATA_KEY_LENGTH {
            return Err(invalid(ErrorCode::InvalidMetadata, "invalid metadata key"));
        }
        if value.len() > MAX_METADATA_VALUE_LENGTH {
            return Err(invalid(
                ErrorCode::InvalidMetadata,
                format!("metadata value of {} is too long", key),
            ));
        }
    }
    Ok(())
}

fn check_health_check(health_check: Option<&HealthCheck>) -> Result<()> {
    match health_check {
        Some(hc) if hc.enabled && (hc.ttl_secs == 0 || hc.ttl_secs > MAX_HEARTBEAT_TTL_SECS) => {
            Err(invalid(
                ErrorCode::InvalidHealthCheck,
                format!("heartbeat ttl must be 1..={} seconds", MAX_HEARTBEAT_TTL_SECS),
            ))
        }
        _ => Ok(()),
    }
}

/// 校验注册请求
pub fn check_instance_request(req: &InstanceRequest) -> Result<()> {
    check_namespace(&req.namespace)?;
    check_service(&req.service)?;
    check_host(&req.host)?;
    check_port(req.port)?;
    check_length(req.vpc_id.as_deref(), MAX_NAME_LENGTH, "vpc_id")?;
    check_length(req.protocol.as_deref(), MAX_PROTOCOL_LENGTH, "protocol")?;
    check_length(req.version.as_deref(), MAX_VERSION_LENGTH, "version")?;
    check_length(req.logic_set.as_deref(), MAX_NAME_LENGTH, "logic_set")?;
    check_weight(req.weight)?;
    check_metadata(&req.metadata)?;
    check_health_check(req.health_check.as_ref())
}

/// 校验修改请求中指定了的字段
pub fn check_instance_update(update: &InstanceUpdate) -> Result<()> {
    check_length(update.protocol.as_deref(), MAX_PROTOCOL_LENGTH, "protocol")?;
    check_length(update.version.as_deref(), MAX_VERSION_LENGTH, "version")?;
    check_length(update.logic_set.as_deref(), MAX_NAME_LENGTH, "logic_set")?;
    check_weight(update.weight)?;
    if let Some(metadata) = &update.metadata {
        check_metadata(metadata)?;
    }
    check_health_check(update.health_check.as_ref())
}

/// 校验批量请求的条目数
pub fn check_batch_size(len: usize, max: usize) -> Result<()> {
    if len == 0 {
        return Err(invalid(ErrorCode::EmptyRequest, "empty request"));
    }
    if len > max {
        return Err(invalid(
            ErrorCode::BatchSizeOverLimit,
            format!("batch size {} exceeds {}", len, max),
        ));
    }
    Ok(())
}
