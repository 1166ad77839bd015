//! 分页查询，不经过 revision 对比

use super::{NamingServer, validate};
use crate::error::{NamingError, Result};
use crate::model::{Client, Instance, Service};
use crate::store::{InstanceFilter, ServiceFilter};

impl NamingServer {
    /// 超出上限或为 0 的 limit 按上限处理
    fn clamp_limit(&self, limit: usize) -> usize {
        let max = self.config.naming.max_batch_request.max(1);
        if limit == 0 || limit > max { max } else { limit }
    }

    /// 按条件分页查询实例，返回 (总数, 当前页)
    pub async fn list_instances(&self, filter: InstanceFilter) -> Result<(usize, Vec<Instance>)> {
        if let Some(namespace) = &filter.namespace {
            validate::check_namespace(namespace)?;
        }
        if let Some(service) = &filter.service {
            validate::check_service(service)?;
        }
        let filter = InstanceFilter {
            limit: self.clamp_limit(filter.limit),
            ..filter
        };
        Ok(self.store.list_instances(&filter).await?)
    }

    /// 按条件分页查询服务（不含 token）
    pub async fn list_services(&self, filter: ServiceFilter) -> Result<(usize, Vec<Service>)> {
        if let Some(namespace) = &filter.namespace {
            validate::check_namespace(namespace)?;
        }
        let filter = ServiceFilter {
            limit: self.clamp_limit(filter.limit),
            ..filter
        };
        let (total, services) = self.store.list_services(&filter).await?;
        Ok((total, services.iter().map(Service::without_token).collect()))
    }

    /// 上报过的客户端
    pub fn list_clients(&self, offset: usize, limit: usize) -> (usize, Vec<Client>) {
        self.cache.clients().list(offset, self.clamp_limit(limit))
    }

    /// 从缓存读取实例
    pub fn get_instance_by_id(&self, id: &str) -> Result<Instance> {
        validate::check_instance_id(id)?;
        self.cache
            .instances()
            .get(id)
            .map(|i| i.as_ref().clone())
            .ok_or_else(|| NamingError::not_found_instance(id))
    }
}
