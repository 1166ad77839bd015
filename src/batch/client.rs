//! 客户端上报的批次执行器
//!
//! 客户端只写入缓存；同一客户端在批次内多次上报时以最后一次为准。

use super::batcher::{BatchExecutor, Intent, group_by_identity};
use super::future::Outcome;
use crate::cache::ClientCache;
use crate::metrics::BatchKind;
use crate::model::Client;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

pub struct ClientExecutor {
    clients: Arc<ClientCache>,
}

impl ClientExecutor {
    pub fn new(clients: Arc<ClientCache>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl BatchExecutor for ClientExecutor {
    type Request = Client;
    type Response = Client;

    fn kind(&self) -> BatchKind {
        BatchKind::Client
    }

    fn shard_key(request: &Client) -> &str {
        &request.id
    }

    async fn execute(&self, batch: Vec<Intent<Client, Client>>) {
        let now = Utc::now();
        for group in group_by_identity::<Self>(batch) {
            let stored = self.clients.upsert(group.last().clone(), now);
            group.resolve_all(Ok(Outcome::success(stored)));
        }
    }
}
