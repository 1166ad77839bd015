//! 上报客户端缓存
//!
//! 客户端信息不落存储，超过 TTL 未再上报即被淘汰。

use crate::model::Client;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

#[derive(Default)]
pub struct ClientCache {
    clients: DashMap<String, Client>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或覆盖客户端，刷新最后上报时间
    pub fn upsert(&self, mut client: Client, now: DateTime<Utc>) -> Client {
        client.mtime = now;
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    pub fn get(&self, id: &str) -> Option<Client> {
        self.clients.get(id).map(|entry| entry.value().clone())
    }

    /// 按 ID 排序分页，返回 (总数, 当前页)
    pub fn list(&self, offset: usize, limit: usize) -> (usize, Vec<Client>) {
        let mut clients: Vec<Client> = self.clients.iter().map(|e| e.value().clone()).collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        let total = clients.len();
        let limit = if limit == 0 { total } else { limit };
        (total, clients.into_iter().skip(offset).take(limit).collect())
    }

    /// 淘汰 `now - ttl` 之前最后上报的客户端，返回淘汰数量
    pub fn evict_expired(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let before = self.clients.len();
        self.clients.retain(|_, client| now - client.mtime <= ttl);
        before.saturating_sub(self.clients.len())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_clients_are_evicted() {
        let cache = ClientCache::new();
        let now = Utc::now();
        cache.upsert(Client::new("old", "10.0.0.1"), now - chrono::Duration::seconds(300));
        cache.upsert(Client::new("fresh", "10.0.0.2"), now);

        let evicted = cache.evict_expired(Duration::from_secs(120), now);
        assert_eq!(evicted, 1);
        assert!(cache.get("old").is_none());
        assert!(cache.get("fresh").is_some());
    }

    #[test]
    fn list_is_sorted_and_paged() {
        let cache = ClientCache::new();
        let now = Utc::now();
        for id in ["c", "a", "b"] {
            cache.upsert(Client::new(id, "10.0.0.1"), now);
        }
        let (total, page) = cache.list(1, 1);
        assert_eq!(total, 3);
        assert_eq!(page[0].id, "b");
    }
}
