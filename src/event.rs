//! 实例变更事件与操作历史
//!
//! 事件通过 `async-broadcast` 分发，队列满时丢弃最旧的事件，
//! 发布方永远不会被慢订阅者阻塞。

use crate::logging::HISTORY_TARGET;
use crate::model::Instance;
use async_broadcast::{InactiveReceiver, Receiver, Sender};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// 默认事件队列容量
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Online,
    Offline,
    Update,
    Isolate,
    CloseIsolate,
    TurnHealthy,
    TurnUnhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceEvent {
    pub kind: EventKind,
    pub instance: Instance,
    pub at: DateTime<Utc>,
}

impl InstanceEvent {
    pub fn new(kind: EventKind, instance: Instance) -> Self {
        Self {
            kind,
            instance,
            at: Utc::now(),
        }
    }
}

/// 事件中心
#[derive(Clone)]
pub struct EventHub {
    sender: Sender<InstanceEvent>,
    // 保持通道打开，没有订阅者时事件直接丢弃
    inactive: InactiveReceiver<InstanceEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        sender.set_await_active(false);
        Self {
            sender,
            inactive: receiver.deactivate(),
        }
    }

    pub fn publish(&self, event: InstanceEvent) {
        let _ = self.sender.try_broadcast(event);
    }

    /// 订阅之后发布的事件
    pub fn subscribe(&self) -> Receiver<InstanceEvent> {
        self.inactive.activate_cloned()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// 记录一条操作历史
pub fn record_history(resource: &str, operation: &str, resource_id: &str, operator: Option<&str>) {
    tracing::info!(
        target: HISTORY_TARGET,
        resource,
        operation,
        resource_id,
        operator = operator.unwrap_or("anonymous"),
        "history"
    );
}
