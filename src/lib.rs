//! Flare Naming Core Library
//!
//! 服务注册中心控制面核心：写请求的合并批处理，以及基于 revision 对比的
//! 服务发现缓存。

pub mod api;
pub mod auth;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod naming;
pub mod runtime;
pub mod singleflight;
pub mod store;

// Re-exports
pub use api::{BatchResponse, DiscoverResponse, DiscoverType, InstanceRef, InstanceRequest, Response};
pub use auth::{AuthContext, Authority, TokenAuthority};
pub use batch::{BatchController, BatchFuture, Outcome};
pub use cache::{CacheEntity, CacheManager, CacheState, Compared};
pub use config::NamingConfig;
pub use error::{ErrorBuilder, ErrorCategory, ErrorCode, NamingError, Result};
pub use event::{EventHub, EventKind, InstanceEvent};
pub use model::{Client, Instance, InstanceKey, Namespace, RuleFamily, RuleRecord, Service};
pub use naming::{NamingServer, NamingServerBuilder};
pub use runtime::{NamingRuntime, RuntimeHandle, SpawnTask, Task};
pub use store::{MemoryStore, Store, StoreError};
