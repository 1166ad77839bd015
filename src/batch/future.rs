//! 批处理结果句柄
//!
//! 每个提交的请求对应一个 oneshot 通道：执行端持有 [`Pending`]，
//! 调用方持有 [`BatchFuture`]，结果只会被写入一次。

use crate::error::{ErrorCode, NamingError};
use std::time::Duration;
use tokio::sync::oneshot;

/// 成功（或可视为成功）的执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub code: ErrorCode,
    pub entity: Option<T>,
}

impl<T> Outcome<T> {
    pub fn new(code: ErrorCode, entity: Option<T>) -> Self {
        Self { code, entity }
    }

    pub fn success(entity: T) -> Self {
        Self::new(ErrorCode::ExecuteSuccess, Some(entity))
    }
}

pub type BatchResult<T> = Result<Outcome<T>, NamingError>;

/// 执行端持有的结果写入端
pub struct Pending<T> {
    tx: oneshot::Sender<BatchResult<T>>,
}

impl<T> Pending<T> {
    pub fn resolve(self, result: BatchResult<T>) {
        // 调用方已超时放弃等待时接收端会被丢弃，结果直接丢弃即可
        let _ = self.tx.send(result);
    }
}

/// 调用方持有的结果句柄
pub struct BatchFuture<T> {
    rx: oneshot::Receiver<BatchResult<T>>,
}

impl<T> BatchFuture<T> {
    /// 创建一对未决的写入端与句柄
    pub fn pending() -> (Pending<T>, BatchFuture<T>) {
        let (tx, rx) = oneshot::channel();
        (Pending { tx }, BatchFuture { rx })
    }

    /// 等待结果，超时返回 `OperationTimeout`
    ///
    /// 超时只代表结果未知，底层写入仍可能在之后落地。
    pub async fn wait(self, timeout: Duration) -> BatchResult<T> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NamingError::coded(
                ErrorCode::ExecuteException,
                "batch worker dropped the request",
            )),
            Err(_) => Err(NamingError::timeout(format!(
                "batch result not ready after {:?}",
                timeout
            ))),
        }
    }
}
