//! 单飞（single-flight）去重
//!
//! 同一个 key 同一时刻最多只有一个在途执行，期间到达的调用方
//! 直接等待并共享这次执行的结果。执行结束后 key 被移除，
//! 后续调用会重新执行。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// 按 key 去重的单飞组
pub struct Group<R> {
    calls: Mutex<HashMap<String, Arc<OnceCell<R>>>>,
}

impl<R> Default for Group<R> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<R: Clone> Group<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行 `f`，返回 `(结果, 是否为共享结果)`
    ///
    /// 只有真正执行了 `f` 的调用方拿到 `shared = false`。
    pub async fn work<F, Fut>(&self, key: &str, f: F) -> (R, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let cell = self
            .calls
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut executed = false;
        let result = cell
            .get_or_init(|| {
                executed = true;
                f()
            })
            .await
            .clone();

        {
            let mut calls = self.calls.lock();
            if calls.get(key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
                calls.remove(key);
            }
        }

        (result, !executed)
    }

    /// 当前在途的 key 数量
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_execution() {
        let group = Arc::new(Group::<Result<String, String>>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let group = group.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                group
                    .work("default/echo", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("svc-1".to_string())
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for handle in handles {
            let (result, shared) = handle.await.unwrap();
            assert_eq!(result, Ok("svc-1".to_string()));
            if !shared {
                leaders += 1;
            }
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn errors_are_shared_and_key_is_released() {
        let group = Group::<Result<u32, String>>::new();

        let (first, shared) = group.work("k", || async { Err("boom".to_string()) }).await;
        assert_eq!(first, Err("boom".to_string()));
        assert!(!shared);

        // 上一次执行结束后 key 已释放，这里会重新执行
        let (second, shared) = group.work("k", || async { Ok(7) }).await;
        assert_eq!(second, Ok(7));
        assert!(!shared);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_interfere() {
        let group = Group::<u32>::new();
        let (a, _) = group.work("a", || async { 1 }).await;
        let (b, _) = group.work("b", || async { 2 }).await;
        assert_eq!((a, b), (1, 2));
    }
}
