//! 有界丢旧队列
//!
//! 入队永不阻塞：满时丢弃最旧的元素。单消费者。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// 入队；返回是否因溢出丢弃了最旧的元素
    pub fn push(&self, item: T) -> bool {
        let overflowed = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            let overflowed = if items.len() >= self.capacity {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(item);
            overflowed
        };
        if overflowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        overflowed
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// 等待并取出队首
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            // notify_one 在没有等待者时会保留一个许可，检查与等待之间的入队不会丢失
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = DropOldestQueue::new(2);
        assert!(!queue.push(1));
        assert!(!queue.push(2));
        assert!(queue.push(3));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let queue = DropOldestQueue::new(0);
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop(), Some("b"));
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(DropOldestQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(7u32);
        assert_eq!(consumer.await.unwrap(), 7);
    }
}
