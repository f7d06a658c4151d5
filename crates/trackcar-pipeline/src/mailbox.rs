//! 单槽邮箱
//!
//! 覆盖写语义的"最新消息"信箱：写入无条件替换旧消息，读取返回
//! 当前消息的拷贝（从未写入过则为 `None`）。
//!
//! 实现为原子指针交换（`ArcSwapOption`）：写者是 wait-free 的，
//! 不会被任何数量的并发读者饿死——新鲜传感数据的及时送达比
//! 读一致性更重要。

use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// 并发安全的单槽"最新消息"邮箱
pub struct Mailbox<T> {
    slot: ArcSwapOption<T>,
}

impl<T: Clone> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::const_empty(),
        }
    }

    /// 无条件替换当前消息
    pub fn write(&self, msg: T) {
        self.slot.store(Some(Arc::new(msg)));
    }

    /// 返回最新消息的拷贝；从未写入过则返回 `None`
    ///
    /// 非阻塞：并发写入期间读到的是交换前或交换后的完整消息，
    /// 不会观察到撕裂值。
    pub fn read(&self) -> Option<T> {
        self.slot.load_full().map(|msg| (*msg).clone())
    }
}

impl<T: Clone> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_read_before_any_write_returns_none() {
        let mailbox: Mailbox<u64> = Mailbox::new();
        assert_eq!(mailbox.read(), None);
    }

    #[test]
    fn test_write_then_read() {
        let mailbox = Mailbox::new();
        mailbox.write(42u64);
        assert_eq!(mailbox.read(), Some(42));
    }

    #[test]
    fn test_latest_write_wins() {
        let mailbox = Mailbox::new();
        for i in 0..100u64 {
            mailbox.write(i);
        }
        assert_eq!(mailbox.read(), Some(99));
    }

    #[test]
    fn test_read_is_non_destructive() {
        let mailbox = Mailbox::new();
        mailbox.write(7u64);
        assert_eq!(mailbox.read(), Some(7));
        assert_eq!(mailbox.read(), Some(7));
    }

    /// 同一读者观察到的序号必须单调不减（不会读到比上次更旧的消息）
    #[test]
    fn test_monotonic_visibility_under_concurrent_writes() {
        let mailbox = Arc::new(Mailbox::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let mailbox = mailbox.clone();
            let done = done.clone();
            thread::spawn(move || {
                for i in 0..50_000u64 {
                    mailbox.write(i);
                }
                done.store(true, Ordering::Release);
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let mailbox = mailbox.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut last_seen = 0u64;
                    while !done.load(Ordering::Acquire) {
                        if let Some(value) = mailbox.read() {
                            assert!(
                                value >= last_seen,
                                "went backwards: {} after {}",
                                value,
                                last_seen
                            );
                            last_seen = value;
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(mailbox.read(), Some(49_999));
    }
}
