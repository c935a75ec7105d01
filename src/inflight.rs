use crate::sync::{Condvar, Mutex};

/// Counts detached background tasks so teardown can wait for them.
///
/// 统计后台任务数量，供关闭时等待其全部完成。
pub(crate) struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    /// Must be called before the task is spawned, never from inside it.
    #[inline]
    pub(crate) fn start(&self) {
        *self.count.lock() += 1;
    }

    #[inline]
    pub(crate) fn finish(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    /// Block until every started task has finished.
    pub(crate) fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            count = self.idle.wait(count);
        }
    }

    #[inline]
    pub(crate) fn running(&self) -> usize {
        *self.count.lock()
    }
}
