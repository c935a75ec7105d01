use crate::sync::Mutex;
use std::vec::Vec;

/// Types whose mutable state can be wiped before they are handed out again.
///
/// Recycled instances carry whatever their previous holder left behind, so
/// [`Pool::acquire`] calls `reset` on every recycled instance.
///
/// 可被复用的类型。回收的实例保留着上一位持有者的状态，
/// 因此 [`Pool::acquire`] 会在交出之前调用 `reset`。
pub trait Reset {
    fn reset(&self);
}

/// A bounded free list of reusable instances.
///
/// `release` hands an instance back; the caller must not touch it afterwards.
/// There is no guarantee about when (or whether) a released instance is
/// reused. At most `max_idle` instances are kept, the rest are dropped.
///
/// 有界的空闲列表。`release` 之后调用者不得再访问该实例；
/// 何时复用、是否复用均无保证。最多保留 `max_idle` 个实例，多余的直接丢弃。
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T> Pool<T> {
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Take a recycled instance as-is, without resetting it.
    ///
    /// For holders that overwrite every field of the instance themselves.
    #[inline]
    pub fn take(&self) -> Option<T> {
        self.free.lock().pop()
    }

    /// Return an instance to the pool.
    #[inline]
    pub fn release(&self, item: T) {
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(item);
        }
    }

    /// Number of instances currently waiting to be reused.
    #[inline]
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl<T: Reset> Pool<T> {
    /// Hand out a recycled instance (reset first) or a new one from `create`.
    ///
    /// 返回一个已重置的回收实例，若池为空则由 `create` 新建。
    #[inline]
    pub fn acquire(&self, create: impl FnOnce() -> T) -> T {
        match self.take() {
            Some(item) => {
                item.reset();
                item
            }
            None => create(),
        }
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}
