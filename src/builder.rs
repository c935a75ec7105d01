use crate::queue::SlotQueue;
use crate::set::TombSet;
use std::hash::Hash;

/// Default number of tombstones that triggers a background compaction.
/// 触发后台压缩的默认墓碑数量。
pub(crate) const DEFAULT_DISCARD_THRESHOLD: usize = 64;

/// Default number of pending garbage positions a scan tolerates before it
/// launches a background collection.
/// 扫描触发后台回收前可容忍的默认待回收位置数。
pub(crate) const DEFAULT_GC_THRESHOLD: usize = 64;

/// Default initial capacity of the slot array.
pub(crate) const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// Default number of idle slots kept for reuse.
pub(crate) const DEFAULT_POOL_LIMIT: usize = 1024;

/// Builder for configuring a [`TombSet`].
///
/// # Example
/// ```
/// use tombscan::TombSet;
///
/// let set: TombSet<u64> = TombSet::<u64>::builder()
///     .discard_threshold(256)
///     .build();
/// ```
///
/// 用于配置 [`TombSet`] 的构建器。
#[derive(Debug, Clone)]
pub struct TombSetBuilder {
    discard_threshold: usize,
}

impl TombSetBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            discard_threshold: DEFAULT_DISCARD_THRESHOLD,
        }
    }

    /// Set how many tombstones accumulate before they are compacted.
    ///
    /// Values below `1` are treated as `1`.
    ///
    /// Default: `64`
    ///
    /// 设置累计多少个墓碑后进行压缩。小于 `1` 的值按 `1` 处理。
    #[inline]
    pub fn discard_threshold(mut self, threshold: usize) -> Self {
        self.discard_threshold = threshold.max(1);
        self
    }

    /// Build the [`TombSet`] with the configured settings.
    #[inline]
    pub fn build<T>(self) -> TombSet<T>
    where
        T: Hash + Eq + Clone + Send + Sync + 'static,
    {
        TombSet::with_config(self.discard_threshold)
    }
}

impl Default for TombSetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for configuring a [`SlotQueue`].
///
/// # Example
/// ```
/// use tombscan::SlotQueue;
///
/// let queue: SlotQueue<u64> = SlotQueue::<u64>::builder()
///     .initial_capacity(10_000)
///     .gc_threshold(128)
///     .pool_limit(256)
///     .build();
/// ```
///
/// 用于配置 [`SlotQueue`] 的构建器。
#[derive(Debug, Clone)]
pub struct SlotQueueBuilder {
    initial_capacity: usize,
    gc_threshold: usize,
    pool_limit: usize,
}

impl SlotQueueBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            pool_limit: DEFAULT_POOL_LIMIT,
        }
    }

    /// Set the initial capacity of the slot array.
    ///
    /// Default: `16`
    #[inline]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set the garbage count above which a scan launches a background
    /// collection.
    ///
    /// Values below `1` are treated as `1`.
    ///
    /// Default: `64`
    ///
    /// 设置扫描触发后台回收的垃圾数量阈值。小于 `1` 的值按 `1` 处理。
    #[inline]
    pub fn gc_threshold(mut self, threshold: usize) -> Self {
        self.gc_threshold = threshold.max(1);
        self
    }

    /// Set how many collected slots are kept for reuse.
    ///
    /// Default: `1024`
    #[inline]
    pub fn pool_limit(mut self, limit: usize) -> Self {
        self.pool_limit = limit;
        self
    }

    /// Build the [`SlotQueue`] with the configured settings.
    #[inline]
    pub fn build<M>(self) -> SlotQueue<M>
    where
        M: Clone + Send + 'static,
    {
        SlotQueue::with_config(self.initial_capacity, self.gc_threshold, self.pool_limit)
    }
}

impl Default for SlotQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}
