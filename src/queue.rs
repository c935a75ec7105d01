use crate::builder::SlotQueueBuilder;
use crate::error::{Error, Result};
use crate::inflight::InFlight;
use crate::pool::Pool;
use crate::slot::Slot;
use crate::sync::{Arc, AtomicBool, AtomicUsize, Mutex, Ordering, RwLock, thread};
use std::ops::ControlFlow;
use std::vec::Vec;
use tracing::{debug, trace};

/// Source of queue identities; slots remember the queue that created them.
static NEXT_QUEUE_ID: std::sync::atomic::AtomicUsize =
    std::sync::atomic::AtomicUsize::new(0);

struct QueueInner<M> {
    id: usize,
    slots: RwLock<Vec<Arc<Slot<M>>>>,
    /// Scans in progress; new slots are refused while it is non-zero.
    scanning: AtomicUsize,
    /// Positions of destroyed slots, valid against the array as it stands.
    garbage: Mutex<Vec<usize>>,
    gc_threshold: usize,
    collecting: AtomicBool,
    /// Serialises collection against the shutdown drain.
    drain: Mutex<()>,
    in_flight: InFlight,
    invalid: AtomicBool,
    live: AtomicUsize,
    pool: Pool<Arc<Slot<M>>>,
}

impl<M> QueueInner<M> {
    #[inline]
    fn invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    /// Merge positions found by a scan; the caller still holds the array
    /// read lock, so the positions cannot go stale before they are merged.
    ///
    /// Returns `true` when the caller must launch a background collection.
    fn merge_garbage(&self, found: Vec<usize>) -> bool {
        let mut garbage = self.garbage.lock();
        garbage.extend(found);

        if garbage.len() <= self.gc_threshold || self.invalid() {
            return false;
        }
        if self
            .collecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.in_flight.start();
        true
    }

    /// Swap-remove every garbage position. Caller owns the `collecting` flag.
    ///
    /// With `sweep`, destroyed slots that no scan has reported yet are
    /// collected too (one pass over the array).
    ///
    /// 交换删除所有垃圾位置。`sweep` 为真时额外遍历数组，回收尚未被扫描记录的已销毁槽位。
    fn collect(&self, sweep: bool) -> usize {
        let _drain = self.drain.lock();
        if self.invalid() {
            self.garbage.lock().clear();
            return 0;
        }

        let mut slots = self.slots.write();
        let mut positions = std::mem::take(&mut *self.garbage.lock());
        if sweep {
            // Also picks up slots claimed by a scan whose handler panicked
            // before it could merge them.
            positions.extend(
                slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.is_destroyed())
                    .map(|(pos, _)| pos),
            );
        }

        // Highest position first: the element swapped in from the end is
        // then never itself a pending garbage position.
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();
        let mut removed = Vec::with_capacity(positions.len());
        for pos in positions {
            debug_assert!(pos < slots.len(), "stale garbage position {pos}");
            if pos < slots.len() {
                removed.push(slots.swap_remove(pos));
            }
        }
        drop(slots);

        let count = removed.len();
        for slot in removed {
            self.recycle(slot);
        }
        count
    }

    /// Live counter decrement that cannot wrap when it races shutdown's reset.
    #[inline]
    fn release_live(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Return a slot to the pool unless its subscriber still holds it.
    #[inline]
    fn recycle(&self, slot: Arc<Slot<M>>) {
        if Arc::strong_count(&slot) == 1 {
            self.pool.release(slot);
        }
    }
}

/// Keeps the active-scan gate raised for its lifetime, unwinding included.
struct ScanGate<'a>(&'a AtomicUsize);

impl<'a> ScanGate<'a> {
    fn raise(scanning: &'a AtomicUsize) -> Self {
        scanning.fetch_add(1, Ordering::AcqRel);
        Self(scanning)
    }
}

impl Drop for ScanGate<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A broadcast queue of per-subscriber single-message slots.
///
/// Subscribers obtain a [`Slot`] with [`get_node`](Self::get_node) and read
/// from it; a producer calls [`scan`](Self::scan) to push one message into
/// every live slot. Discarded slots stay in the array until a collection
/// swap-removes them, either in the background once more than `gc_threshold`
/// garbage positions are pending, or on demand via [`gc`](Self::gc).
///
/// While any scan is running, `get_node` refuses new slots instead of
/// waiting, so the array never changes shape under a scan.
///
/// 每个订阅者一个单消息槽位的广播队列。
///
/// 订阅者通过 [`get_node`](Self::get_node) 获得 [`Slot`] 并从中读取；
/// 生产者调用 [`scan`](Self::scan) 向所有存活槽位推送一条消息。
/// 被丢弃的槽位留在数组中，直到垃圾回收将其交换删除：
/// 待回收位置超过 `gc_threshold` 时在后台进行，或通过 [`gc`](Self::gc) 手动触发。
///
/// 扫描进行期间 `get_node` 直接拒绝而不是等待，保证数组形状在扫描中不变。
///
/// **Example**:
/// ```
/// use std::ops::ControlFlow;
/// use tombscan::SlotQueue;
///
/// let queue = SlotQueue::new(16, 1);
/// let a = queue.get_node().unwrap();
/// let b = queue.get_node().unwrap();
/// queue.discard_node(&b);
///
/// let delivered = queue.scan("tick", || ControlFlow::Continue(()));
/// assert_eq!(delivered, 1);
/// assert_eq!(a.try_recv(), Some("tick"));
/// assert_eq!(b.try_recv(), None);
/// ```
pub struct SlotQueue<M> {
    inner: Arc<QueueInner<M>>,
}

impl<M> Clone for SlotQueue<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> SlotQueue<M>
where
    M: Clone + Send + 'static,
{
    /// Create a queue with room for `initial_capacity` slots that collects
    /// garbage once more than `gc_threshold` positions are pending.
    #[inline]
    pub fn new(initial_capacity: usize, gc_threshold: usize) -> Self {
        Self::builder()
            .initial_capacity(initial_capacity)
            .gc_threshold(gc_threshold)
            .build()
    }

    /// Create a builder for configuring the queue.
    #[inline]
    pub fn builder() -> SlotQueueBuilder {
        SlotQueueBuilder::new()
    }

    pub(crate) fn with_config(
        initial_capacity: usize,
        gc_threshold: usize,
        pool_limit: usize,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                slots: RwLock::new(Vec::with_capacity(initial_capacity)),
                scanning: AtomicUsize::new(0),
                garbage: Mutex::new(Vec::new()),
                gc_threshold,
                collecting: AtomicBool::new(false),
                drain: Mutex::new(()),
                in_flight: InFlight::new(),
                invalid: AtomicBool::new(false),
                live: AtomicUsize::new(0),
                pool: Pool::new(pool_limit),
            }),
        }
    }

    /// Register a new subscriber slot.
    ///
    /// Fails with [`Error::Unavailable`] after shutdown, or while a scan is in
    /// progress; the caller should retry later.
    ///
    /// 注册一个新的订阅者槽位。队列已关闭或正在扫描时返回 [`Error::Unavailable`]。
    pub fn get_node(&self) -> Result<Arc<Slot<M>>> {
        let inner = &*self.inner;
        if inner.invalid() {
            return Err(Error::Unavailable);
        }
        if inner.scanning.load(Ordering::Acquire) != 0 {
            trace!("slot admission refused during scan");
            return Err(Error::Unavailable);
        }

        let slot = inner.pool.acquire(|| Arc::new(Slot::new(inner.id)));
        let mut slots = inner.slots.write();
        // Shutdown drains under this lock after invalidating; re-check so
        // a slot is never pushed after the drain.
        if inner.invalid() {
            return Err(Error::Unavailable);
        }
        slots.push(Arc::clone(&slot));
        // Counted before the drain can see the slot.
        inner.live.fetch_add(1, Ordering::AcqRel);
        Ok(slot)
    }

    /// Mark `slot` for removal.
    ///
    /// Any unread message is dropped and the subscriber's `recv` returns
    /// `None` from now on. The slot stays in the array until collected.
    /// Discarding the same slot twice has no further effect, and neither
    /// does discarding a slot handed out by another queue.
    ///
    /// 标记 `slot` 待回收。重复丢弃或丢弃其他队列的槽位均无效果。
    pub fn discard_node(&self, slot: &Slot<M>) {
        if self.inner.invalid() || !slot.owned_by(self.inner.id) {
            return;
        }
        if slot.destroy() {
            self.inner.release_live();
        }
    }

    /// Subscribers that have not been discarded.
    #[inline]
    pub fn valid_count(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Deliver `message` to every live slot, calling `handler` after each
    /// delivery. [`ControlFlow::Break`] from `handler` ends the pass early.
    ///
    /// Destroyed slots are skipped and their positions recorded as garbage;
    /// when more than `gc_threshold` positions are pending a background
    /// collection is launched, unless one is already running.
    ///
    /// Returns the number of slots the message was delivered to.
    ///
    /// 向所有存活槽位投递 `message`，每次投递后调用 `handler`，返回 `Break` 时提前结束。
    /// 已销毁的槽位被跳过并记录为垃圾；待回收数量超过阈值时启动后台回收（单飞）。
    pub fn scan<F>(&self, message: M, mut handler: F) -> usize
    where
        F: FnMut() -> ControlFlow<()>,
    {
        let inner = &*self.inner;
        if inner.invalid() {
            return 0;
        }

        let gate = ScanGate::raise(&inner.scanning);
        let mut delivered = 0;
        let launch = {
            let slots = inner.slots.read();
            let mut found = Vec::new();
            for (pos, slot) in slots.iter().enumerate() {
                if !slot.deliver(message.clone()) {
                    if slot.claim_garbage() {
                        found.push(pos);
                    }
                    continue;
                }
                delivered += 1;
                if handler().is_break() {
                    break;
                }
            }
            inner.merge_garbage(found)
        };
        drop(gate);

        if launch {
            debug!("launching background slot collection");
            let inner = Arc::clone(&self.inner);
            thread::spawn(move || {
                let removed = inner.collect(false);
                inner.collecting.store(false, Ordering::Release);
                debug!(removed, "background slot collection finished");
                inner.in_flight.finish();
            });
        }

        delivered
    }

    /// Collect garbage on the calling thread.
    ///
    /// Besides the positions recorded by scans, this sweeps the array for
    /// discarded slots no scan has seen yet. Returns the number of slots
    /// removed.
    ///
    /// Fails with [`Error::Unavailable`] after shutdown and with
    /// [`Error::AlreadyRunning`] while another collection is in flight.
    ///
    /// 在当前线程上执行垃圾回收，返回移除的槽位数。
    pub fn gc(&self) -> Result<usize> {
        let inner = &*self.inner;
        if inner.invalid() {
            return Err(Error::Unavailable);
        }
        if inner
            .collecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        let removed = inner.collect(true);
        inner.collecting.store(false, Ordering::Release);
        Ok(removed)
    }

    /// Invalidate the queue, wait for in-flight collection, then destroy
    /// every slot and hand it back to the pool.
    ///
    /// Every later operation is a no-op or fails with
    /// [`Error::Unavailable`]. Calling it again does nothing.
    ///
    /// 使队列失效，等待进行中的回收结束，然后销毁所有槽位并归还对象池。
    pub fn shutdown(&self) {
        let inner = &*self.inner;
        {
            // A scan decides whether to launch a collection under this lock,
            // so no collection can start once the flag is set here.
            let _garbage = inner.garbage.lock();
            if inner.invalid.swap(true, Ordering::AcqRel) {
                return;
            }
        }

        inner.in_flight.wait();
        let _drain = inner.drain.lock();
        let slots = std::mem::take(&mut *inner.slots.write());
        inner.garbage.lock().clear();
        inner.live.store(0, Ordering::Release);

        debug!(slots = slots.len(), "slot queue shut down");
        for slot in slots {
            slot.destroy();
            inner.recycle(slot);
        }
    }

    /// Slots physically in the array, including discarded ones not yet collected.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.slots.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of the slot array.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.slots.read().capacity()
    }

    /// Garbage positions recorded and not yet collected.
    #[inline]
    pub fn pending_garbage(&self) -> usize {
        self.inner.garbage.lock().len()
    }

    /// Slots currently parked in the pool.
    #[inline]
    pub fn pooled_slots(&self) -> usize {
        self.inner.pool.idle()
    }

    /// Background collections currently running.
    #[inline]
    pub fn collections_in_flight(&self) -> usize {
        self.inner.in_flight.running()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.inner.invalid()
    }
}

impl<M> std::fmt::Debug for SlotQueue<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotQueue")
            .field("slots", &self.inner.slots.read().len())
            .field("live", &self.inner.live.load(Ordering::Relaxed))
            .field("gc_threshold", &self.inner.gc_threshold)
            .field("invalid", &self.inner.invalid())
            .finish()
    }
}
