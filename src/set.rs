use crate::arena::{Arena, NodeId};
use crate::builder::TombSetBuilder;
use crate::error::{Error, Result};
use crate::index::KeyIndex;
use crate::inflight::InFlight;
use crate::pool::Pool;
use crate::sync::{Arc, AtomicBool, AtomicUsize, Mutex, Ordering, RwLock, thread};
use std::borrow::Borrow;
use std::hash::Hash;
use std::ops::ControlFlow;
use std::ptr::NonNull;
use std::vec::Vec;
use tracing::debug;

/// A node that has left the index but is still linked into the list.
///
/// Owns the detached payload until compaction (or teardown) frees it.
///
/// 已从索引中移除但仍挂在链表上的节点，持有被摘下的 payload 直到压缩时释放。
struct Tombstone<T> {
    id: NodeId,
    payload: NonNull<T>,
}

// SAFETY: a tombstone is the unique owner of its payload allocation.
unsafe impl<T: Send> Send for Tombstone<T> {}

impl<T> Drop for Tombstone<T> {
    fn drop(&mut self) {
        // SAFETY: the pointer came from `Box::into_raw` in `Node::occupy`, and
        // tombstones are only dropped when no scan can still be reading it.
        unsafe {
            drop(Box::from_raw(self.payload.as_ptr()));
        }
    }
}

/// Head and tail of the list; guarded by the list lock.
struct Ends {
    head: Option<NodeId>,
    tail: Option<NodeId>,
}

struct SetInner<T> {
    arena: Arena<T>,
    index: KeyIndex<T, NodeId>,
    /// List order. Readers only hold it long enough to copy head and tail.
    list: RwLock<Ends>,
    /// Shared by every scan, exclusive while compaction unlinks nodes.
    compaction: RwLock<()>,
    pending: Mutex<Vec<Tombstone<T>>>,
    /// Tombstones not yet unlinked, including batches handed to compaction.
    tombstones: AtomicUsize,
    pool: Pool<NodeId>,
    discard_threshold: usize,
    closing: AtomicBool,
    in_flight: InFlight,
}

impl<T> SetInner<T> {
    fn link(&self, id: NodeId) {
        let mut ends = self.list.write();
        let node = self.arena.get(id);
        node.set_prev(ends.tail);
        node.set_next(None);
        node.set_linked(true);

        match ends.tail {
            Some(tail) => self.arena.get(tail).set_next(Some(id)),
            None => ends.head = Some(id),
        }
        ends.tail = Some(id);
    }

    /// Physically unlink a batch of tombstones and recycle their nodes.
    ///
    /// Takes the compaction lock, then the list lock; this order is the only
    /// one used anywhere. Tombstones whose `put` has not linked them yet are
    /// carried over to the pending batch.
    fn compact(&self, batch: Vec<Tombstone<T>>) -> usize {
        let mut unlinked = Vec::with_capacity(batch.len());
        let mut carried = Vec::new();

        {
            let _exclusive = self.compaction.write();
            let mut ends = self.list.write();

            for tomb in batch {
                let node = self.arena.get(tomb.id);
                if !node.is_linked() {
                    carried.push(tomb);
                    continue;
                }

                let prev = node.prev();
                let next = node.next();
                match prev {
                    Some(prev) => self.arena.get(prev).set_next(next),
                    None => ends.head = next,
                }
                match next {
                    Some(next) => self.arena.get(next).set_prev(prev),
                    None => ends.tail = prev,
                }
                node.set_linked(false);
                unlinked.push(tomb);
            }
        }

        // No scan can reach these nodes any more; free payloads outside the locks.
        let count = unlinked.len();
        self.tombstones.fetch_sub(count, Ordering::AcqRel);
        for tomb in unlinked {
            let id = tomb.id;
            drop(tomb);
            self.pool.release(id);
        }

        if !carried.is_empty() {
            self.pending.lock().extend(carried);
        }

        count
    }
}

/// A concurrent set tuned for frequent full scans.
///
/// Membership lives in a [`KeyIndex`]; order lives in a doubly linked list of
/// arena nodes. `delete` only tombstones a node (nulls its payload and queues
/// it), so it never waits for scanners. Once `discard_threshold` tombstones
/// pile up, the batch is unlinked by a background thread that excludes scans
/// only for the unlink itself.
///
/// `scan` is snapshot-bounded: it walks from the head to the tail it saw when
/// it started, so concurrent `put`s never make a scan longer.
///
/// Cloning a `TombSet` is cheap and yields another handle to the same set.
///
/// 为高频全量遍历优化的并发集合。
///
/// 成员关系保存在 [`KeyIndex`] 中，顺序保存在由 arena 节点组成的双向链表中。
/// `delete` 只做墓碑标记（清空 payload 并入队），从不等待扫描者。
/// 当墓碑数量达到 `discard_threshold` 时，整批节点由后台线程摘除，
/// 摘除过程只在断链的瞬间与扫描互斥。
///
/// `scan` 以开始时看到的尾节点为界，并发的 `put` 不会让扫描变长。
///
/// **Example**:
/// ```
/// use std::ops::ControlFlow;
/// use tombscan::{Error, TombSet};
///
/// let set = TombSet::new(100);
/// set.put(5u64).unwrap();
/// assert_eq!(set.put(5), Err(Error::AlreadyExists));
///
/// set.delete(&5).unwrap();
/// assert_eq!(set.delete(&5), Err(Error::NotFound));
///
/// let visited = set.scan(|_| ControlFlow::Continue(()));
/// assert_eq!(visited, 0);
/// ```
pub struct TombSet<T> {
    inner: Arc<SetInner<T>>,
}

impl<T> Clone for TombSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> TombSet<T>
where
    T: Hash + Eq + Clone + Send + Sync + 'static,
{
    /// Create a set that compacts every `discard_threshold` deletions.
    /// 创建一个每累计 `discard_threshold` 次删除就压缩一次的集合。
    #[inline]
    pub fn new(discard_threshold: usize) -> Self {
        Self::builder().discard_threshold(discard_threshold).build()
    }

    /// Create a builder for configuring the set.
    #[inline]
    pub fn builder() -> TombSetBuilder {
        TombSetBuilder::new()
    }

    pub(crate) fn with_config(discard_threshold: usize) -> Self {
        Self {
            inner: Arc::new(SetInner {
                arena: Arena::new(),
                index: KeyIndex::new(),
                list: RwLock::new(Ends {
                    head: None,
                    tail: None,
                }),
                compaction: RwLock::new(()),
                pending: Mutex::new(Vec::new()),
                tombstones: AtomicUsize::new(0),
                // Arena nodes are never freed, so every recycled id is kept.
                pool: Pool::new(usize::MAX),
                discard_threshold,
                closing: AtomicBool::new(false),
                in_flight: InFlight::new(),
            }),
        }
    }

    /// Insert `payload` at the tail.
    ///
    /// The payload is its own key: a payload equal to one already live is
    /// rejected with [`Error::AlreadyExists`] and the set is left unchanged.
    ///
    /// 在尾部插入 `payload`。payload 本身即为键，已存在时返回 [`Error::AlreadyExists`]。
    pub fn put(&self, payload: T) -> Result<()> {
        let inner = &*self.inner;
        let id = inner.pool.take().unwrap_or_else(|| inner.arena.alloc());
        let node = inner.arena.get(id);

        // The node must carry its payload before the index can hand it to `delete`.
        node.occupy(payload.clone());
        if !inner.index.insert(payload, id) {
            node.evict();
            inner.pool.release(id);
            return Err(Error::AlreadyExists);
        }

        inner.link(id);
        Ok(())
    }

    /// Tombstone `payload`.
    ///
    /// The payload disappears from every scan that starts after this returns.
    /// Its node stays linked until the pending batch reaches the discard
    /// threshold, at which point the whole batch is handed to a background
    /// compaction thread; this call never waits for it.
    ///
    /// 将 `payload` 标记为墓碑。返回后开始的扫描都不会再看到它；
    /// 批次达到阈值时交给后台线程压缩，本调用不会等待。
    pub fn delete<Q>(&self, payload: &Q) -> Result<()>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let inner = &*self.inner;
        let id = inner.index.remove(payload).ok_or(Error::NotFound)?;
        let Some(detached) = inner.arena.get(id).vacate() else {
            debug_assert!(false, "indexed node {id:?} had no payload");
            return Ok(());
        };
        inner.tombstones.fetch_add(1, Ordering::AcqRel);

        let batch = {
            let mut pending = inner.pending.lock();
            pending.push(Tombstone {
                id,
                payload: detached,
            });
            if pending.len() >= inner.discard_threshold && !inner.closing.load(Ordering::Acquire) {
                inner.in_flight.start();
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };

        if let Some(batch) = batch {
            debug!(batch = batch.len(), "launching background compaction");
            let inner = Arc::clone(&self.inner);
            thread::spawn(move || {
                let unlinked = inner.compact(batch);
                debug!(unlinked, "background compaction finished");
                inner.in_flight.finish();
            });
        }

        Ok(())
    }

    /// Visit every live payload, head to tail.
    ///
    /// The tail is captured when the scan starts; nodes appended later are
    /// not visited. Payloads tombstoned during the scan are skipped as soon
    /// as the scan reaches them. Returning [`ControlFlow::Break`] from
    /// `visitor` ends the scan early.
    ///
    /// Returns the number of payloads handed to `visitor`.
    ///
    /// **Note**: `visitor` may call `put` and `delete` on this set, but must
    /// not call [`compact`](Self::compact), which would wait for this scan.
    ///
    /// 从头到尾访问所有存活的 payload。尾节点在扫描开始时确定，之后追加的节点不会被访问；
    /// 扫描期间被删除的 payload 在到达时被跳过。`visitor` 返回 `Break` 时提前结束。
    pub fn scan<F>(&self, mut visitor: F) -> usize
    where
        F: FnMut(&T) -> ControlFlow<()>,
    {
        let inner = &*self.inner;
        let _shared = inner.compaction.read();

        let (head, tail) = {
            let ends = inner.list.read();
            (ends.head, ends.tail)
        };
        let (Some(mut cursor), Some(tail)) = (head, tail) else {
            return 0;
        };

        let mut visited = 0;
        loop {
            let node = inner.arena.get(cursor);
            // SAFETY: `_shared` keeps compaction, the only place payloads are
            // freed, out for the whole scan.
            if let Some(payload) = unsafe { node.payload() } {
                visited += 1;
                if visitor(payload).is_break() {
                    break;
                }
            }

            // The captured tail is the last stop, even when it is also the head.
            if cursor == tail {
                break;
            }
            match node.next() {
                Some(next) => cursor = next,
                None => break,
            }
        }

        visited
    }

    /// Whether `payload` is currently live.
    #[inline]
    pub fn contains<Q>(&self, payload: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.index.lookup(payload).is_some()
    }

    /// Unlink the current pending batch on the calling thread.
    ///
    /// Returns the number of nodes unlinked. Waits for running scans.
    ///
    /// 在当前线程上压缩待删除批次，返回被摘除的节点数。会等待正在进行的扫描。
    pub fn compact(&self) -> usize {
        let batch = std::mem::take(&mut *self.inner.pending.lock());
        if batch.is_empty() {
            return 0;
        }
        self.inner.compact(batch)
    }

    /// Wait for in-flight background compaction to finish.
    ///
    /// No background compaction is launched afterwards; later tombstones stay
    /// pending until [`compact`](Self::compact) or drop. Other operations keep
    /// working, so callers should stop their own traffic first.
    ///
    /// 等待进行中的后台压缩结束，此后不再启动后台压缩。
    pub fn shutdown(&self) {
        {
            let _pending = self.inner.pending.lock();
            self.inner.closing.store(true, Ordering::Release);
        }
        self.inner.in_flight.wait();
        debug!(
            live = self.valid_size(),
            pending = self.inner.tombstones.load(Ordering::Acquire),
            "tomb set shut down"
        );
    }

    /// Live payloads plus tombstones that are not unlinked yet.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.valid_size() + self.inner.tombstones.load(Ordering::Acquire)
    }

    /// Live payloads.
    #[inline]
    pub fn valid_size(&self) -> usize {
        self.inner.index.len()
    }

    /// Nodes currently parked in the pool.
    #[inline]
    pub fn pooled_nodes(&self) -> usize {
        self.inner.pool.idle()
    }

    /// Nodes ever allocated by this set.
    #[inline]
    pub fn allocated_nodes(&self) -> usize {
        self.inner.arena.allocated()
    }

    /// Background compactions currently running.
    #[inline]
    pub fn compactions_in_flight(&self) -> usize {
        self.inner.in_flight.running()
    }
}

impl<T: Hash + Eq> std::fmt::Debug for TombSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombSet")
            .field("live", &self.inner.index.len())
            .field("tombstones", &self.inner.tombstones.load(Ordering::Relaxed))
            .field("discard_threshold", &self.inner.discard_threshold)
            .finish()
    }
}
