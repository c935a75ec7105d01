use crate::sync::{AtomicBool, AtomicPtr, AtomicUsize, Mutex, Ordering};
use std::boxed::Box;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

/// Nodes in the first segment; segment `k` holds `FIRST_SEGMENT << k` nodes.
/// 第一个段中的节点数；第 `k` 段容纳 `FIRST_SEGMENT << k` 个节点。
#[cfg(not(feature = "loom"))]
const FIRST_SEGMENT: usize = 32;
#[cfg(feature = "loom")]
const FIRST_SEGMENT: usize = 2;

#[cfg(not(feature = "loom"))]
const SEGMENTS: usize = 26;
#[cfg(feature = "loom")]
const SEGMENTS: usize = 4;

const SEGMENT_SHIFT: u32 = FIRST_SEGMENT.trailing_zeros();

/// Raw link value meaning "no node".
const NIL: usize = usize::MAX;

/// Stable handle of a node inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

#[inline]
fn encode(id: Option<NodeId>) -> usize {
    id.map_or(NIL, |id| id.0)
}

#[inline]
fn decode(raw: usize) -> Option<NodeId> {
    (raw != NIL).then_some(NodeId(raw))
}

/// Map a node index to `(segment, offset)`.
#[inline]
fn locate(index: usize) -> (usize, usize) {
    let biased = index + FIRST_SEGMENT;
    let bit = usize::BITS - 1 - biased.leading_zeros();
    ((bit - SEGMENT_SHIFT) as usize, biased - (1 << bit))
}

#[inline]
fn segment_len(segment: usize) -> usize {
    FIRST_SEGMENT << segment
}

/// One element of the tombstoned list.
///
/// `payload` is null once the node has been tombstoned. It is the only field
/// scanners read without holding the list lock, so it is published with
/// release stores and read with acquire loads. The links are only written
/// under the list write lock.
///
/// 链表中的一个节点。`payload` 为 null 表示已被标记删除（墓碑）。
/// 它是扫描者在不持有链表锁时读取的唯一字段，因此使用 Release 写、Acquire 读。
pub(crate) struct Node<T> {
    payload: AtomicPtr<T>,
    prev: AtomicUsize,
    next: AtomicUsize,
    linked: AtomicBool,
}

impl<T> Node<T> {
    fn vacant() -> Self {
        Self {
            payload: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicUsize::new(NIL),
            next: AtomicUsize::new(NIL),
            linked: AtomicBool::new(false),
        }
    }

    /// Rewrite every field for a new occupant.
    ///
    /// The node must not be reachable from the list or the index.
    pub(crate) fn occupy(&self, payload: T) {
        self.prev.store(NIL, Ordering::Relaxed);
        self.next.store(NIL, Ordering::Relaxed);
        self.linked.store(false, Ordering::Relaxed);
        self.payload
            .store(Box::into_raw(Box::new(payload)), Ordering::Release);
    }

    /// Detach the payload, leaving the node tombstoned.
    ///
    /// The returned pointer is still readable by scanners that loaded it
    /// earlier; it must only be freed once no scan can be running.
    #[inline]
    pub(crate) fn vacate(&self) -> Option<NonNull<T>> {
        NonNull::new(self.payload.swap(ptr::null_mut(), Ordering::AcqRel))
    }

    /// Free the payload of a node that no scanner can reach.
    pub(crate) fn evict(&self) {
        if let Some(payload) = self.vacate() {
            // SAFETY: the node is unreachable, so nobody else holds the payload.
            unsafe {
                drop(Box::from_raw(payload.as_ptr()));
            }
        }
    }

    /// # Safety
    ///
    /// The caller must prevent the payload from being freed for `'a`, i.e.
    /// hold the set's compaction lock in shared mode.
    #[inline]
    pub(crate) unsafe fn payload<'a>(&'a self) -> Option<&'a T> {
        let ptr = self.payload.load(Ordering::Acquire);
        // SAFETY: non-null payloads come from `Box::into_raw` in `occupy` and
        // are only freed under the exclusive compaction lock.
        unsafe { ptr.as_ref() }
    }

    #[inline]
    pub(crate) fn next(&self) -> Option<NodeId> {
        decode(self.next.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_next(&self, next: Option<NodeId>) {
        self.next.store(encode(next), Ordering::Release);
    }

    #[inline]
    pub(crate) fn prev(&self) -> Option<NodeId> {
        decode(self.prev.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_prev(&self, prev: Option<NodeId>) {
        self.prev.store(encode(prev), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_linked(&self, linked: bool) {
        self.linked.store(linked, Ordering::Relaxed);
    }
}

/// Append-only node storage with stable addresses.
///
/// Nodes live in geometrically growing segments that are never moved or
/// freed before the arena itself, so a `&Node` handed to a scanner stays
/// valid even while other threads allocate. Freed nodes are not returned
/// here; the set recycles their ids through its [`Pool`](crate::Pool).
///
/// 仅追加的节点存储，地址稳定。节点位于按几何级数增长的段中，
/// 段在 arena 销毁之前不会移动或释放，因此扫描者持有的 `&Node` 在其他线程分配时依然有效。
pub(crate) struct Arena<T> {
    segments: [AtomicPtr<Node<T>>; SEGMENTS],
    allocated: Mutex<usize>,
    _owns: PhantomData<T>,
}

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Self {
            segments: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            allocated: Mutex::new(0),
            _owns: PhantomData,
        }
    }

    /// Allocate a fresh, vacant node.
    ///
    /// # Panics
    /// Panics when every segment is in use, like `Vec` on capacity overflow.
    pub(crate) fn alloc(&self) -> NodeId {
        let mut allocated = self.allocated.lock();
        let index = *allocated;
        let (segment, offset) = locate(index);
        assert!(segment < SEGMENTS, "node arena exhausted");

        if offset == 0 {
            let nodes: Box<[Node<T>]> = (0..segment_len(segment)).map(|_| Node::vacant()).collect();
            let base = Box::into_raw(nodes) as *mut Node<T>;
            self.segments[segment].store(base, Ordering::Release);
        }

        *allocated = index + 1;
        NodeId(index)
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &Node<T> {
        let (segment, offset) = locate(id.0);
        let base = self.segments[segment].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "node {id:?} was never allocated");
        // SAFETY: every `NodeId` is produced by `alloc`, which publishes the
        // segment before handing the id out, and segments live as long as
        // the arena.
        unsafe { &*base.add(offset) }
    }

    /// Number of nodes ever allocated.
    #[inline]
    pub(crate) fn allocated(&self) -> usize {
        *self.allocated.lock()
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        // Nobody else can reach the arena now; free the live payloads, then
        // the segments themselves.
        for index in 0..self.allocated() {
            self.get(NodeId(index)).evict();
        }

        for (segment, slot) in self.segments.iter().enumerate() {
            let base = slot.load(Ordering::Relaxed);
            if !base.is_null() {
                // SAFETY: `base` is the `Box<[Node<T>]>` leaked by `alloc` for
                // this segment, with exactly `segment_len(segment)` nodes.
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                        base,
                        segment_len(segment),
                    )));
                }
            }
        }
    }
}
