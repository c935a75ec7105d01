use crate::pool::Reset;
use crate::sync::{Arc, AtomicBool, Condvar, Mutex, Ordering};

enum Mailbox<M> {
    Empty,
    Pending(M),
    Destroyed,
}

/// A single-capacity mailbox owned by one subscriber of a
/// [`SlotQueue`](crate::SlotQueue).
///
/// Holds at most one undelivered message; a newer broadcast replaces an
/// unread one. Once destroyed (by
/// [`discard_node`](crate::SlotQueue::discard_node) or queue shutdown) the
/// slot refuses all further messages.
///
/// 单容量邮箱，属于 [`SlotQueue`](crate::SlotQueue) 的一个订阅者。
/// 最多保存一条未读消息，新广播会覆盖未读的旧消息；被销毁后拒绝任何新消息。
pub struct Slot<M> {
    mailbox: Mutex<Mailbox<M>>,
    ready: Condvar,
    /// Set once a scan has recorded this destroyed slot as garbage.
    reported: AtomicBool,
    /// Identity of the queue that created the slot.
    owner: usize,
}

impl<M> Slot<M> {
    pub(crate) fn new(owner: usize) -> Self {
        Self {
            mailbox: Mutex::new(Mailbox::Empty),
            ready: Condvar::new(),
            reported: AtomicBool::new(false),
            owner,
        }
    }

    /// Take the pending message, if any.
    pub fn try_recv(&self) -> Option<M> {
        let mut mailbox = self.mailbox.lock();
        match std::mem::replace(&mut *mailbox, Mailbox::Empty) {
            Mailbox::Pending(message) => Some(message),
            other => {
                *mailbox = other;
                None
            }
        }
    }

    /// Block until a message arrives.
    ///
    /// Returns `None` once the slot is destroyed.
    ///
    /// 阻塞直到收到消息；槽位被销毁后返回 `None`。
    pub fn recv(&self) -> Option<M> {
        let mut mailbox = self.mailbox.lock();
        loop {
            match std::mem::replace(&mut *mailbox, Mailbox::Empty) {
                Mailbox::Pending(message) => return Some(message),
                Mailbox::Destroyed => {
                    *mailbox = Mailbox::Destroyed;
                    return None;
                }
                Mailbox::Empty => mailbox = self.ready.wait(mailbox),
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(*self.mailbox.lock(), Mailbox::Destroyed)
    }

    /// Last-write-wins delivery. Refused (returns `false`) once destroyed.
    pub(crate) fn deliver(&self, message: M) -> bool {
        let mut mailbox = self.mailbox.lock();
        if matches!(*mailbox, Mailbox::Destroyed) {
            return false;
        }
        *mailbox = Mailbox::Pending(message);
        drop(mailbox);
        self.ready.notify_one();
        true
    }

    /// Set the destroy marker, dropping any unread message.
    ///
    /// Returns `false` if the slot was already destroyed.
    pub(crate) fn destroy(&self) -> bool {
        let mut mailbox = self.mailbox.lock();
        if matches!(*mailbox, Mailbox::Destroyed) {
            return false;
        }
        *mailbox = Mailbox::Destroyed;
        drop(mailbox);
        self.ready.notify_all();
        true
    }

    #[inline]
    pub(crate) fn owned_by(&self, queue: usize) -> bool {
        self.owner == queue
    }

    /// Claim the right to record this slot's position as garbage.
    ///
    /// Succeeds once per destruction, however many scans see the slot.
    #[inline]
    pub(crate) fn claim_garbage(&self) -> bool {
        !self.reported.swap(true, Ordering::AcqRel)
    }
}

impl<M> Reset for Arc<Slot<M>> {
    fn reset(&self) {
        *self.mailbox.lock() = Mailbox::Empty;
        self.reported.store(false, Ordering::Release);
    }
}

impl<M> std::fmt::Debug for Slot<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.mailbox.lock() {
            Mailbox::Empty => "empty",
            Mailbox::Pending(_) => "pending",
            Mailbox::Destroyed => "destroyed",
        };
        f.debug_struct("Slot").field("state", &state).finish()
    }
}
