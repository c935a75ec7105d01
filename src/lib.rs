//! Concurrent collections for workloads dominated by full scans.
//!
//! Both structures let any number of threads walk the whole collection while
//! others add and remove members, without scanners paying for writer
//! activity and without a scanner ever seeing a half-unlinked structure.
//! Physical removal is deferred and batched:
//!
//! - [`TombSet`]: a set backed by a key index plus a linked list. `delete`
//!   tombstones in O(1); tombstones are unlinked in batches by a background
//!   thread. Scans are bounded by the tail seen when they start.
//! - [`SlotQueue`]: a broadcast queue of single-message [`Slot`]s. `scan`
//!   pushes one message into every live slot; discarded slots are
//!   swap-removed in batches.
//!
//! 面向高频全量遍历的并发集合。任意数量的线程可以遍历整个集合，
//! 同时其他线程增删成员；扫描者不承担写入者的开销，也不会看到断链一半的结构。
//! 物理删除被延迟并批量执行。
//!
//! ```
//! use std::ops::ControlFlow;
//! use tombscan::{SlotQueue, TombSet};
//!
//! let connections = TombSet::new(64);
//! connections.put("alice").unwrap();
//! connections.put("bob").unwrap();
//! connections.delete("alice").unwrap();
//!
//! let mut seen = Vec::new();
//! connections.scan(|name| {
//!     seen.push(*name);
//!     ControlFlow::Continue(())
//! });
//! assert_eq!(seen, ["bob"]);
//!
//! let queue = SlotQueue::new(16, 64);
//! let slot = queue.get_node().unwrap();
//! queue.scan(42u32, || ControlFlow::Continue(()));
//! assert_eq!(slot.try_recv(), Some(42));
//! ```

mod arena;
mod builder;
mod error;
mod index;
mod inflight;
mod pool;
mod queue;
mod set;
mod slot;
mod sync;

pub use builder::{SlotQueueBuilder, TombSetBuilder};
pub use error::{Error, Result};
pub use index::KeyIndex;
pub use pool::{Pool, Reset};
pub use queue::SlotQueue;
pub use set::TombSet;
pub use slot::Slot;
