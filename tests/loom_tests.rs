//! Loom-based concurrency tests
//!
//! These tests use the `loom` library to exhaustively check thread
//! interleavings of tombstoning, compaction, broadcast and collection, and
//! detect data races, deadlocks and memory ordering issues.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`

#![cfg(feature = "loom")]

use loom::thread;
use std::ops::ControlFlow;
use tombscan::{Error, SlotQueue, TombSet};

/// Test: A scan racing a delete (and the compaction it launches) only ever
/// sees live payloads, and always sees the payload nobody deletes
#[test]
fn loom_scan_vs_delete() {
    loom::model(|| {
        let set = TombSet::new(1);
        set.put(1u32).unwrap();
        set.put(2u32).unwrap();

        let deleter = {
            let set = set.clone();
            thread::spawn(move || set.delete(&1).unwrap())
        };

        let mut seen = Vec::new();
        set.scan(|payload| {
            seen.push(*payload);
            ControlFlow::Continue(())
        });
        assert!(seen == [1, 2] || seen == [2]);

        deleter.join().unwrap();
        set.shutdown();
        assert_eq!(set.total_size(), 1);
    });
}

/// Test: Two threads putting the same payload, exactly one wins
#[test]
fn loom_concurrent_put_same_payload() {
    loom::model(|| {
        let set = TombSet::new(4);

        let other = {
            let set = set.clone();
            thread::spawn(move || set.put(7u32))
        };
        let mine = set.put(7u32);
        let theirs = other.join().unwrap();

        assert!(mine.is_ok() != theirs.is_ok());
        assert!(mine == Err(Error::AlreadyExists) || theirs == Err(Error::AlreadyExists));
        assert_eq!(set.valid_size(), 1);
    });
}

/// Test: A delete that lands before `put` links the node is carried over
/// instead of unlinking a node that is not in the list yet
#[test]
fn loom_delete_before_link() {
    loom::model(|| {
        let set = TombSet::new(1);

        let putter = {
            let set = set.clone();
            thread::spawn(move || set.put(3u32).unwrap())
        };
        let deleted = set.delete(&3).is_ok();

        putter.join().unwrap();
        set.shutdown();
        set.compact();

        assert_eq!(set.valid_size(), if deleted { 0 } else { 1 });
        assert_eq!(set.total_size(), set.valid_size());
        let visited = set.scan(|_| ControlFlow::Continue(()));
        assert_eq!(visited, set.valid_size());
    });
}

/// Test: Appends racing a scan never extend it past the captured tail
#[test]
fn loom_scan_vs_put() {
    loom::model(|| {
        let set = TombSet::new(4);
        set.put(1u32).unwrap();

        let writer = {
            let set = set.clone();
            thread::spawn(move || set.put(2u32).unwrap())
        };

        let mut seen = Vec::new();
        set.scan(|payload| {
            seen.push(*payload);
            ControlFlow::Continue(())
        });
        assert!(seen == [1] || seen == [1, 2]);

        writer.join().unwrap();
    });
}

/// Test: A broadcast racing a discard never delivers to a destroyed slot
#[test]
fn loom_queue_scan_vs_discard() {
    loom::model(|| {
        let queue = SlotQueue::new(2, 1);
        let a = queue.get_node().unwrap();
        let b = queue.get_node().unwrap();

        let discarder = {
            let queue = queue.clone();
            let a = a.clone();
            thread::spawn(move || queue.discard_node(&a))
        };

        let delivered = queue.scan(9u32, || ControlFlow::Continue(()));
        assert!(delivered == 1 || delivered == 2);
        assert_eq!(b.try_recv(), Some(9));

        discarder.join().unwrap();
        assert_eq!(a.try_recv(), None);
        assert_eq!(queue.valid_count(), 1);
        queue.shutdown();
    });
}

/// Test: Manual collection racing a scan leaves only live slots behind
#[test]
fn loom_queue_gc_vs_scan() {
    loom::model(|| {
        let queue = SlotQueue::new(2, 8);
        let a = queue.get_node().unwrap();
        let b = queue.get_node().unwrap();
        queue.discard_node(&a);

        let collector = {
            let queue = queue.clone();
            thread::spawn(move || queue.gc())
        };

        assert_eq!(queue.scan(1u32, || ControlFlow::Continue(())), 1);
        assert_eq!(b.try_recv(), Some(1));

        assert_eq!(collector.join().unwrap(), Ok(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_garbage(), 0);
        queue.shutdown();
    });
}

/// Test: A subscriber blocked in `recv` wakes up for a broadcast or a discard
#[test]
fn loom_recv_vs_discard() {
    loom::model(|| {
        let queue = SlotQueue::new(1, 8);
        let slot = queue.get_node().unwrap();

        let subscriber = {
            let slot = slot.clone();
            thread::spawn(move || slot.recv())
        };

        queue.scan(5u32, || ControlFlow::Continue(()));
        queue.discard_node(&slot);

        let received = subscriber.join().unwrap();
        assert!(received == Some(5) || received.is_none());
        queue.shutdown();
    });
}

/// Test: Admission racing a scan is refused or lands in the array, never lost
#[test]
fn loom_get_node_vs_scan() {
    loom::model(|| {
        let queue = SlotQueue::new(2, 8);
        let _first = queue.get_node().unwrap();

        let joiner = {
            let queue = queue.clone();
            thread::spawn(move || queue.get_node())
        };

        let delivered = queue.scan(0u32, || ControlFlow::Continue(()));
        assert!(delivered == 1 || delivered == 2);

        match joiner.join().unwrap() {
            Ok(_) => assert_eq!(queue.len(), 2),
            Err(e) => {
                assert_eq!(e, Error::Unavailable);
                assert_eq!(queue.len(), 1);
            }
        }
        queue.shutdown();
    });
}

/// Test: Admission racing shutdown either loses cleanly or is drained, and
/// the live count never survives the drain
#[test]
fn loom_get_node_vs_shutdown() {
    loom::model(|| {
        let queue = SlotQueue::<u32>::new(2, 8);

        let joiner = {
            let queue = queue.clone();
            thread::spawn(move || queue.get_node())
        };

        queue.shutdown();
        let joined = joiner.join().unwrap();

        assert_eq!(queue.valid_count(), 0);
        assert!(queue.is_empty());
        match joined {
            Ok(slot) => assert!(slot.is_destroyed()),
            Err(e) => assert_eq!(e, Error::Unavailable),
        }
    });
}

/// Test: A discard racing shutdown never wraps the live count
#[test]
fn loom_discard_vs_shutdown() {
    loom::model(|| {
        let queue = SlotQueue::<u32>::new(1, 8);
        let slot = queue.get_node().unwrap();

        let discarder = {
            let queue = queue.clone();
            let slot = slot.clone();
            thread::spawn(move || queue.discard_node(&slot))
        };

        queue.shutdown();
        discarder.join().unwrap();

        assert_eq!(queue.valid_count(), 0);
        assert!(slot.is_destroyed());
    });
}

/// Test: Once shutdown returns, no collection launched by a racing scan is
/// still running
#[test]
fn loom_shutdown_vs_scan_collection() {
    loom::model(|| {
        let queue = SlotQueue::new(2, 0);
        let a = queue.get_node().unwrap();
        let b = queue.get_node().unwrap();
        queue.discard_node(&a);
        queue.discard_node(&b);

        let scanner = {
            let queue = queue.clone();
            thread::spawn(move || queue.scan(1u32, || ControlFlow::Continue(())))
        };

        queue.shutdown();
        assert_eq!(queue.collections_in_flight(), 0);
        assert!(queue.is_empty());

        assert_eq!(scanner.join().unwrap(), 0);
    });
}
