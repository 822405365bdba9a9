//! Lock-free byte hand-off between a receive interrupt (or reader task)
//! and the polling engine.
//!
//! A fixed-capacity single-producer single-consumer ring: the producer
//! side ([`ByteFeeder`]) only writes the head and the receive timestamp,
//! the consumer side ([`ByteDrain`]) only writes the tail. When the ring
//! is full the newest byte is dropped, so bytes already accepted are
//! never overwritten mid-frame.

use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::warn;

struct Shared {
    // capacity + 1 cells so head == tail unambiguously means empty.
    cells: Box<[AtomicU8]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    last_received_ms: AtomicU32,
}

impl Shared {
    fn next(&self, index: usize) -> usize {
        (index + 1) % self.cells.len()
    }
}

/// Producer half. Cheap to clone into an ISR shim or reader task.
#[derive(Clone)]
pub struct ByteFeeder {
    shared: Arc<Shared>,
}

/// Consumer half, owned by the engine.
pub struct ByteDrain {
    shared: Arc<Shared>,
}

/// Create a ring holding up to `capacity` bytes.
pub fn intake(capacity: usize) -> (ByteFeeder, ByteDrain) {
    let cells = (0..capacity + 1).map(|_| AtomicU8::new(0)).collect();
    let shared = Arc::new(Shared {
        cells,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        last_received_ms: AtomicU32::new(0),
    });
    (
        ByteFeeder {
            shared: Arc::clone(&shared),
        },
        ByteDrain { shared },
    )
}

impl ByteFeeder {
    /// Accept one received byte, stamping the arrival time. Returns false
    /// and drops the byte when the ring is full; the timestamp is still
    /// updated so silence detection keeps tracking line activity.
    pub fn push(&self, byte: u8, now_ms: u32) -> bool {
        let shared = &*self.shared;
        shared.last_received_ms.store(now_ms, Ordering::Relaxed);

        let head = shared.head.load(Ordering::Relaxed);
        let next = shared.next(head);
        if next == shared.tail.load(Ordering::Acquire) {
            warn!(byte, "intake ring full, byte dropped");
            return false;
        }
        shared.cells[head].store(byte, Ordering::Relaxed);
        // Publish the cell write before the consumer can observe the head.
        shared.head.store(next, Ordering::Release);
        true
    }
}

impl ByteDrain {
    pub fn len(&self) -> usize {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Acquire);
        let tail = shared.tail.load(Ordering::Relaxed);
        (head + shared.cells.len() - tail) % shared.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look at the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        if shared.head.load(Ordering::Acquire) == tail {
            return None;
        }
        Some(shared.cells[tail].load(Ordering::Relaxed))
    }

    pub fn pop(&mut self) -> Option<u8> {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        if shared.head.load(Ordering::Acquire) == tail {
            return None;
        }
        let byte = shared.cells[tail].load(Ordering::Relaxed);
        shared.tail.store(shared.next(tail), Ordering::Release);
        Some(byte)
    }

    /// Discard everything currently buffered.
    pub fn clear(&mut self) {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Acquire);
        shared.tail.store(head, Ordering::Release);
    }

    /// Millisecond stamp of the most recent `push`.
    pub fn last_received_ms(&self) -> u32 {
        self.shared.last_received_ms.load(Ordering::Relaxed)
    }

    /// Reset the activity stamp, e.g. after a timeout was handled.
    pub fn stamp_received(&self, now_ms: u32) {
        self.shared.last_received_ms.store(now_ms, Ordering::Relaxed);
    }

    /// A fresh producer handle for the same ring.
    pub fn feeder(&self) -> ByteFeeder {
        ByteFeeder {
            shared: Arc::clone(&self.shared),
        }
    }
}
