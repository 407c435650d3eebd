//! Fixed-capacity byte ring carrying variable-sized events from the polling
//! producer to the event processor.
//!
//! The ring has exactly one producer and one consumer. Each slot is framed by
//! a little-endian `u32` length. A slot that would not fit in the tail of the
//! buffer is placed at offset 0 instead; the skipped tail is tagged with
//! [`WRAP_MARKER`] when there is room for a frame header.
//!
//! ```text
//! | len | payload ... | len | payload ... | WRAP | (skipped tail) |
//! ```

use crate::error::RingError;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

const FRAME: usize = 4;
const WRAP_MARKER: u32 = u32::MAX;

struct Shared {
    data: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    max_event: usize,
    /// Bytes occupied by committed slots, frame headers and skipped tails.
    used: AtomicUsize,
    /// Committed slots not yet released by the consumer.
    events: AtomicUsize,
    lock: Mutex<()>,
    wake: Condvar,
}

// SAFETY: the producer only touches bytes outside the region accounted in
// `used`, the consumer only bytes inside it. Publication goes through the
// Release/Acquire pair on `events` (producer to consumer) and `used`
// (consumer to producer).
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.data.as_ptr())
    }

    fn notify(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.wake.notify_all();
    }

    /// Blocks until `ready` holds or `timeout` expires.
    fn wait_for(&self, timeout: Duration, ready: impl Fn() -> bool) -> bool {
        if ready() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let (_guard, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |_| !ready())
            .unwrap_or_else(|e| e.into_inner());
        ready()
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; FRAME];
        // SAFETY: offset + FRAME <= capacity, checked by callers.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr().add(offset), raw.as_mut_ptr(), FRAME);
        }
        u32::from_le_bytes(raw)
    }

    fn write_u32(&self, offset: usize, value: u32) {
        let raw = value.to_le_bytes();
        // SAFETY: offset + FRAME <= capacity, checked by callers.
        unsafe {
            std::ptr::copy_nonoverlapping(raw.as_ptr(), self.ptr().add(offset), FRAME);
        }
    }
}

/// Owner of a freshly created ring, split into its two ends before use.
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Creates a ring of `capacity` bytes able to carry events of up to
    /// `max_event` bytes. The capacity must hold two maximal slots so that a
    /// wrapped slot always fits once the consumer has caught up.
    pub fn new(capacity: usize, max_event: usize) -> Result<Self, RingError> {
        if max_event == 0 || capacity < 2 * (max_event + FRAME) {
            return Err(RingError::EventTooLarge {
                capacity,
                max_event,
            });
        }
        let data = (0..capacity).map(|_| UnsafeCell::new(0u8)).collect();
        Ok(Self {
            shared: Arc::new(Shared {
                data,
                capacity,
                max_event,
                used: AtomicUsize::new(0),
                events: AtomicUsize::new(0),
                lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
        })
    }

    pub fn split(self) -> (RingProducer, RingConsumer) {
        (
            RingProducer {
                shared: Arc::clone(&self.shared),
                write_pos: 0,
            },
            RingConsumer {
                shared: self.shared,
                read_pos: 0,
            },
        )
    }
}

/// Writing end of the ring. Not clonable.
pub struct RingProducer {
    shared: Arc<Shared>,
    write_pos: usize,
}

impl RingProducer {
    /// Claims room for one event of up to `max_event` bytes, waiting at most
    /// `timeout` for the consumer to free space.
    pub fn claim_write(&mut self, timeout: Duration) -> Result<WriteSlot<'_>, RingError> {
        let shared = &self.shared;
        let need = FRAME + shared.max_event;
        let tail = shared.capacity - self.write_pos;
        let (start, skip) = if tail >= need {
            (self.write_pos, 0)
        } else {
            (0, tail)
        };
        let required = skip + need;
        let ready = || shared.capacity - shared.used.load(Ordering::Acquire) >= required;
        if !shared.wait_for(timeout, ready) {
            return Err(RingError::Busy);
        }
        // SAFETY: [start, start + need) lies in free space by the check above
        // and only the producer writes free space.
        let payload = unsafe {
            std::slice::from_raw_parts_mut(shared.ptr().add(start + FRAME), shared.max_event)
        };
        Ok(WriteSlot {
            producer: self,
            start,
            skip,
            payload,
        })
    }

    /// Bytes currently held by the ring.
    pub fn level(&self) -> usize {
        self.shared.used.load(Ordering::Acquire)
    }

    pub fn max_event(&self) -> usize {
        self.shared.max_event
    }
}

/// Space claimed by the producer. Nothing becomes visible until
/// [`WriteSlot::commit`]; dropping the slot abandons it.
pub struct WriteSlot<'a> {
    producer: &'a mut RingProducer,
    start: usize,
    skip: usize,
    payload: &'a mut [u8],
}

impl WriteSlot<'_> {
    pub fn buf(&mut self) -> &mut [u8] {
        self.payload
    }

    /// Publishes the first `size` bytes of the slot.
    pub fn commit(self, size: usize) {
        let shared = &self.producer.shared;
        let size = size.min(shared.max_event);
        if self.skip >= FRAME {
            shared.write_u32(self.producer.write_pos, WRAP_MARKER);
        }
        shared.write_u32(self.start, size as u32);

        let mut next = self.start + FRAME + size;
        if next == shared.capacity {
            next = 0;
        }
        self.producer.write_pos = next;
        shared
            .used
            .fetch_add(self.skip + FRAME + size, Ordering::AcqRel);
        shared.events.fetch_add(1, Ordering::Release);
        shared.notify();
    }
}

/// Reading end of the ring. Not clonable.
pub struct RingConsumer {
    shared: Arc<Shared>,
    read_pos: usize,
}

impl RingConsumer {
    /// Returns the oldest committed event, waiting at most `timeout`.
    pub fn claim_read(&mut self, timeout: Duration) -> Result<ReadSlot<'_>, RingError> {
        let shared = &self.shared;
        if !shared.wait_for(timeout, || shared.events.load(Ordering::Acquire) > 0) {
            return Err(RingError::Empty);
        }

        let tail = shared.capacity - self.read_pos;
        let mut start = self.read_pos;
        let mut skip = 0;
        if tail < FRAME || shared.read_u32(start) == WRAP_MARKER {
            start = 0;
            skip = tail;
        }
        let len = shared.read_u32(start) as usize;
        // SAFETY: the slot was committed (events > 0 observed with Acquire)
        // and the producer does not touch it until it is released.
        let data =
            unsafe { std::slice::from_raw_parts(shared.ptr().add(start + FRAME), len) };
        Ok(ReadSlot {
            consumer: self,
            start,
            skip,
            data,
        })
    }

    /// Bytes currently held by the ring.
    pub fn level(&self) -> usize {
        self.shared.used.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Committed events waiting to be read.
    pub fn events(&self) -> usize {
        self.shared.events.load(Ordering::Acquire)
    }

    /// Releases every committed event without looking at it.
    pub fn discard_all(&mut self) -> usize {
        let mut n = 0;
        while let Ok(slot) = self.claim_read(Duration::ZERO) {
            slot.commit();
            n += 1;
        }
        n
    }
}

/// One committed event. [`ReadSlot::commit`] releases it back to the producer.
pub struct ReadSlot<'a> {
    consumer: &'a mut RingConsumer,
    start: usize,
    skip: usize,
    data: &'a [u8],
}

impl ReadSlot<'_> {
    pub fn bytes(&self) -> &[u8] {
        self.data
    }

    pub fn commit(self) {
        let shared = &self.consumer.shared;
        let len = self.data.len();
        let mut next = self.start + FRAME + len;
        if next == shared.capacity {
            next = 0;
        }
        self.consumer.read_pos = next;
        shared.events.fetch_sub(1, Ordering::AcqRel);
        shared
            .used
            .fetch_sub(self.skip + FRAME + len, Ordering::Release);
        shared.notify();
    }
}
