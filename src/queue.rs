//! Ticket-fair bounded MPMC queue over a slot ring.
//!
//! Each `send`/`recv` claims a monotonically increasing 32-bit sequence
//! number whose low bits select a slot. Contenders that land on the same slot
//! (the cursor wrapped before the slot cleared) are ordered by a per-slot
//! ticket pair, and the two sides hand each value over through the slot's
//! full/empty flag. The common path performs no kernel synchronization.

use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;

use crossbeam_utils::CachePadded;

use crate::sync::{AtomicBool, AtomicU32, Ordering, UnsafeCell};
use crate::wait::{Backoff, WaitStrategy};

/// One cell of the ring; `value` is initialised iff `full` reads true.
#[repr(C, align(64))]
struct Slot<T> {
    full: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Slot {
            full: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

// Safety: slot synchronization is provided by the full flag; T must be Send
// to cross threads.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

/// Per-slot fairness primitive: `issue` hands out tickets, `serve` names the
/// ticket currently allowed into the critical section. Their difference is
/// the number of threads queued on that slot.
#[cfg(any(feature = "multi-producer", feature = "multi-consumer"))]
struct TicketRing<const N: usize> {
    issue: Box<[AtomicU32; N]>,
    serve: Box<[AtomicU32; N]>,
}

#[cfg(any(feature = "multi-producer", feature = "multi-consumer"))]
impl<const N: usize> TicketRing<N> {
    fn new() -> Self {
        TicketRing {
            issue: zeroed_counters(),
            serve: zeroed_counters(),
        }
    }

    /// Enter the queue for `slot`, returning the ticket to wait on.
    fn join(&self, slot: usize) -> u32 {
        self.issue[slot].fetch_add(1, Ordering::Relaxed)
    }

    fn served(&self, slot: usize, ticket: u32) -> bool {
        self.serve[slot].load(Ordering::Acquire) == ticket
    }

    /// Hand the slot to the next ticket holder.
    fn release(&self, slot: usize) {
        self.serve[slot].fetch_add(1, Ordering::Release);
    }
}

#[cfg(any(feature = "multi-producer", feature = "multi-consumer"))]
fn zeroed_counters<const N: usize>() -> Box<[AtomicU32; N]> {
    let mut v = Vec::with_capacity(N);
    for _ in 0..N {
        v.push(AtomicU32::new(0));
    }
    v.into_boxed_slice()
        .try_into()
        .unwrap_or_else(|_| panic!("length mismatch"))
}

#[inline]
fn slot_index<const N: usize>(seq: u32) -> usize {
    seq as usize & (N - 1)
}

/// Error returned by [`Queue::recv`] once the queue is closed and every
/// accepted item has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receiving on a closed and drained queue")
    }
}

impl std::error::Error for RecvError {}

/// Bounded MPMC queue with blocking semantics and arrival-order fairness.
///
/// - `send` / `recv` block (by cooperative spinning, policy `W`) while the
///   queue is full / empty.
/// - [`Queue::close`] announces that no further items will arrive; consumers
///   drain the remainder and then observe end-of-stream.
/// - `N` must be a power of two no larger than 2^32 so the 32-bit cursors
///   wrap onto slot indices cleanly; anything else fails to compile.
///
/// The queue is created once, shared by reference (typically `Arc`) across
/// producer and consumer threads, and dropped after all of them have joined.
pub struct Queue<T, const N: usize, W: WaitStrategy = Backoff> {
    slots: Box<[Slot<T>; N]>,
    /// Producer sequence counter; one claim per send.
    tail: CachePadded<AtomicU32>,
    /// Consumer sequence counter; one claim per recv.
    head: CachePadded<AtomicU32>,
    #[cfg(feature = "multi-producer")]
    send_tickets: TicketRing<N>,
    #[cfg(feature = "multi-consumer")]
    recv_tickets: TicketRing<N>,
    closed: AtomicBool,
    _wait: PhantomData<W>,
}

// Safety: all shared state is atomics plus slot storage guarded by the full
// flag's acquire/release pair.
unsafe impl<T: Send, const N: usize, W: WaitStrategy> Send for Queue<T, N, W> {}
unsafe impl<T: Send, const N: usize, W: WaitStrategy> Sync for Queue<T, N, W> {}

impl<T, const N: usize, W: WaitStrategy> Queue<T, N, W> {
    const CAPACITY_OK: bool = {
        assert!(
            N > 0 && N.is_power_of_two(),
            "queue capacity must be a nonzero power of two so the 32-bit cursors wrap cleanly"
        );
        assert!(
            (N as u64) <= 1u64 << 32,
            "queue capacity must not exceed the 32-bit cursor range"
        );
        true
    };

    /// Create an empty queue.
    pub fn new() -> Self {
        // Evaluated at monomorphisation; invalid capacities fail to compile.
        assert!(Self::CAPACITY_OK);

        let mut v = Vec::with_capacity(N);
        for _ in 0..N {
            v.push(Slot::new());
        }
        let slots: Box<[Slot<T>; N]> = v
            .into_boxed_slice()
            .try_into()
            .unwrap_or_else(|_| panic!("capacity mismatch"));

        Queue {
            slots,
            tail: CachePadded::new(AtomicU32::new(0)),
            head: CachePadded::new(AtomicU32::new(0)),
            #[cfg(feature = "multi-producer")]
            send_tickets: TicketRing::new(),
            #[cfg(feature = "multi-consumer")]
            recv_tickets: TicketRing::new(),
            closed: AtomicBool::new(false),
            _wait: PhantomData,
        }
    }

    /// Blocking enqueue, safe for any number of concurrent producers.
    ///
    /// Claims a write sequence number, waits for its turn on the selected
    /// slot and for the slot to empty, then publishes the value. Sending
    /// after [`Queue::close`] is a contract violation, caught by a debug
    /// assertion.
    #[cfg(feature = "multi-producer")]
    pub fn send(&self, value: T) {
        debug_assert!(
            !self.closed.load(Ordering::Relaxed),
            "send on a closed queue"
        );

        let seq = self.tail.fetch_add(1, Ordering::AcqRel);
        let idx = slot_index::<N>(seq);

        let ticket = self.send_tickets.join(idx);
        let mut wait = W::default();
        while !self.send_tickets.served(idx, ticket) {
            wait.wait();
        }

        // Our turn on the slot; wait for the previous occupant to be consumed.
        let slot = &self.slots[idx];
        let mut wait = W::default();
        while slot.full.load(Ordering::Acquire) {
            wait.wait();
        }

        slot.value.with_mut(|p| unsafe {
            (*p).write(value);
        });
        slot.full.store(true, Ordering::Release);
        self.send_tickets.release(idx);
    }

    /// Blocking enqueue for a single producer thread.
    ///
    /// Skips the producer ticket turn and advances the write cursor with
    /// plain load/store; the slot handshake with consumers is retained.
    ///
    /// # Safety
    ///
    /// At most one thread may call `send` or `send_unchecked` concurrently.
    /// A second concurrent producer can be assigned the same slot, and the
    /// resulting unsynchronised writes to its storage are undefined behavior.
    pub unsafe fn send_unchecked(&self, value: T) {
        debug_assert!(
            !self.closed.load(Ordering::Relaxed),
            "send on a closed queue"
        );

        let seq = self.tail.load(Ordering::Relaxed);
        self.tail.store(seq.wrapping_add(1), Ordering::Relaxed);
        let slot = &self.slots[slot_index::<N>(seq)];

        let mut wait = W::default();
        while slot.full.load(Ordering::Acquire) {
            wait.wait();
        }

        slot.value.with_mut(|p| unsafe {
            (*p).write(value);
        });
        slot.full.store(true, Ordering::Release);
    }

    /// Blocking dequeue, safe for any number of concurrent consumers.
    ///
    /// Returns the next item in slot order, or `Err(RecvError)` once the
    /// queue is closed and the claimed slot will never be filled.
    #[cfg(feature = "multi-consumer")]
    pub fn recv(&self) -> Result<T, RecvError> {
        let seq = self.head.fetch_add(1, Ordering::AcqRel);
        let idx = slot_index::<N>(seq);

        // Wait out the turn even when the queue is closed: a predecessor may
        // still be owed an item, and abandoning the ticket here would strand
        // every later holder. Each predecessor either consumes or releases on
        // its own end-of-stream path, so the wait is bounded.
        let ticket = self.recv_tickets.join(idx);
        let mut wait = W::default();
        while !self.recv_tickets.served(idx, ticket) {
            wait.wait();
        }

        let slot = &self.slots[idx];
        let mut wait = W::default();
        loop {
            if slot.full.load(Ordering::Acquire) {
                break;
            }
            if self.closed.load(Ordering::Acquire) {
                // The acquire above orders this reload after every publish
                // that preceded the close.
                if slot.full.load(Ordering::Acquire) {
                    break;
                }
                self.recv_tickets.release(idx);
                return Err(RecvError);
            }
            wait.wait();
        }

        let value = slot.value.with(|p| unsafe { (*p).assume_init_read() });
        slot.full.store(false, Ordering::Release);
        self.recv_tickets.release(idx);
        Ok(value)
    }

    /// Blocking dequeue for a single consumer thread.
    ///
    /// Skips the consumer ticket turn and advances the read cursor with plain
    /// load/store; the slot handshake with producers is retained.
    ///
    /// # Safety
    ///
    /// At most one thread may call `recv` or `recv_unchecked` concurrently.
    /// Two concurrent consumers can be assigned the same slot and both read
    /// (and later drop) the same value, which is undefined behavior.
    pub unsafe fn recv_unchecked(&self) -> Result<T, RecvError> {
        let seq = self.head.load(Ordering::Relaxed);
        self.head.store(seq.wrapping_add(1), Ordering::Relaxed);
        let slot = &self.slots[slot_index::<N>(seq)];

        let mut wait = W::default();
        loop {
            if slot.full.load(Ordering::Acquire) {
                break;
            }
            if self.closed.load(Ordering::Acquire) {
                if slot.full.load(Ordering::Acquire) {
                    break;
                }
                return Err(RecvError);
            }
            wait.wait();
        }

        let value = slot.value.with(|p| unsafe { (*p).assume_init_read() });
        slot.full.store(false, Ordering::Release);
        Ok(value)
    }

    /// Announce that no further items will be sent.
    ///
    /// Monotonic and idempotent. Consumers blocked on an empty queue discover
    /// the flag on their next wait cycle and return end-of-stream; items
    /// already accepted remain deliverable. Producers must be quiescent
    /// before the call for the drain guarantee to hold.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`Queue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Best-effort length gauge: write claims minus read claims.
    ///
    /// Negative when consumers have claimed slots not yet filled, and may
    /// transiently exceed the capacity while producers are still waiting to
    /// write. An observation only, never a synchronization point.
    pub fn len(&self) -> isize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as i32 as isize
    }

    /// Whether the gauge reads no undelivered items. As racy as [`Queue::len`].
    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }

    /// Capacity of the slot ring.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Blocking iterator over the remaining items; ends at end-of-stream.
    #[cfg(feature = "multi-consumer")]
    pub fn iter(&self) -> Iter<'_, T, N, W> {
        Iter { queue: self }
    }
}

impl<T, const N: usize, W: WaitStrategy> Default for Queue<T, N, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize, W: WaitStrategy> Drop for Queue<T, N, W> {
    fn drop(&mut self) {
        // Exclusive access: dispose of any value still published in the ring.
        for slot in self.slots.iter() {
            if slot.full.load(Ordering::Acquire) {
                slot.value.with_mut(|p| unsafe {
                    (*p).assume_init_drop();
                });
            }
        }
    }
}

/// Blocking iterator returned by [`Queue::iter`]; `None` means the queue is
/// closed and drained.
#[cfg(feature = "multi-consumer")]
pub struct Iter<'a, T, const N: usize, W: WaitStrategy = Backoff> {
    queue: &'a Queue<T, N, W>,
}

#[cfg(feature = "multi-consumer")]
impl<T, const N: usize, W: WaitStrategy> Iterator for Iter<'_, T, N, W> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.recv().ok()
    }
}

#[cfg(feature = "multi-consumer")]
impl<'a, T, const N: usize, W: WaitStrategy> IntoIterator for &'a Queue<T, N, W> {
    type Item = T;
    type IntoIter = Iter<'a, T, N, W>;

    fn into_iter(self) -> Iter<'a, T, N, W> {
        self.iter()
    }
}

#[cfg(all(
    test,
    not(loom),
    feature = "multi-producer",
    feature = "multi-consumer"
))]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let q = Queue::<i32, 8>::new();
        q.send(42);
        assert_eq!(q.recv(), Ok(42));
    }

    #[test]
    fn close_on_empty_ends_stream() {
        let q = Queue::<i32, 4>::new();
        q.close();
        assert_eq!(q.recv(), Err(RecvError));
        assert_eq!(q.recv(), Err(RecvError));
    }

    #[test]
    fn close_is_idempotent() {
        let q = Queue::<i32, 4>::new();
        q.send(7);
        q.close();
        q.close();
        assert!(q.is_closed());
        assert_eq!(q.recv(), Ok(7));
        assert_eq!(q.recv(), Err(RecvError));
    }

    #[test]
    fn alternating_send_recv_wraps() {
        let q = Queue::<usize, 4>::new();
        for i in 0..100 {
            q.send(i);
            assert_eq!(q.recv(), Ok(i));
        }
    }

    #[test]
    fn len_gauge() {
        let q = Queue::<i32, 8>::new();
        assert!(q.is_empty());
        q.send(1);
        q.send(2);
        assert_eq!(q.len(), 2);
        let _ = q.recv();
        assert_eq!(q.len(), 1);

        // abandoned claims after close drive the gauge negative
        let _ = q.recv();
        q.close();
        let _ = q.recv();
        let _ = q.recv();
        assert_eq!(q.len(), -2);
        assert!(q.is_empty());
    }

    #[test]
    fn unchecked_roundtrip() {
        let q = Queue::<String, 2>::new();
        unsafe {
            q.send_unchecked("a".to_string());
            q.send_unchecked("b".to_string());
            assert_eq!(q.recv_unchecked().as_deref(), Ok("a"));
            assert_eq!(q.recv_unchecked().as_deref(), Ok("b"));
            q.close();
            assert_eq!(q.recv_unchecked(), Err(RecvError));
        }
    }

    #[test]
    fn recv_error_display() {
        assert_eq!(
            RecvError.to_string(),
            "receiving on a closed and drained queue"
        );
    }

    #[test]
    fn capacity_is_const() {
        let q = Queue::<i32, 16>::default();
        assert_eq!(q.capacity(), 16);
    }

    #[test]
    fn slot_index_wraps_contiguously() {
        assert_eq!(slot_index::<4>(u32::MAX), 3);
        assert_eq!(slot_index::<4>(u32::MAX.wrapping_add(1)), 0);
    }
}
