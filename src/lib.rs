//! fair_mpmc - Ticket-fair bounded MPMC queue with end-of-stream signalling
//!
//! - `send` / `recv` : blocking (cooperative spin) operations, FIFO per slot
//! - `send_unchecked` / `recv_unchecked` : single-threaded-side fast paths
//! - `close` : one-way "no more items" signal; consumers drain, then observe
//!   end-of-stream
//! - capacity is a compile-time power of two, so the 32-bit cursors wrap
//!   cleanly onto slot indices
//!
//! Contention on a single slot is serialized by a per-slot ticket pair
//! instead of a lock, which keeps arrival-order fairness among producers and
//! among consumers without any kernel synchronization on the hot path. The
//! wait policy is pluggable through the [`WaitStrategy`] type parameter.
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use fair_mpmc::Queue;
//!
//! let queue = Arc::new(Queue::<u64, 16>::new());
//!
//! let producer = {
//!     let queue = queue.clone();
//!     thread::spawn(move || {
//!         for i in 0..100 {
//!             queue.send(i);
//!         }
//!         queue.close();
//!     })
//! };
//!
//! let total: u64 = queue.iter().sum();
//! producer.join().unwrap();
//! assert_eq!(total, (0..100u64).sum());
//! ```

#![warn(missing_docs)]

mod queue;
mod sync;
mod wait;

#[cfg(feature = "multi-consumer")]
pub use queue::Iter;
pub use queue::{Queue, RecvError};
pub use wait::{Backoff, Sleep, Spin, WaitStrategy, Yield};
