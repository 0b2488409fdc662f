//! Pluggable wait policies for the queue's spin loops.
//!
//! Every blocking operation creates a fresh strategy value per wait loop and
//! calls [`WaitStrategy::wait`] each time its condition is still unmet, so a
//! strategy may carry per-wait state (see [`Backoff`]).

use std::thread;
use std::time::Duration;

use crate::sync::{spin_loop, yield_now};

/// How many retries [`Backoff`] spins before it starts yielding.
const SPIN_LIMIT: usize = 64;
/// How long [`Backoff`] naps once yielding stops paying off.
const NAP_NANOS: u64 = 50;

/// A policy for surrendering the CPU while a queue condition is unmet.
pub trait WaitStrategy: Default {
    /// Called once per unsatisfied retry of a wait loop.
    fn wait(&mut self);
}

/// Yields to the scheduler on every retry.
///
/// Good for bursty, short-lived queues where another runnable thread is
/// usually the one being waited on.
#[derive(Debug, Default, Clone, Copy)]
pub struct Yield;

impl WaitStrategy for Yield {
    fn wait(&mut self) {
        yield_now();
    }
}

/// Pure busy-spin. Lowest wakeup latency, burns a core while idle.
#[derive(Debug, Default, Clone, Copy)]
pub struct Spin;

impl WaitStrategy for Spin {
    fn wait(&mut self) {
        spin_loop();
    }
}

/// Sleeps a fixed number of microseconds on every retry.
///
/// Suited to long-lived, mostly idle queues where yield would still keep the
/// waiter hot on the run queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sleep<const MICROS: u64 = 50>;

impl<const MICROS: u64> WaitStrategy for Sleep<MICROS> {
    fn wait(&mut self) {
        thread::sleep(Duration::from_micros(MICROS));
    }
}

/// Adaptive ladder: spin briefly, then yield, then nanosleep.
///
/// The default strategy; behaves like [`Spin`] under momentary contention and
/// degrades toward [`Sleep`] when the other side is stalled.
#[derive(Debug, Default, Clone, Copy)]
pub struct Backoff {
    step: usize,
}

impl WaitStrategy for Backoff {
    fn wait(&mut self) {
        if self.step < SPIN_LIMIT {
            spin_loop();
        } else if self.step < SPIN_LIMIT * 8 {
            yield_now();
        } else {
            thread::sleep(Duration::from_nanos(NAP_NANOS));
            return;
        }
        self.step += 1;
    }
}
