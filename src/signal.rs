//! Hand-off points between interrupt handlers and the measurement cycle.
//!
//! Interrupt context only raises flags or enqueues received frames; the cycle
//! consumes them at its boundaries.

use core::sync::atomic::{AtomicBool, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};
use heapless::Vec;

use crate::registers::MAX_CELLS;

/// Largest response the controller requests: header, two bytes per cell, CRC.
pub const MAX_RESPONSE_LEN: usize = 1 + 2 * MAX_CELLS + 2;

/// Raw bytes of one received monitor frame.
pub type ResponseFrame = Vec<u8, MAX_RESPONSE_LEN>;

/// Receive-complete queue. Holds at most `N - 1` frames.
pub type ResponseQueue<const N: usize> = Queue<ResponseFrame, N>;
/// Interrupt side of a [`ResponseQueue`].
pub type ResponseProducer<'q, const N: usize> = Producer<'q, ResponseFrame, N>;
/// Cycle side of a [`ResponseQueue`].
pub type ResponseConsumer<'q, const N: usize> = Consumer<'q, ResponseFrame, N>;

/// Set by the user-input edge handler, consumed once per cycle.
#[derive(Debug, Default)]
pub struct PackEnableSignal {
    raised: AtomicBool,
}

impl PackEnableSignal {
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Interrupt-safe. Never blocks.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Returns whether the signal was raised since the last call, and clears it.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
