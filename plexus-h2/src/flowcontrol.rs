//! HTTP/2 flow control window tracking (RFC 7540 Section 6.9).
//!
//! Windows are shared between request senders and the connection's reader,
//! so every operation is a single atomic read-modify-write.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::H2Error;
use crate::settings::MAX_WINDOW_SIZE;

/// Default initial window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_WINDOW_SIZE: u32 = 65_535;

/// A send or receive flow control window.
///
/// The value is signed: a SETTINGS change can push a send window below zero.
#[derive(Debug)]
pub struct Window {
    value: AtomicI64,
}

impl Window {
    pub fn new(initial: u32) -> Self {
        Self {
            value: AtomicI64::new(i64::from(initial)),
        }
    }

    /// Current window size.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Take up to `want` bytes of credit. Returns how much was taken, which is
    /// zero while the window is exhausted.
    pub fn reserve(&self, want: u32) -> u32 {
        let mut taken = 0;
        let _ = self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                if cur <= 0 || want == 0 {
                    return None;
                }
                taken = cur.min(i64::from(want));
                Some(cur - taken)
            });
        taken as u32
    }

    /// Return credit taken by [`Window::reserve`] but not spent.
    pub fn release(&self, amount: u32) {
        self.value.fetch_add(i64::from(amount), Ordering::AcqRel);
    }

    /// Charge `amount` received bytes. Fails if the peer overran the window.
    pub fn consume(&self, amount: u32) -> Result<(), H2Error> {
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                let new = cur - i64::from(amount);
                (new >= 0).then_some(new)
            })
            .map(|_| ())
            .map_err(|_| H2Error::FlowControlError)
    }

    /// Add a WINDOW_UPDATE increment. Fails past 2^31 - 1.
    pub fn increase(&self, increment: u32) -> Result<(), H2Error> {
        self.adjust(i64::from(increment))
    }

    /// Shift by `delta` (new initial size minus old) after a SETTINGS change.
    pub fn adjust(&self, delta: i64) -> Result<(), H2Error> {
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                let new = cur + delta;
                (new <= i64::from(MAX_WINDOW_SIZE)).then_some(new)
            })
            .map(|_| ())
            .map_err(|_| H2Error::FlowControlError)
    }

    /// Once a receive window falls below half of `target`, top it back up to
    /// `target` and return the increment to announce in a WINDOW_UPDATE.
    pub fn replenish(&self, target: u32) -> Option<u32> {
        let target = i64::from(target);
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur < target / 2).then_some(target)
            })
            .ok()
            .map(|prev| (target - prev) as u32)
    }
}
