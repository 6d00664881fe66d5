//! Digital-controller vocabulary for the sniffing side channel. The
//! simulator never answers pad frames; it only watches the response a
//! real controller puts on the shared DAT line and latches user
//! intents for the sync task.

use core::sync::atomic::{AtomicBool, Ordering};

/// Button bit positions in the 16-bit switch bitmap. A pressed button
/// reads 0, a released one reads 1.
#[rustfmt::skip]
pub mod buttons {
    pub const SELECT: u16   = 1 << 0;
    pub const L3: u16       = 1 << 1;   // analog mode only
    pub const R3: u16       = 1 << 2;   // analog mode only
    pub const START: u16    = 1 << 3;
    pub const UP: u16       = 1 << 4;
    pub const RIGHT: u16    = 1 << 5;
    pub const DOWN: u16     = 1 << 6;
    pub const LEFT: u16     = 1 << 7;
    pub const L2: u16       = 1 << 8;
    pub const R2: u16       = 1 << 9;
    pub const L1: u16       = 1 << 10;
    pub const R1: u16       = 1 << 11;
    pub const TRIANGLE: u16 = 1 << 12;
    pub const CIRCLE: u16   = 1 << 13;
    pub const CROSS: u16    = 1 << 14;
    pub const SQUARE: u16   = 1 << 15;
}

use buttons::{DOWN, SELECT, START, TRIANGLE, UP};

/// Switch bitmaps that trigger an image change. Exact matches only:
/// any extra pressed button defeats the combo.
pub const COMBO_NEXT_IMAGE: u16 = !(START | SELECT | UP);
pub const COMBO_PREV_IMAGE: u16 = !(START | SELECT | DOWN);
pub const COMBO_NEW_IMAGE: u16 = !(START | SELECT | TRIANGLE);

/// Single-bit request flags between the engine context and the sync
/// context. Duplicate requests collapse; the consumer sees at most one
/// of each per service pass. Plain load/store keeps this usable on
/// cores without compare-and-swap.
pub struct IntentLatch {
    next: AtomicBool,
    prev: AtomicBool,
    fresh: AtomicBool,
}

impl IntentLatch {
    pub const fn new() -> IntentLatch {
        IntentLatch {
            next: AtomicBool::new(false),
            prev: AtomicBool::new(false),
            fresh: AtomicBool::new(false),
        }
    }

    pub fn request_next(&self) {
        self.next.store(true, Ordering::Release);
    }

    pub fn request_prev(&self) {
        self.prev.store(true, Ordering::Release);
    }

    pub fn request_new(&self) {
        self.fresh.store(true, Ordering::Release);
    }

    pub fn take_next(&self) -> bool {
        Self::take(&self.next)
    }

    pub fn take_prev(&self) -> bool {
        Self::take(&self.prev)
    }

    pub fn take_new(&self) -> bool {
        Self::take(&self.fresh)
    }

    fn take(flag: &AtomicBool) -> bool {
        if flag.load(Ordering::Acquire) {
            flag.store(false, Ordering::Release);
            true
        } else {
            false
        }
    }
}

impl Default for IntentLatch {
    fn default() -> Self {
        Self::new()
    }
}
