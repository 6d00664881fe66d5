//! The write-back pipeline: a bounded FIFO of dirty sector indices,
//! filled by the engine context and drained to the image file by the
//! sync context.

pub mod worker;

pub use worker::SyncWorker;

use heapless::spsc::{Consumer, Producer, Queue};

use crate::card::image::{Sector, SECTOR_COUNT};

/// Depth of the dirty-sector queue: one whole card, so a worst-case
/// full-image rewrite cannot drop a ticket, plus the slot the SPSC
/// queue keeps free to tell full from empty.
pub const DIRTY_QUEUE_DEPTH: usize = SECTOR_COUNT + 1;

/// The queue itself; lives in a `static` on firmware and is split once
/// at startup. Enqueue and dequeue pair release/acquire internally, so
/// a sector published before its index is enqueued is visible to the
/// consumer.
pub type SectorQueue = Queue<Sector, DIRTY_QUEUE_DEPTH>;
/// Engine-side handle.
pub type DirtyProducer<'a> = Producer<'a, Sector, DIRTY_QUEUE_DEPTH>;
/// Sync-side handle.
pub type DirtyConsumer<'a> = Consumer<'a, Sector, DIRTY_QUEUE_DEPTH>;
