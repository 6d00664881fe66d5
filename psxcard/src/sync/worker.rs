//! The sync task: drains dirty sector tickets into the active image
//! file and carries out the switch/create requests sniffed off the
//! controller. Runs on its own execution context; the engine only ever
//! meets it through the card mutex and the queue.

use log::{info, warn};

use super::DirtyConsumer;
use crate::bus::BusControl;
use crate::card::image::{CardSlot, MemoryCard, SECTOR_SIZE, Sector};
use crate::led::Indicator;
use crate::manager;
use crate::sim::pad::IntentLatch;
use crate::store::{FileName, FileStore, StoreError};
use crate::{CardError, FatalError};

pub struct SyncWorker<'a, F, L, B>
where
    F: FileStore,
    L: Indicator,
    B: BusControl,
{
    store: F,
    led: L,
    bus: B,
    slot: &'a CardSlot,
    dirty: DirtyConsumer<'a>,
    intents: &'a IntentLatch,
    active: Option<FileName>,
}

impl<'a, F, L, B> SyncWorker<'a, F, L, B>
where
    F: FileStore,
    L: Indicator,
    B: BusControl,
{
    pub fn new(
        store: F,
        led: L,
        bus: B,
        slot: &'a CardSlot,
        dirty: DirtyConsumer<'a>,
        intents: &'a IntentLatch,
    ) -> SyncWorker<'a, F, L, B> {
        SyncWorker {
            store,
            led,
            bus,
            slot,
            dirty,
            intents,
            active: None,
        }
    }

    /// Name of the image currently backing the card.
    pub fn active(&self) -> Option<&FileName> {
        self.active.as_ref()
    }

    /// Temporarily get access to the underlying store.
    pub fn store_mut(&mut self) -> &mut F {
        &mut self.store
    }

    /// Load the remembered (or first) image into the card buffer. A
    /// failure here is fatal for the frame-serving loop; the caller
    /// blinks the code forever.
    pub fn init(&mut self) -> Result<(), FatalError> {
        let name = manager::initial(&mut self.store)?;
        self.slot
            .lock()
            .load_from(&mut self.store, name.as_str())?;
        info!("serving image {}", name);
        self.active = Some(name);
        Ok(())
    }

    /// Drain and dispatch forever.
    pub fn run(&mut self) -> ! {
        loop {
            self.service();
        }
    }

    /// Announce an unrecoverable startup error forever; the device
    /// never answers the bus.
    pub fn fail_forever(&mut self, code: u8) -> ! {
        loop {
            self.led.blink_error(code);
        }
    }

    /// One pass: flush at most one dirty sector, then act on any
    /// latched user intent.
    pub fn service(&mut self) {
        match self.dirty.dequeue() {
            Some(sector) => {
                self.led.sync_status(false);
                if let Err(e) = self.flush_sector(sector) {
                    // the ticket is dropped; the host's next write of
                    // this sector re-enqueues it
                    warn!("sector {:#06x} not persisted: {}", sector, e);
                    self.led.blink_error(e.code());
                }
            }
            None => self.led.sync_status(true),
        }
        self.dispatch_intents();
    }

    fn flush_sector(&mut self, sector: Sector) -> Result<(), CardError> {
        let mut staged = [0u8; SECTOR_SIZE];
        {
            let card = self.slot.lock();
            staged.copy_from_slice(card.sector(sector));
        }
        self.write_through(sector, &staged)
    }

    fn write_through(&mut self, sector: Sector, data: &[u8; SECTOR_SIZE]) -> Result<(), CardError> {
        let name = self.active.as_ref().ok_or(CardError::NoInit)?;
        let offset = sector as u32 * SECTOR_SIZE as u32;
        match self.store.write_at(name.as_str(), offset, data) {
            Ok(n) if n == SECTOR_SIZE => Ok(()),
            Ok(_) => Err(CardError::FileWrite),
            Err(StoreError::NotFound) => Err(CardError::FileOpen),
            Err(_) => Err(CardError::FileWrite),
        }
    }

    fn dispatch_intents(&mut self) {
        let next = self.intents.take_next();
        let prev = self.intents.take_prev();
        if next && prev {
            // requested change in both directions, do nothing
        } else if next || prev {
            let current = match self.active {
                Some(name) => name,
                None => return,
            };
            let neighbour = if next {
                manager::next_image(&mut self.store, &current)
            } else {
                manager::prev_image(&mut self.store, &current)
            };
            match neighbour {
                Ok(name) => {
                    if let Err(e) = self.switch_to(name) {
                        self.led.blink_error(e.code());
                    }
                }
                Err(crate::ManagerError::NoEntry) => self.led.end_of_list(),
                Err(e) => self.led.blink_error(e.code()),
            }
        } else if self.intents.take_new() {
            match manager::create(&mut self.store) {
                Ok(name) => {
                    self.led.new_image();
                    if let Err(e) = self.switch_to(name) {
                        self.led.blink_error(e.code());
                    }
                }
                Err(e) => self.led.blink_error(e.code()),
            }
        }
    }

    /// Swap the card buffer over to `name`. Holds the switch mutex for
    /// the whole sequence, so no engine transaction overlaps: flush
    /// every queued sector to the outgoing image, reload, record the
    /// selection, then make the host re-discover the card.
    fn switch_to(&mut self, name: FileName) -> Result<(), CardError> {
        {
            let mut card = self.slot.lock();
            while let Some(sector) = self.dirty.dequeue() {
                let mut staged = [0u8; SECTOR_SIZE];
                staged.copy_from_slice(card.sector(sector));
                if let Err(e) = self.write_through(sector, &staged) {
                    warn!("sector {:#06x} lost in switch: {}", sector, e);
                    self.led.blink_error(e.code());
                }
            }
            self.reload(&mut card, &name)?;
            if let Err(e) = manager::remember_index(&mut self.store, &name) {
                warn!("could not persist image index: {}", e);
            }
        }
        self.active = Some(name);
        self.led.image_change();
        self.bus.simulate_reconnect();
        Ok(())
    }

    fn reload(&mut self, card: &mut MemoryCard, name: &FileName) -> Result<(), CardError> {
        card.load_from(&mut self.store, name.as_str())
    }
}
