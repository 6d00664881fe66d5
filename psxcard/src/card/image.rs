//! The in-memory mirror of the active card image. One card is 1024
//! sectors of 128 bytes; the buffer is allocated once (statically, on
//! firmware) and overwritten in place on every image switch.

use log::info;
use spin::Mutex;

use crate::store::{FileStore, StoreError};
use crate::CardError;

/// Size of a single sector in bytes.
pub const SECTOR_SIZE: usize = 128;
/// Number of sectors in one memory card.
pub const SECTOR_COUNT: usize = 1024;
/// Size of a whole card image in bytes.
pub const CARD_SIZE: usize = SECTOR_SIZE * SECTOR_COUNT;
/// Flag byte after power-up or image switch. Bit 3 set tells the host
/// a new card was inserted and has not been written to yet.
pub const FLAG_DEFAULT: u8 = 0x08;
/// Sector 63 is the write-test sector; the host probes it and the
/// result is never persisted.
pub const TEST_SECTOR: Sector = 0x3F;

/// A sector index as it travels on the bus (10 significant bits).
pub type Sector = u16;

/// The switch mutex doubles as the owner of the active image: the
/// engine locks it for the duration of one transaction, the sync task
/// locks it to drain, swap or create.
pub type CardSlot = Mutex<MemoryCard>;

pub struct MemoryCard {
    flag: u8,
    data: [u8; CARD_SIZE],
}

impl MemoryCard {
    pub const fn new() -> MemoryCard {
        MemoryCard {
            flag: FLAG_DEFAULT,
            data: [0u8; CARD_SIZE],
        }
    }

    /// Whether `sector` addresses a real sector. Out-of-range indices
    /// are reported to the host as invalid, never wrapped.
    pub fn sector_valid(&self, sector: Sector) -> bool {
        (sector as usize) < SECTOR_COUNT
    }

    pub fn sector(&self, sector: Sector) -> &[u8; SECTOR_SIZE] {
        let start = sector as usize * SECTOR_SIZE;
        (&self.data[start..start + SECTOR_SIZE]).try_into().unwrap()
    }

    pub fn sector_mut(&mut self, sector: Sector) -> &mut [u8; SECTOR_SIZE] {
        let start = sector as usize * SECTOR_SIZE;
        (&mut self.data[start..start + SECTOR_SIZE])
            .try_into()
            .unwrap()
    }

    /// Flag byte sent to the host at the start of every frame.
    pub fn flag(&self) -> u8 {
        self.flag
    }

    /// Clear bit 3 of the flag byte once the host has completed a write.
    pub fn reset_seen(&mut self) {
        self.flag &= !(1 << 3);
    }

    /// Replace the buffer with the named image file. Restores the
    /// default flag byte, so the host sees a freshly inserted card.
    pub fn load_from<F: FileStore>(&mut self, store: &mut F, name: &str) -> Result<(), CardError> {
        let size = store.size_of(name).map_err(|e| match e {
            StoreError::NotFound => CardError::FileOpen,
            _ => CardError::FileRead,
        })?;
        if size as usize != CARD_SIZE {
            return Err(CardError::FileSize);
        }
        let read = store
            .read_at(name, 0, &mut self.data)
            .map_err(|_| CardError::FileRead)?;
        if read != CARD_SIZE {
            return Err(CardError::FileRead);
        }
        self.flag = FLAG_DEFAULT;
        info!("loaded card image {}", name);
        Ok(())
    }
}
