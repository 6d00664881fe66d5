#![cfg_attr(not(test), no_std)]

pub mod bus;
pub mod card;
pub mod constants;
pub mod led;
pub mod manager;
pub mod sim;
pub mod store;
pub mod sync;

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Errors raised while keeping the in-memory card coherent with its
/// image file. The numeric code doubles as the LED blink count.
pub enum CardError {
    /// The mass-storage volume could not be mounted.
    Mount,
    /// The image file could not be opened.
    FileOpen,
    /// Reading the image file failed or came up short.
    FileRead,
    /// Writing a sector through to the image file failed or came up short.
    FileWrite,
    /// The image file is not exactly one card (131072 bytes).
    FileSize,
    /// No image has been loaded yet.
    NoInit,
}

impl CardError {
    /// Blink count reported on the indicator LED.
    pub fn code(&self) -> u8 {
        *self as u8 + 1
    }
}

#[rustfmt::skip]
impl fmt::Display for CardError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &CardError::Mount       => write!(f, "volume mount failed"),
            &CardError::FileOpen    => write!(f, "image file open failed"),
            &CardError::FileRead    => write!(f, "image file read failed"),
            &CardError::FileWrite   => write!(f, "image file write failed"),
            &CardError::FileSize    => write!(f, "image file has the wrong size"),
            &CardError::NoInit      => write!(f, "no image loaded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Errors raised by the image catalogue. The numeric code doubles as
/// the LED blink count.
pub enum ManagerError {
    /// The catalogue cannot hold another image name.
    AllocFail,
    /// The requested index is outside the catalogue.
    IndexOutOfBounds,
    /// No neighbouring image in the requested direction.
    NoEntry,
    /// A supplied name is not a valid image name.
    BadParam,
    /// The chosen name already exists on the volume.
    NameConflict,
    /// The image file could not be created or opened.
    FileOpen,
    /// Writing the blank image failed or came up short.
    FileWrite,
}

impl ManagerError {
    /// Blink count reported on the indicator LED.
    pub fn code(&self) -> u8 {
        *self as u8 + 1
    }
}

#[rustfmt::skip]
impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &ManagerError::AllocFail        => write!(f, "image catalogue is full"),
            &ManagerError::IndexOutOfBounds => write!(f, "image index out of bounds"),
            &ManagerError::NoEntry          => write!(f, "no such catalogue entry"),
            &ManagerError::BadParam         => write!(f, "not a valid image name"),
            &ManagerError::NameConflict     => write!(f, "image name already exists"),
            &ManagerError::FileOpen         => write!(f, "image file create/open failed"),
            &ManagerError::FileWrite        => write!(f, "image file write failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A startup failure the frame-serving loop cannot recover from. The
/// board's main loop blinks the code forever and never answers the bus.
pub enum FatalError {
    Card(CardError),
    Manager(ManagerError),
}

impl FatalError {
    pub fn code(&self) -> u8 {
        match self {
            FatalError::Card(e) => e.code(),
            FatalError::Manager(e) => e.code(),
        }
    }
}

impl From<CardError> for FatalError {
    fn from(e: CardError) -> Self {
        FatalError::Card(e)
    }
}

impl From<ManagerError> for FatalError {
    fn from(e: ManagerError) -> Self {
        FatalError::Manager(e)
    }
}

#[rustfmt::skip]
impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FatalError::Card(e)     => write!(f, "{}", e),
            FatalError::Manager(e)  => write!(f, "{}", e),
        }
    }
}
