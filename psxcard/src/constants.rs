//! Global configuration for the memory-card simulator. All values are
//! compile-time; boards pick pin assignments in their own crates.

#[rustfmt::skip]
mod config {
    /// Time the card stays disconnected when simulating a reconnection.
    pub const RECONNECT_TIME_MS: u32            = 1000;
    /// Max length of an image file name, including the extension.
    pub const MAX_FILENAME_LEN: usize           = 32;
    /// Maximum number of images the catalogue will track.
    pub const MAX_IMAGES: usize                 = 255;
    /// Idle time on the bus before an automatic sync (flash-backed variant).
    pub const IDLE_AUTOSYNC_TIMEOUT_MS: u32     = 5000;
    /// Quiet time after the last mass-storage write before exporting it.
    pub const MSC_WRITE_SYNC_TIMEOUT_MS: u32    = 1000;
}

pub use config::*;

/// Name of the sidecar file recording the last-loaded image index.
pub const INDEX_SIDECAR: &str = "LastMemcardIndex.dat";
