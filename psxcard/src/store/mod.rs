//! The file-system seam. The sync pipeline and the image catalogue are
//! written against [`FileStore`], a thin contract over any volume that
//! offers root-directory listing plus random-access reads and writes.
//! The SD-backed board implementation lives in the hal crate; a
//! RAM-backed implementation backs the test suite.

use core::cmp::Ordering;
use core::fmt;

use crate::constants::MAX_FILENAME_LEN;

#[cfg(test)]
pub mod ram;

/// Ways a [`FileStore`] operation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The named file does not exist.
    NotFound,
    /// Exclusive creation was asked for, but the name already exists.
    Exists,
    /// The volume has no room for the requested data.
    Full,
    /// The underlying device reported an error.
    Io,
}

#[rustfmt::skip]
impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &StoreError::NotFound   => write!(f, "file not found"),
            &StoreError::Exists     => write!(f, "file already exists"),
            &StoreError::Full       => write!(f, "volume full"),
            &StoreError::Io         => write!(f, "device error"),
        }
    }
}

/// A file name in the volume root. Fixed storage, at most
/// [`MAX_FILENAME_LEN`] bytes; ordering is plain byte-wise comparison,
/// which for the upper-cased ASCII names the catalogue keeps equals
/// lexicographic order.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileName {
    buf: [u8; MAX_FILENAME_LEN],
    len: u8,
}

impl FileName {
    /// Build a name from a string slice. Names longer than the fixed
    /// storage are rejected.
    pub fn new(name: &str) -> Result<FileName, StoreError> {
        let bytes = name.as_bytes();
        if bytes.len() > MAX_FILENAME_LEN {
            return Err(StoreError::Full);
        }
        let mut buf = [0u8; MAX_FILENAME_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(FileName {
            buf,
            len: bytes.len() as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    /// The same name with every ASCII letter upper-cased.
    pub fn to_uppercase(&self) -> FileName {
        let mut upper = *self;
        for b in upper.buf[..upper.len as usize].iter_mut() {
            *b = b.to_ascii_uppercase();
        }
        upper
    }
}

impl PartialOrd for FileName {
    fn partial_cmp(&self, other: &FileName) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileName {
    fn cmp(&self, other: &FileName) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FileName({})", self.as_str())
    }
}

/// One root-directory entry, as reported to the catalogue scan.
#[derive(Debug, Clone, Copy)]
pub struct EntryInfo {
    pub name: FileName,
    pub size: u32,
    pub directory: bool,
}

/// Contract over the mass-storage volume holding the card images.
///
/// All paths are names in the volume root; the simulator never creates
/// or walks directories. Implementations only need seek + read/write at
/// byte granularity, which both a FAT volume and a log-structured flash
/// filesystem can provide.
pub trait FileStore {
    /// Call `func` for every entry in the volume root.
    fn iterate_root<F>(&mut self, func: F) -> Result<(), StoreError>
    where
        F: FnMut(&EntryInfo);

    /// Size in bytes of the named file.
    fn size_of(&mut self, name: &str) -> Result<u32, StoreError>;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes actually read.
    fn read_at(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, StoreError>;

    /// Write `data` starting at `offset`, extending the file if needed.
    /// Returns the number of bytes actually written.
    fn write_at(&mut self, name: &str, offset: u32, data: &[u8]) -> Result<usize, StoreError>;

    /// Create an empty file. Fails with [`StoreError::Exists`] if the
    /// name is already taken.
    fn create_new(&mut self, name: &str) -> Result<(), StoreError>;

    /// Create-or-truncate the named file and write `data` as its whole
    /// content.
    fn replace(&mut self, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Whether the named file exists.
    fn exists(&mut self, name: &str) -> bool;
}
