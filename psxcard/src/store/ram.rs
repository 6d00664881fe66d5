//! An in-memory [`FileStore`] used by the test suite. Descends from the
//! RAM-disk staging area the USB-exposed builds keep between the host
//! and the flash filesystem.

use std::collections::BTreeMap;
use std::vec::Vec;

use super::{EntryInfo, FileName, FileStore, StoreError};

#[derive(Default)]
pub struct RamStore {
    files: BTreeMap<String, Vec<u8>>,
}

impl RamStore {
    pub fn new() -> RamStore {
        RamStore::default()
    }

    /// Seed a file without going through the trait.
    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.files.insert(name.to_string(), data);
    }

    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(|v| v.as_slice())
    }

    /// Drop a file, e.g. to provoke write-back failures.
    pub fn remove(&mut self, name: &str) {
        self.files.remove(name);
    }
}

impl FileStore for RamStore {
    fn iterate_root<F>(&mut self, mut func: F) -> Result<(), StoreError>
    where
        F: FnMut(&EntryInfo),
    {
        for (name, data) in self.files.iter() {
            let name = match FileName::new(name) {
                Ok(n) => n,
                Err(_) => continue, // longer than any valid image name
            };
            func(&EntryInfo {
                name,
                size: data.len() as u32,
                directory: false,
            });
        }
        Ok(())
    }

    fn size_of(&mut self, name: &str) -> Result<u32, StoreError> {
        self.files
            .get(name)
            .map(|d| d.len() as u32)
            .ok_or(StoreError::NotFound)
    }

    fn read_at(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, StoreError> {
        let data = self.files.get(name).ok_or(StoreError::NotFound)?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, name: &str, offset: u32, data: &[u8]) -> Result<usize, StoreError> {
        let file = self.files.get_mut(name).ok_or(StoreError::NotFound)?;
        let offset = offset as usize;
        if file.len() < offset + data.len() {
            file.resize(offset + data.len(), 0);
        }
        file[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn create_new(&mut self, name: &str) -> Result<(), StoreError> {
        if self.files.contains_key(name) {
            return Err(StoreError::Exists);
        }
        self.files.insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn replace(&mut self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        self.files.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn exists(&mut self, name: &str) -> bool {
        self.files.contains_key(name)
    }
}
