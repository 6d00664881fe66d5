//! The image catalogue: a pure function layer over the volume root.
//! An image is any file whose upper-cased name is a decimal stem plus
//! `.MCR` and whose size is exactly one card. Anything else in the
//! directory is ignored and never touched. Every operation
//! re-enumerates the directory, so the catalogue is always consistent
//! with the volume.

use core::fmt::Write as _;

use heapless::{String, Vec};
use log::info;
use nom::bytes::complete::tag;
use nom::character::complete::digit1;
use nom::combinator::{all_consuming, map_res};
use nom::sequence::terminated;
use nom::IResult;

use crate::card::image::{CARD_SIZE, SECTOR_COUNT, SECTOR_SIZE};
use crate::constants::{INDEX_SIDECAR, MAX_IMAGES};
use crate::store::{FileName, FileStore, StoreError};
use crate::ManagerError;

const IMAGE_EXT: &str = ".MCR";

/// All image names in the volume root, sorted lexicographically over
/// their upper-cased form.
type Catalogue = Vec<FileName, MAX_IMAGES>;

fn decimal(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

fn image_stem(input: &str) -> IResult<&str, u32> {
    all_consuming(terminated(decimal, tag(IMAGE_EXT)))(input)
}

/// The numeric stem of a valid image name, `None` for anything else.
/// Expects the upper-cased form.
pub fn image_index(name: &str) -> Option<u32> {
    image_stem(name).ok().map(|(_, index)| index)
}

fn scan<F: FileStore>(store: &mut F) -> Result<Catalogue, ManagerError> {
    let mut names: Catalogue = Vec::new();
    let mut overflow = false;
    store
        .iterate_root(|entry| {
            if entry.directory || entry.size as usize != CARD_SIZE {
                return;
            }
            if image_index(entry.name.to_uppercase().as_str()).is_none() {
                return;
            }
            if names.push(entry.name).is_err() {
                overflow = true;
            }
        })
        .map_err(|_| ManagerError::FileOpen)?;
    if overflow {
        return Err(ManagerError::AllocFail);
    }
    names.sort_unstable_by(|a, b| a.to_uppercase().cmp(&b.to_uppercase()));
    Ok(names)
}

fn position(names: &Catalogue, name: &FileName) -> Option<usize> {
    let key = name.to_uppercase();
    names.iter().position(|n| n.to_uppercase() == key)
}

/// Number of images on the volume.
pub fn count<F: FileStore>(store: &mut F) -> Result<u32, ManagerError> {
    Ok(scan(store)?.len() as u32)
}

/// The `index`-th image name in catalogue order.
pub fn get<F: FileStore>(store: &mut F, index: u32) -> Result<FileName, ManagerError> {
    let names = scan(store)?;
    names
        .get(index as usize)
        .copied()
        .ok_or(ManagerError::IndexOutOfBounds)
}

/// The image following `name` in catalogue order.
pub fn next_image<F: FileStore>(store: &mut F, name: &FileName) -> Result<FileName, ManagerError> {
    let names = scan(store)?;
    let pos = position(&names, name).ok_or(ManagerError::NoEntry)?;
    names.get(pos + 1).copied().ok_or(ManagerError::NoEntry)
}

/// The image preceding `name` in catalogue order.
pub fn prev_image<F: FileStore>(store: &mut F, name: &FileName) -> Result<FileName, ManagerError> {
    let names = scan(store)?;
    let pos = position(&names, name).ok_or(ManagerError::NoEntry)?;
    match pos.checked_sub(1) {
        Some(prev) => Ok(names[prev]),
        None => Err(ManagerError::NoEntry),
    }
}

/// Catalogue position of `name`.
pub fn index_of<F: FileStore>(store: &mut F, name: &FileName) -> Result<u32, ManagerError> {
    let names = scan(store)?;
    position(&names, name)
        .map(|p| p as u32)
        .ok_or(ManagerError::NoEntry)
}

/// The image to load at power-up: the sidecar's remembered index,
/// clamped into the catalogue; the first image when the sidecar is
/// missing or unreadable.
pub fn initial<F: FileStore>(store: &mut F) -> Result<FileName, ManagerError> {
    let names = scan(store)?;
    if names.is_empty() {
        return Err(ManagerError::NoEntry);
    }
    let remembered = read_sidecar(store).unwrap_or(0);
    let index = remembered.min(names.len() as u32 - 1);
    Ok(names[index as usize])
}

/// Persist the catalogue position of `name` so the selection survives
/// a power cycle.
pub fn remember_index<F: FileStore>(store: &mut F, name: &FileName) -> Result<(), ManagerError> {
    let index = index_of(store, name)?;
    let mut text: String<8> = String::new();
    let _ = write!(text, "{}", index);
    store
        .replace(INDEX_SIDECAR, text.as_bytes())
        .map_err(|_| ManagerError::FileWrite)
}

fn read_sidecar<F: FileStore>(store: &mut F) -> Option<u32> {
    let mut buf = [0u8; 16];
    let n = store.read_at(INDEX_SIDECAR, 0, &mut buf).ok()?;
    let text = core::str::from_utf8(&buf[..n]).ok()?;
    let text = text.trim_matches(|c: char| c.is_ascii_whitespace());
    let result = all_consuming(decimal)(text).ok().map(|(_, index)| index);
    result
}

/// Create a blank image under the lowest free decimal name (`0.MCR`,
/// `1.MCR`, ...), format it with an empty directory, and remember it
/// as the current selection.
pub fn create<F: FileStore>(store: &mut F) -> Result<FileName, ManagerError> {
    let names = scan(store)?;
    if names.len() >= MAX_IMAGES {
        return Err(ManagerError::AllocFail);
    }
    let name = lowest_free_name(store).ok_or(ManagerError::AllocFail)?;
    match store.create_new(name.as_str()) {
        Ok(()) => {}
        Err(StoreError::Exists) => return Err(ManagerError::NameConflict),
        Err(_) => return Err(ManagerError::FileOpen),
    }
    write_blank_image(store, name.as_str())?;
    remember_index(store, &name)?;
    info!("created blank image {}", name);
    Ok(name)
}

fn lowest_free_name<F: FileStore>(store: &mut F) -> Option<FileName> {
    for n in 0..MAX_IMAGES as u32 {
        let mut candidate: String<16> = String::new();
        let _ = write!(candidate, "{}{}", n, IMAGE_EXT);
        if !store.exists(candidate.as_str()) {
            return FileName::new(candidate.as_str()).ok();
        }
    }
    None
}

/// XOR of a byte run; every sector of block 0 ends in the XOR of its
/// first 127 bytes.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

fn with_checksum(mut frame: [u8; SECTOR_SIZE]) -> [u8; SECTOR_SIZE] {
    frame[SECTOR_SIZE - 1] = xor_checksum(&frame[..SECTOR_SIZE - 1]);
    frame
}

fn header_sector() -> [u8; SECTOR_SIZE] {
    let mut frame = [0u8; SECTOR_SIZE];
    frame[0] = b'M';
    frame[1] = b'C';
    with_checksum(frame)
}

fn directory_sector() -> [u8; SECTOR_SIZE] {
    let mut frame = [0u8; SECTOR_SIZE];
    frame[0] = 0xA0; // free block
    frame[8] = 0xFF; // no next block
    frame[9] = 0xFF;
    with_checksum(frame)
}

fn bad_sector_entry() -> [u8; SECTOR_SIZE] {
    let mut frame = [0u8; SECTOR_SIZE];
    frame[0] = 0xFF; // no broken sector
    frame[1] = 0xFF;
    frame[2] = 0xFF;
    frame[3] = 0xFF;
    frame[8] = 0xFF;
    frame[9] = 0xFF;
    with_checksum(frame)
}

fn write_blank_image<F: FileStore>(store: &mut F, name: &str) -> Result<(), ManagerError> {
    let header = header_sector();
    let directory = directory_sector();
    let reserved = bad_sector_entry();
    let zero = [0u8; SECTOR_SIZE];
    for sector in 0..SECTOR_COUNT {
        let frame = match sector {
            0 => &header,
            1..=15 => &directory,
            16..=35 => &reserved,
            63 => &header, // write-test sector mirrors the header
            _ => &zero,
        };
        let offset = (sector * SECTOR_SIZE) as u32;
        match store.write_at(name, offset, frame) {
            Ok(n) if n == SECTOR_SIZE => {}
            _ => return Err(ManagerError::FileWrite),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use libc_print::libc_println;

    use super::*;
    use crate::store::ram::RamStore;

    fn blank_image() -> std::vec::Vec<u8> {
        let mut store = RamStore::new();
        store.create_new("X").unwrap();
        write_blank_image(&mut store, "X").unwrap();
        store.contents("X").unwrap().to_vec()
    }

    fn seeded(names: &[&str]) -> RamStore {
        let mut store = RamStore::new();
        for name in names {
            store.insert(name, vec![0u8; CARD_SIZE]);
        }
        store
    }

    #[test]
    fn name_validity() {
        assert_eq!(image_index("0.MCR"), Some(0));
        assert_eq!(image_index("117.MCR"), Some(117));
        assert_eq!(image_index("BANANA.MCR"), None);
        assert_eq!(image_index(".MCR"), None);
        assert_eq!(image_index("3.MCR.BAK"), None);
        assert_eq!(image_index("3.TXT"), None);
        assert_eq!(image_index("3MCR"), None);
        assert_eq!(image_index(""), None);
    }

    #[test]
    fn catalogue_is_sorted_and_filtered() {
        let mut store = seeded(&["10.MCR", "2.MCR", "1.MCR"]);
        // noise: wrong size, wrong name; neither shows up
        store.insert("5.MCR", vec![0u8; 42]);
        store.insert("README.TXT", vec![0u8; CARD_SIZE]);

        assert_eq!(count(&mut store).unwrap(), 3);
        // lexicographic over the name, not numeric
        assert_eq!(get(&mut store, 0).unwrap().as_str(), "1.MCR");
        assert_eq!(get(&mut store, 1).unwrap().as_str(), "10.MCR");
        assert_eq!(get(&mut store, 2).unwrap().as_str(), "2.MCR");
        assert_eq!(get(&mut store, 3), Err(ManagerError::IndexOutOfBounds));
    }

    #[test]
    fn neighbours_walk_the_catalogue() {
        let mut store = seeded(&["0.MCR", "1.MCR", "2.MCR"]);
        let first = get(&mut store, 0).unwrap();
        let second = next_image(&mut store, &first).unwrap();
        assert_eq!(second.as_str(), "1.MCR");
        assert_eq!(next_image(&mut store, &second).unwrap().as_str(), "2.MCR");
        let last = get(&mut store, 2).unwrap();
        assert_eq!(next_image(&mut store, &last), Err(ManagerError::NoEntry));
        assert_eq!(prev_image(&mut store, &first), Err(ManagerError::NoEntry));
        assert_eq!(prev_image(&mut store, &second).unwrap().as_str(), "0.MCR");
    }

    #[test]
    fn mixed_case_names_count_and_keep_their_spelling() {
        let mut store = seeded(&["3.mcr"]);
        assert_eq!(count(&mut store).unwrap(), 1);
        // the stored spelling is preserved so the file can be reopened
        assert_eq!(get(&mut store, 0).unwrap().as_str(), "3.mcr");
    }

    #[test]
    fn create_in_empty_directory_yields_zero() {
        let mut store = RamStore::new();
        let name = create(&mut store).unwrap();
        assert_eq!(name.as_str(), "0.MCR");
        assert_eq!(store.contents("0.MCR").unwrap().len(), CARD_SIZE);
        assert_eq!(store.contents(INDEX_SIDECAR).unwrap(), b"0");
    }

    #[test]
    fn create_fills_the_lowest_gap() {
        let mut store = seeded(&["0.MCR", "2.MCR"]);
        assert_eq!(create(&mut store).unwrap().as_str(), "1.MCR");
        assert_eq!(create(&mut store).unwrap().as_str(), "3.MCR");
    }

    #[test]
    fn blank_image_layout() {
        let image = blank_image();
        assert_eq!(image.len(), CARD_SIZE);
        // header: magic plus checksum
        assert_eq!(&image[0..2], b"MC");
        libc_println!("header checksum: {:#04x}", image[127]);
        assert_eq!(image[127], b'M' ^ b'C');
        // 15 directory entries marked free, chained to nothing
        for sector in 1..=15 {
            let frame = &image[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE];
            assert_eq!(frame[0], 0xA0);
            assert_eq!(&frame[8..10], &[0xFF, 0xFF]);
        }
        // 20 empty broken-sector entries
        for sector in 16..=35 {
            let frame = &image[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE];
            assert_eq!(&frame[0..4], &[0xFF; 4]);
            assert_eq!(&frame[4..8], &[0x00; 4]);
            assert_eq!(&frame[8..10], &[0xFF, 0xFF]);
        }
        // write-test sector mirrors the header
        assert_eq!(
            &image[63 * SECTOR_SIZE..64 * SECTOR_SIZE],
            &image[0..SECTOR_SIZE]
        );
        // every sector of block 0 carries a valid checksum; the rest
        // of the card is zero
        for sector in 0..64 {
            let frame = &image[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE];
            assert_eq!(frame[127], xor_checksum(&frame[..127]));
        }
        assert!(image[64 * SECTOR_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn initial_uses_and_clamps_the_sidecar() {
        let mut store = seeded(&["0.MCR", "1.MCR"]);
        // no sidecar: first image
        assert_eq!(initial(&mut store).unwrap().as_str(), "0.MCR");
        store.insert(INDEX_SIDECAR, b"1".to_vec());
        assert_eq!(initial(&mut store).unwrap().as_str(), "1.MCR");
        // out of range clamps to the last image
        store.insert(INDEX_SIDECAR, b"7".to_vec());
        assert_eq!(initial(&mut store).unwrap().as_str(), "1.MCR");
        // garbage falls back to the first image
        store.insert(INDEX_SIDECAR, b"first!".to_vec());
        assert_eq!(initial(&mut store).unwrap().as_str(), "0.MCR");
    }

    #[test]
    fn initial_with_no_images() {
        let mut store = RamStore::new();
        assert_eq!(initial(&mut store), Err(ManagerError::NoEntry));
    }

    #[test]
    fn remember_index_round_trips() {
        let mut store = seeded(&["0.MCR", "1.MCR", "2.MCR"]);
        let middle = get(&mut store, 1).unwrap();
        remember_index(&mut store, &middle).unwrap();
        assert_eq!(store.contents(INDEX_SIDECAR).unwrap(), b"1");
        assert_eq!(initial(&mut store).unwrap().as_str(), "1.MCR");
    }
}
