//! Persistent store layered on `embedded_storage`.
//!
//! The store is a flat, byte-addressed sequence of IEEE-754 32-bit floats.
//! Offset 0 carries a magic sentinel that, if absent, means "unprogrammed"
//! (first boot, or a blank part) — every read degrades gracefully rather
//! than trusting garbage. Offset 4 carries a count of valid entries past
//! it; offset 44 carries the relay-polarity flag the core actually reads.
//! Everything else is host-side calibration data this firmware never
//! interprets.

use embedded_storage::{ReadStorage, Storage};

use crate::error::FirmwareError;

/// Absence of this value at offset 0 means "unprogrammed".
pub const MAGIC_SENTINEL: f32 = 123456.7890;
pub const OFFSET_MAGIC: u32 = 0;
pub const OFFSET_COUNT: u32 = 4;
pub const OFFSET_POLARITY: u32 = 44;

pub struct PersistentStore<S> {
    storage: S,
}

impl<S> PersistentStore<S>
where
    S: ReadStorage + Storage,
{
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    fn read_f32(&mut self, offset: u32) -> Result<f32, FirmwareError> {
        let mut bytes = [0u8; 4];
        self.storage
            .read(offset, &mut bytes)
            .map_err(|_| FirmwareError::Storage)?;
        Ok(f32::from_le_bytes(bytes))
    }

    fn write_f32(&mut self, offset: u32, value: f32) -> Result<(), FirmwareError> {
        self.storage
            .write(offset, &value.to_le_bytes())
            .map_err(|_| FirmwareError::Storage)
    }

    /// True once the magic sentinel is present at offset 0.
    pub fn is_programmed(&mut self) -> Result<bool, FirmwareError> {
        Ok(self.read_f32(OFFSET_MAGIC)? == MAGIC_SENTINEL)
    }

    /// Number of valid float entries declared at offset 4. Zero (and thus
    /// no entries considered valid) when the store is unprogrammed.
    pub fn entry_count(&mut self) -> Result<u32, FirmwareError> {
        if !self.is_programmed()? {
            return Ok(0);
        }
        Ok(self.read_f32(OFFSET_COUNT)?.max(0.0) as u32)
    }

    /// Read the relay-active-high flag, falling back to active-low
    /// silently when the store is unprogrammed.
    pub fn read_polarity_flag(&mut self) -> Result<f32, FirmwareError> {
        if !self.is_programmed()? {
            return Ok(0.0);
        }
        self.read_f32(OFFSET_POLARITY)
    }

    /// `WRITE_EEPROM <addr> <value>`: persist one float at a byte
    /// address. Returns the written value so the caller can check whether
    /// `addr == OFFSET_POLARITY` and refresh live polarity.
    pub fn write_entry(&mut self, addr: u32, value: f32) -> Result<(), FirmwareError> {
        self.write_f32(addr, value)?;
        if !self.is_programmed()? {
            self.write_f32(OFFSET_MAGIC, MAGIC_SENTINEL)?;
        }
        Ok(())
    }

    /// `DUMP_EEPROM`: yield every valid `(offset, value)` pair in address
    /// order, four-decimal precision left to the caller's formatter.
    pub fn dump<'a>(&'a mut self) -> Result<DumpIter<'a, S>, FirmwareError> {
        let count = self.entry_count()?;
        Ok(DumpIter {
            store: self,
            next_index: 0,
            count,
        })
    }

    pub fn into_inner(self) -> S {
        self.storage
    }
}

pub struct DumpIter<'a, S> {
    store: &'a mut PersistentStore<S>,
    next_index: u32,
    count: u32,
}

impl<'a, S> Iterator for DumpIter<'a, S>
where
    S: ReadStorage + Storage,
{
    type Item = (u32, f32);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.count {
            return None;
        }
        let offset = OFFSET_COUNT + 4 + self.next_index * 4;
        let value = self.store.read_f32(offset).ok()?;
        self.next_index += 1;
        Some((offset, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_storage::{ReadStorage, Storage};

    /// A plain byte array standing in for on-chip EEPROM/FRAM.
    struct MemStorage {
        bytes: [u8; 256],
    }

    impl MemStorage {
        fn blank() -> Self {
            Self { bytes: [0xFF; 256] }
        }
    }

    impl ReadStorage for MemStorage {
        type Error = ();
        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
            Ok(())
        }
        fn capacity(&self) -> usize {
            self.bytes.len()
        }
    }

    impl Storage for MemStorage {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn unprogrammed_store_falls_back_to_active_low() {
        let mut store = PersistentStore::new(MemStorage::blank());
        assert!(!store.is_programmed().unwrap());
        assert_eq!(store.read_polarity_flag().unwrap(), 0.0);
    }

    #[test]
    fn write_entry_sets_magic_and_round_trips_value() {
        let mut store = PersistentStore::new(MemStorage::blank());
        store.write_entry(OFFSET_POLARITY, 1.0).unwrap();
        assert!(store.is_programmed().unwrap());
        assert_eq!(store.read_polarity_flag().unwrap(), 1.0);
    }

    #[test]
    fn dump_reports_only_valid_entries() {
        let mut store = PersistentStore::new(MemStorage::blank());
        store.write_f32(OFFSET_MAGIC, MAGIC_SENTINEL).unwrap();
        store.write_f32(OFFSET_COUNT, 2.0).unwrap();
        store.write_f32(OFFSET_COUNT + 4, 1.5).unwrap();
        store.write_f32(OFFSET_COUNT + 8, 2.5).unwrap();
        let entries: Vec<_> = store.dump().unwrap().collect();
        assert_eq!(entries, vec![(OFFSET_COUNT + 4, 1.5), (OFFSET_COUNT + 8, 2.5)]);
    }
}
