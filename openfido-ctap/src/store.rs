//! Record layout and an in-memory [`RecordStore`]

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::callbacks::{RecordStore, StoreError};

/// Singleton authenticator state record
pub const STATE_FILE: u16 = 1;
pub const STATE_KEY: u16 = 0x5AA5;

/// Resident keys live at `key = index + 1`
pub const RK_FILE: u16 = 2;

/// Signature counter
pub const COUNTER_FILE: u16 = 3;
pub const COUNTER_KEY: u16 = 1;

/// Upper bound on store polls before a busy store is reported
const BUSY_POLL_LIMIT: u32 = 100_000;

/// Block until the store has no operation in flight
pub fn wait_idle<S: RecordStore + ?Sized>(store: &mut S) -> Result<(), StoreError> {
    let mut polls = 0;
    while store.is_busy() {
        if polls == BUSY_POLL_LIMIT {
            return Err(StoreError::Busy);
        }
        store.poll();
        polls += 1;
    }
    Ok(())
}

/// Read a record, waiting for the store first
pub fn load<S: RecordStore + ?Sized>(
    store: &mut S,
    file_id: u16,
    key: u16,
) -> Result<Vec<u8>, StoreError> {
    wait_idle(store)?;
    store.find(file_id, key)
}

/// Update a record in place or create it, collecting garbage once on `NoSpace`
pub fn save<S: RecordStore + ?Sized>(
    store: &mut S,
    file_id: u16,
    key: u16,
    data: &[u8],
) -> Result<(), StoreError> {
    wait_idle(store)?;
    let result = match store.find(file_id, key) {
        Ok(_) => store.update(file_id, key, data),
        Err(StoreError::NotFound) => store.write(file_id, key, data),
        Err(err) => Err(err),
    };
    match result {
        Err(StoreError::NoSpace) => {
            log::warn!("record store full, collecting garbage");
            wait_idle(store)?;
            store.garbage_collect()?;
            wait_idle(store)?;
            match store.find(file_id, key) {
                Ok(_) => store.update(file_id, key, data),
                Err(_) => store.write(file_id, key, data),
            }
        }
        other => other,
    }
}

/// Drop every record of a file
pub fn wipe<S: RecordStore + ?Sized>(store: &mut S, file_id: u16) -> Result<(), StoreError> {
    wait_idle(store)?;
    store.delete_file(file_id)?;
    wait_idle(store)?;
    store.garbage_collect()
}

/// Heap-backed store for tests and hosted front-ends that persist elsewhere
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: BTreeMap<(u16, u16), Vec<u8>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses to hold more than `records` entries
    pub fn with_capacity(records: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            capacity: Some(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, file_id: u16, key: u16) -> bool {
        self.records.contains_key(&(file_id, key))
    }

    /// Snapshot of every record, used by file-backed front-ends
    pub fn records(&self) -> impl Iterator<Item = (&(u16, u16), &Vec<u8>)> {
        self.records.iter()
    }

    /// Rebuild from a snapshot produced by [`MemoryStore::records`]
    pub fn from_records(records: impl IntoIterator<Item = ((u16, u16), Vec<u8>)>) -> Self {
        Self {
            records: records.into_iter().collect(),
            capacity: None,
        }
    }
}

impl RecordStore for MemoryStore {
    fn find(&mut self, file_id: u16, key: u16) -> Result<Vec<u8>, StoreError> {
        self.records
            .get(&(file_id, key))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn write(&mut self, file_id: u16, key: u16, data: &[u8]) -> Result<(), StoreError> {
        if let Some(capacity) = self.capacity {
            if self.records.len() >= capacity && !self.records.contains_key(&(file_id, key)) {
                return Err(StoreError::NoSpace);
            }
        }
        self.records.insert((file_id, key), data.to_vec());
        Ok(())
    }

    fn update(&mut self, file_id: u16, key: u16, data: &[u8]) -> Result<(), StoreError> {
        match self.records.get_mut(&(file_id, key)) {
            Some(record) => {
                *record = data.to_vec();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn delete_file(&mut self, file_id: u16) -> Result<(), StoreError> {
        self.records.retain(|(file, _), _| *file != file_id);
        Ok(())
    }

    fn garbage_collect(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
