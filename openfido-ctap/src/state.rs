//! Persistent authenticator state, resident-key table and signature counter
//!
//! All three are records in the [`RecordStore`]. Every mutation is written
//! through immediately; nothing is cached across a power loss.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::callbacks::{RecordStore, StoreError};
use crate::cbor;
use crate::credential::CredentialId;
use crate::secret::Secret;
use crate::store::{self, COUNTER_FILE, COUNTER_KEY, RK_FILE, STATE_FILE, STATE_KEY};
use crate::types::User;

/// Resident-key slots
pub const MAX_KEYS: usize = 8;

/// Master secret plus external key slots
pub const KEY_SPACE_BYTES: usize = 128;

/// Bytes at the start of the key space used as the master secret
pub const MASTER_SECRET_LEN: usize = 64;

pub const PIN_SALT_LEN: usize = 32;
pub const PIN_LOCKOUT_ATTEMPTS: i8 = 8;
pub const PIN_BOOT_ATTEMPTS: u8 = 3;
pub const STATE_VERSION: u8 = 1;

const INITIALIZED_MARKER: u8 = 0xA5;
const EMPTY_KEY_SLOT: u16 = 0xFFFF;

/// Key slot errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlotError {
    /// Index out of range or no room left in the key space
    NoSpace,
    /// The slot already holds a key
    Taken,
    /// Nothing stored in the slot
    Empty,
}

/// The singleton state record (`STATE_FILE`/`STATE_KEY`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatorState {
    pub is_initialized: u8,
    pub is_pin_set: bool,
    pub pin_code_hash: Secret<32>,
    pub pin_salt: Secret<PIN_SALT_LEN>,
    pub remaining_tries: i8,
    pub rk_stored: u16,
    pub key_lengths: [u16; MAX_KEYS],
    pub key_space: Secret<KEY_SPACE_BYTES>,
    pub data_version: u8,
}

impl AuthenticatorState {
    /// Factory state: fresh master secret and salt, no PIN, no resident keys
    pub fn fresh(lockout_attempts: i8) -> Self {
        let mut key_space = Secret::<KEY_SPACE_BYTES>::zeroed();
        let master = Secret::<MASTER_SECRET_LEN>::random();
        key_space.as_mut_bytes()[..MASTER_SECRET_LEN].copy_from_slice(master.as_bytes());
        Self {
            is_initialized: INITIALIZED_MARKER,
            is_pin_set: false,
            pin_code_hash: Secret::zeroed(),
            pin_salt: Secret::random(),
            remaining_tries: lockout_attempts,
            rk_stored: 0,
            key_lengths: [EMPTY_KEY_SLOT; MAX_KEYS],
            key_space,
            data_version: STATE_VERSION,
        }
    }

    /// Read the state record.
    ///
    /// A missing, undecodable or foreign-version record yields `None`.
    pub fn load<S: RecordStore + ?Sized>(store: &mut S) -> Result<Option<Self>, StoreError> {
        let bytes = match store::load(store, STATE_FILE, STATE_KEY) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        match cbor::decode::<Self>(&bytes) {
            Ok(state)
                if state.data_version == STATE_VERSION
                    && state.is_initialized == INITIALIZED_MARKER =>
            {
                Ok(Some(state))
            }
            Ok(state) => {
                log::warn!("state record has version {}, reinitialising", state.data_version);
                Ok(None)
            }
            Err(_) => {
                log::warn!("state record is corrupt, reinitialising");
                Ok(None)
            }
        }
    }

    pub fn persist<S: RecordStore + ?Sized>(&self, store: &mut S) -> Result<(), StoreError> {
        let bytes = cbor::encode(self).map_err(|_| StoreError::Corrupt)?;
        store::save(store, STATE_FILE, STATE_KEY, &bytes)
    }

    /// Key for credential integrity tags
    pub fn transport_key(&self) -> &[u8] {
        &self.key_space.as_bytes()[..32]
    }

    /// Key for credential key derivation and hmac-secret
    pub fn transport_key2(&self) -> &[u8] {
        &self.key_space.as_bytes()[32..MASTER_SECRET_LEN]
    }

    /// Replace the whole key space, master secret included
    pub fn load_external_keys(&mut self, keys: &[u8; KEY_SPACE_BYTES]) {
        self.key_space.as_mut_bytes().copy_from_slice(keys);
    }

    /// Number of occupied key slots; slots fill in order
    pub fn keys_stored(&self) -> usize {
        self.key_lengths
            .iter()
            .take_while(|len| **len != EMPTY_KEY_SLOT)
            .count()
    }

    pub fn key_len(&self, index: usize) -> Option<usize> {
        if index >= self.keys_stored() {
            return None;
        }
        Some(self.key_lengths[index] as usize)
    }

    fn key_offset(&self, index: usize) -> usize {
        MASTER_SECRET_LEN
            + self.key_lengths[..index]
                .iter()
                .filter(|len| **len != EMPTY_KEY_SLOT)
                .map(|len| *len as usize)
                .sum::<usize>()
    }

    /// Place a key in slot `index`; the caller persists
    pub fn store_key(&mut self, index: usize, key: &[u8]) -> Result<(), KeySlotError> {
        if self.keys_stored() >= MAX_KEYS || index >= MAX_KEYS || key.is_empty() {
            return Err(KeySlotError::NoSpace);
        }
        if self.key_lengths[index] != EMPTY_KEY_SLOT {
            return Err(KeySlotError::Taken);
        }
        let offset = self.key_offset(index);
        if offset + key.len() > KEY_SPACE_BYTES {
            return Err(KeySlotError::NoSpace);
        }
        self.key_lengths[index] = key.len() as u16;
        self.key_space.as_mut_bytes()[offset..offset + key.len()].copy_from_slice(key);
        Ok(())
    }

    pub fn load_key(&self, index: usize) -> Result<&[u8], KeySlotError> {
        if index >= MAX_KEYS {
            return Err(KeySlotError::NoSpace);
        }
        let len = self.key_len(index).ok_or(KeySlotError::Empty)?;
        let offset = self.key_offset(index);
        if offset + len > KEY_SPACE_BYTES {
            return Err(KeySlotError::NoSpace);
        }
        Ok(&self.key_space.as_bytes()[offset..offset + len])
    }

    /// Overwrite the bytes of an occupied slot; the length stays the same
    pub fn rewrite_key(&mut self, index: usize, key: &[u8]) -> Result<(), KeySlotError> {
        match self.key_len(index) {
            Some(len) if len == key.len() => {}
            Some(_) => return Err(KeySlotError::Taken),
            None => return Err(KeySlotError::Empty),
        }
        let offset = self.key_offset(index);
        self.key_space.as_mut_bytes()[offset..offset + key.len()].copy_from_slice(key);
        Ok(())
    }
}

/// One resident-key slot (`RK_FILE`, key = index + 1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentKey {
    pub id: CredentialId,
    pub user: User,
}

impl ResidentKey {
    /// Same relying party and same user handle
    pub fn matches(&self, other: &ResidentKey) -> bool {
        self.id.rp_id_hash == other.id.rp_id_hash && self.user.id == other.user.id
    }
}

fn rk_key(index: u16) -> u16 {
    index + 1
}

pub fn load_resident_key<S: RecordStore + ?Sized>(
    store: &mut S,
    index: u16,
) -> Result<ResidentKey, StoreError> {
    let bytes = store::load(store, RK_FILE, rk_key(index))?;
    cbor::decode(&bytes).map_err(|_| StoreError::Corrupt)
}

/// Write slot `index`, overwriting whatever it held
pub fn store_resident_key<S: RecordStore + ?Sized>(
    store: &mut S,
    index: u16,
    rk: &ResidentKey,
) -> Result<(), StoreError> {
    let bytes = cbor::encode(rk).map_err(|_| StoreError::Corrupt)?;
    store::save(store, RK_FILE, rk_key(index), &bytes)
}

/// Load every slot below `count`, skipping unreadable ones
pub fn load_resident_keys<S: RecordStore + ?Sized>(
    store: &mut S,
    count: u16,
) -> Vec<(u16, ResidentKey)> {
    let mut keys = Vec::with_capacity(count as usize);
    for index in 0..count {
        match load_resident_key(store, index) {
            Ok(rk) => keys.push((index, rk)),
            Err(err) => log::error!("resident key {index} unreadable: {err}"),
        }
    }
    keys
}

pub fn reset_resident_keys<S: RecordStore + ?Sized>(store: &mut S) -> Result<(), StoreError> {
    store::wipe(store, RK_FILE)
}

/// Read the global signature counter; absent means zero
pub fn read_counter<S: RecordStore + ?Sized>(store: &mut S) -> Result<u32, StoreError> {
    match store::load(store, COUNTER_FILE, COUNTER_KEY) {
        Ok(bytes) => {
            let bytes: [u8; 4] = bytes.as_slice().try_into().map_err(|_| StoreError::Corrupt)?;
            Ok(u32::from_le_bytes(bytes))
        }
        Err(StoreError::NotFound) => Ok(0),
        Err(err) => Err(err),
    }
}

pub fn write_counter<S: RecordStore + ?Sized>(store: &mut S, value: u32) -> Result<(), StoreError> {
    store::save(store, COUNTER_FILE, COUNTER_KEY, &value.to_le_bytes())
}

/// Advance the counter by `amount`, or by a random step in `1..=16` when
/// `amount` is zero, and persist it.
pub fn advance_counter<S: RecordStore + ?Sized>(
    store: &mut S,
    amount: u32,
) -> Result<u32, StoreError> {
    let amount = if amount == 0 {
        use rand::RngCore;
        let mut rng = [0u8; 1];
        rand::rngs::OsRng.fill_bytes(&mut rng);
        u32::from(rng[0] & 0x0f) + 1
    } else {
        amount
    };
    let value = read_counter(store)?.wrapping_add(amount);
    write_counter(store, value)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_fresh_state_round_trips_through_store() {
        let mut store = MemoryStore::new();
        assert!(AuthenticatorState::load(&mut store).unwrap().is_none());

        let state = AuthenticatorState::fresh(PIN_LOCKOUT_ATTEMPTS);
        state.persist(&mut store).unwrap();

        let loaded = AuthenticatorState::load(&mut store).unwrap().unwrap();
        assert_eq!(loaded.key_space, state.key_space);
        assert_eq!(loaded.pin_salt, state.pin_salt);
        assert_eq!(loaded.remaining_tries, PIN_LOCKOUT_ATTEMPTS);
        assert!(!loaded.is_pin_set);
    }

    #[test]
    fn test_foreign_version_is_ignored() {
        let mut store = MemoryStore::new();
        let mut state = AuthenticatorState::fresh(PIN_LOCKOUT_ATTEMPTS);
        state.data_version = STATE_VERSION + 1;
        state.persist(&mut store).unwrap();
        assert!(AuthenticatorState::load(&mut store).unwrap().is_none());
    }

    #[test]
    fn test_fresh_states_differ() {
        let a = AuthenticatorState::fresh(PIN_LOCKOUT_ATTEMPTS);
        let b = AuthenticatorState::fresh(PIN_LOCKOUT_ATTEMPTS);
        assert_ne!(a.transport_key(), b.transport_key());
        assert_ne!(a.pin_salt, b.pin_salt);
    }

    #[test]
    fn test_key_slots() {
        let mut state = AuthenticatorState::fresh(PIN_LOCKOUT_ATTEMPTS);
        assert_eq!(state.keys_stored(), 0);
        assert_eq!(state.load_key(0), Err(KeySlotError::Empty));

        state.store_key(0, &[1u8; 32]).unwrap();
        state.store_key(1, &[2u8; 16]).unwrap();
        assert_eq!(state.store_key(0, &[3u8; 4]), Err(KeySlotError::Taken));
        assert_eq!(state.keys_stored(), 2);
        assert_eq!(state.load_key(0).unwrap(), &[1u8; 32]);
        assert_eq!(state.load_key(1).unwrap(), &[2u8; 16]);

        // 64 bytes of slot space, 48 used
        assert_eq!(state.store_key(2, &[4u8; 17]), Err(KeySlotError::NoSpace));
        state.store_key(2, &[4u8; 16]).unwrap();

        // slots do not overlap the master secret
        let master = state.transport_key().to_vec();
        state.store_key(3, &[0u8; 1]).unwrap_err();
        assert_eq!(state.transport_key(), master.as_slice());
    }

    #[test]
    fn test_counter_advances_by_small_random_step() {
        let mut store = MemoryStore::new();
        assert_eq!(read_counter(&mut store).unwrap(), 0);
        let mut last = 0;
        for _ in 0..32 {
            let next = advance_counter(&mut store, 0).unwrap();
            assert!(next > last && next - last <= 16);
            last = next;
        }
        assert_eq!(advance_counter(&mut store, 5).unwrap(), last + 5);
    }

    #[test]
    fn test_resident_key_table() {
        let mut store = MemoryStore::new();
        let rk = ResidentKey {
            id: CredentialId::from_parts([7u8; 16], [1u8; 16], [9u8; 32], 42),
            user: User::new(b"alice".to_vec()),
        };
        store_resident_key(&mut store, 0, &rk).unwrap();
        store_resident_key(&mut store, 1, &rk).unwrap();
        assert_eq!(load_resident_key(&mut store, 1).unwrap(), rk);
        assert_eq!(load_resident_keys(&mut store, 2).len(), 2);

        reset_resident_keys(&mut store).unwrap();
        assert_eq!(
            load_resident_key(&mut store, 0),
            Err(StoreError::NotFound)
        );
    }
}
