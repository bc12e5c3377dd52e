//! Authenticator context
//!
//! [`AuthenticatorContext`] owns everything the command handlers share: the
//! configuration, the persistent state record, the record store, the
//! user-presence hooks, the PIN token, the key-agreement pair and the
//! pending getNextAssertion list. It is passed by reference to every
//! handler; there are no globals.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::time::Duration;

use openfido_crypto::{ecdh::KeyPair, ecdsa, pin_protocol};
use sha2::{Digest, Sha256};

use crate::callbacks::{HostChannel, KeepaliveStatus, RecordStore, UpResult, UserPresence};
use crate::cbor::{self, Value};
use crate::credential::CredentialId;
use crate::secret::Secret;
use crate::state::{
    self, AuthenticatorState, MAX_KEYS, PIN_BOOT_ATTEMPTS, PIN_LOCKOUT_ATTEMPTS, ResidentKey,
};
use crate::status::{Result, StatusCode};
use crate::types::User;
use crate::wait::{CancelToken, Clock, Wait, WaitCondition};

pub const PIN_TOKEN_SIZE: usize = 16;

/// Largest CTAP message advertised in getInfo
pub const MAX_MSG_SIZE: usize = 1200;

/// How long a request waits for a touch
pub const USER_PRESENCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between `UP_NEEDED` keepalives during a presence wait
pub const KEEPALIVE_INTERVAL_MS: u64 = 100;

/// Key slot holding a generated attestation key
const ATTESTATION_KEY_SLOT: usize = 0;

/// Model identifier reported in getInfo and attested credential data
pub const DEFAULT_AAGUID: [u8; 16] = [
    0x4f, 0x50, 0x45, 0x4e, 0x46, 0x49, 0x44, 0x4f, 0x9a, 0x21, 0x5c, 0x0e, 0x7b, 0x38, 0xd4, 0x11,
];

/// Authenticator configuration
#[derive(Debug, Clone)]
pub struct AuthenticatorConfig {
    /// Authenticator Attestation GUID
    pub aaguid: [u8; 16],

    /// P-256 scalar used for packed attestation
    ///
    /// When `None` a key is generated on first boot and kept in the state
    /// record.
    pub attestation_key: Option<[u8; 32]>,

    /// DER certificate for `attestation_key`; omitted from `x5c` when `None`
    pub attestation_cert: Option<Vec<u8>>,

    pub max_msg_size: usize,

    pub user_presence_timeout: Duration,

    /// Resident-key slots in use, at most [`MAX_KEYS`]
    pub max_resident_keys: usize,

    pub pin_lockout_attempts: i8,

    pub pin_boot_attempts: u8,
}

impl AuthenticatorConfig {
    pub fn new() -> Self {
        Self {
            aaguid: DEFAULT_AAGUID,
            attestation_key: None,
            attestation_cert: None,
            max_msg_size: MAX_MSG_SIZE,
            user_presence_timeout: USER_PRESENCE_TIMEOUT,
            max_resident_keys: MAX_KEYS,
            pin_lockout_attempts: PIN_LOCKOUT_ATTEMPTS,
            pin_boot_attempts: PIN_BOOT_ATTEMPTS,
        }
    }

    pub fn with_aaguid(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid = aaguid;
        self
    }

    pub fn with_attestation_key(mut self, key: [u8; 32]) -> Self {
        self.attestation_key = Some(key);
        self
    }

    pub fn with_attestation_cert(mut self, cert: Vec<u8>) -> Self {
        self.attestation_cert = Some(cert);
        self
    }

    pub fn with_max_msg_size(mut self, size: usize) -> Self {
        self.max_msg_size = size;
        self
    }

    pub fn with_user_presence_timeout(mut self, timeout: Duration) -> Self {
        self.user_presence_timeout = timeout;
        self
    }

    /// Capped at [`MAX_KEYS`]
    pub fn with_max_resident_keys(mut self, count: usize) -> Self {
        self.max_resident_keys = count.min(MAX_KEYS);
        self
    }

    pub fn with_pin_lockout_attempts(mut self, attempts: i8) -> Self {
        self.pin_lockout_attempts = attempts.max(1);
        self
    }

    pub fn with_pin_boot_attempts(mut self, attempts: u8) -> Self {
        self.pin_boot_attempts = attempts.max(1);
        self
    }
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A credential queued for getNextAssertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AssertionCandidate {
    pub id: CredentialId,
    pub user: User,
}

/// Length of `rpIdHash || flags || signCount`
pub(crate) const AUTH_DATA_HEADER_LEN: usize = 37;

/// What getAssertion leaves behind for getNextAssertion
#[derive(Debug, Clone)]
pub(crate) struct AssertionState {
    pub client_data_hash: [u8; 32],
    pub auth_data_header: [u8; AUTH_DATA_HEADER_LEN],
    pub user_verified: bool,
    /// Popped from the back, so sorted by ascending count
    pub remaining: Vec<AssertionCandidate>,
}

impl AssertionState {
    pub const fn empty() -> Self {
        Self {
            client_data_hash: [0; 32],
            auth_data_header: [0; AUTH_DATA_HEADER_LEN],
            user_verified: false,
            remaining: Vec::new(),
        }
    }

    pub fn pop(&mut self) -> Option<AssertionCandidate> {
        self.remaining.pop()
    }

    pub fn clear(&mut self) {
        *self = Self::empty();
    }
}

/// Shared state for one authenticator
pub struct AuthenticatorContext<S: RecordStore, P: UserPresence> {
    pub(crate) config: AuthenticatorConfig,
    pub(crate) store: S,
    pub(crate) presence: P,
    clock: Box<dyn Clock>,
    cancel: CancelToken,
    pub(crate) state: AuthenticatorState,
    pub(crate) pin_token: Secret<PIN_TOKEN_SIZE>,
    key_agreement: KeyPair,
    boot_attempts_left: u8,
    attestation_key: Secret<32>,
    up_disabled: bool,
    pub(crate) assertion: AssertionState,
    pub(crate) last_command: Option<u8>,
}

#[cfg(feature = "std")]
impl<S: RecordStore, P: UserPresence> AuthenticatorContext<S, P> {
    /// Boot with the system clock
    pub fn new(config: AuthenticatorConfig, store: S, presence: P) -> Result<Self> {
        Self::with_clock(
            config,
            store,
            presence,
            Box::new(crate::wait::SystemClock::new()),
        )
    }
}

impl<S: RecordStore, P: UserPresence> AuthenticatorContext<S, P> {
    /// Boot: load or initialise the state record, then mint a fresh PIN
    /// token and key-agreement pair.
    pub fn with_clock(
        config: AuthenticatorConfig,
        mut store: S,
        presence: P,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let mut state = match AuthenticatorState::load(&mut store)? {
            Some(state) => {
                log::info!("authenticator state loaded");
                state
            }
            None => {
                log::info!("initialising authenticator state");
                let state = AuthenticatorState::fresh(config.pin_lockout_attempts);
                state.persist(&mut store)?;
                state::write_counter(&mut store, 0)?;
                state
            }
        };

        if state.is_pin_set {
            log::info!("PIN attempts left: {}", state.remaining_tries);
        }
        if state.remaining_tries <= 0 {
            log::error!("device locked");
        }

        let attestation_key = Self::attestation_key_for(&config, &mut state, &mut store)?;
        let boot_attempts_left = config.pin_boot_attempts;

        Ok(Self {
            config,
            store,
            presence,
            clock,
            cancel: CancelToken::new(),
            state,
            pin_token: Secret::random(),
            key_agreement: KeyPair::generate(),
            boot_attempts_left,
            attestation_key,
            up_disabled: false,
            assertion: AssertionState::empty(),
            last_command: None,
        })
    }

    /// Configured key, else the persisted generated key, else a new one
    fn attestation_key_for(
        config: &AuthenticatorConfig,
        state: &mut AuthenticatorState,
        store: &mut S,
    ) -> Result<Secret<32>> {
        if let Some(key) = config.attestation_key {
            if !ecdsa::is_valid_private_key(&key) {
                return Err(StatusCode::InvalidParameter);
            }
            return Ok(Secret::new(key));
        }
        if let Ok(stored) = state.load_key(ATTESTATION_KEY_SLOT) {
            if let Ok(key) = <[u8; 32]>::try_from(stored) {
                if ecdsa::is_valid_private_key(&key) {
                    return Ok(Secret::new(key));
                }
            }
        }
        let (key, _) = ecdsa::generate_keypair();
        let key = Secret::new(key);
        if state.store_key(ATTESTATION_KEY_SLOT, key.as_bytes()).is_ok() {
            state.persist(store)?;
            log::info!("generated attestation key");
        } else {
            log::warn!("no key slot for attestation key, it will not survive a reboot");
        }
        Ok(key)
    }

    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Shut down and hand back the record store
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn presence(&self) -> &P {
        &self.presence
    }

    pub fn presence_mut(&mut self) -> &mut P {
        &mut self.presence
    }

    pub fn state(&self) -> &AuthenticatorState {
        &self.state
    }

    /// Token raised by transports when the host cancels
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_pin_set(&self) -> bool {
        self.state.is_pin_set
    }

    pub fn pin_retries(&self) -> i8 {
        self.state.remaining_tries
    }

    pub fn boot_attempts_left(&self) -> u8 {
        self.boot_attempts_left
    }

    /// Retries exhausted; only reset recovers
    pub fn is_locked(&self) -> bool {
        self.state.remaining_tries <= 0
    }

    /// Per-boot attempts exhausted; a power cycle recovers
    pub fn is_boot_locked(&self) -> bool {
        self.boot_attempts_left == 0
    }

    pub fn resident_key_count(&self) -> u16 {
        self.state.rk_stored
    }

    pub(crate) fn attestation_key(&self) -> &[u8; 32] {
        self.attestation_key.as_bytes()
    }

    /// Replace the key space, master secret included, and persist
    ///
    /// A generated attestation key keeps its slot: the imported bytes for
    /// that slot are overwritten with the key in use.
    pub fn load_external_keys(&mut self, keys: &[u8; state::KEY_SPACE_BYTES]) -> Result<()> {
        self.state.load_external_keys(keys);
        if self.config.attestation_key.is_none()
            && self.state.key_len(ATTESTATION_KEY_SLOT).is_some()
        {
            self.state
                .rewrite_key(ATTESTATION_KEY_SLOT, self.attestation_key.as_bytes())
                .map_err(|err| {
                    log::error!("attestation key slot unusable after key load: {err:?}");
                    StatusCode::Other
                })?;
        }
        self.persist_state()
    }

    pub(crate) fn persist_state(&mut self) -> Result<()> {
        self.state.persist(&mut self.store).map_err(|err| {
            log::error!("state write failed: {err}");
            StatusCode::from(err)
        })
    }

    /// Skip presence tests until cleared; used for `up=false`
    pub(crate) fn set_up_disabled(&mut self, disabled: bool) {
        self.up_disabled = disabled;
    }

    fn keepalive(&mut self, host: &mut dyn HostChannel, status: KeepaliveStatus) {
        self.presence.keepalive(status);
        host.keepalive(status);
    }

    /// Wait for a touch, a cancel or the configured timeout
    pub fn user_presence_test(&mut self, host: &mut dyn HostChannel) -> UpResult {
        let timeout = self.config.user_presence_timeout.as_millis() as u64;
        self.user_presence_test_within(timeout, host)
    }

    /// Presence wait that services `host` between samples
    ///
    /// `UP_NEEDED` goes out when the wait starts and then every
    /// [`KEEPALIVE_INTERVAL_MS`]; `PROCESSING` once it ends. A CANCEL read
    /// from the host raises the cancel token.
    pub(crate) fn user_presence_test_within(
        &mut self,
        timeout: u64,
        host: &mut dyn HostChannel,
    ) -> UpResult {
        if self.up_disabled {
            return UpResult::Disabled;
        }
        self.keepalive(host, KeepaliveStatus::UpNeeded);
        self.presence.prompt();

        let clock = self.clock.as_ref();
        let cancel = &self.cancel;
        let mut next_keepalive = clock.now_ms().saturating_add(KEEPALIVE_INTERVAL_MS);
        let outcome = Wait::new(clock)
            .timeout_ms(timeout)
            .cancel_on(cancel)
            .until(
                &mut (&mut self.presence, &mut *host),
                |(presence, _)| presence.poll_presence(),
                |(presence, host)| {
                    presence.idle();
                    if host.cancel_requested() {
                        log::debug!("CANCEL from the host");
                        cancel.cancel();
                    }
                    let now = clock.now_ms();
                    if now >= next_keepalive {
                        presence.keepalive(KeepaliveStatus::UpNeeded);
                        host.keepalive(KeepaliveStatus::UpNeeded);
                        next_keepalive = now.saturating_add(KEEPALIVE_INTERVAL_MS);
                    }
                },
            );

        self.presence.done();
        self.keepalive(host, KeepaliveStatus::Processing);
        match outcome {
            WaitCondition::Completion => UpResult::Accepted,
            WaitCondition::Cancelled => {
                log::info!("user presence canceled");
                UpResult::Canceled
            }
            WaitCondition::Timeout => {
                log::info!("user presence timed out");
                UpResult::Timeout
            }
        }
    }

    /// Presence test mapped to a command status
    pub(crate) fn require_user_presence(&mut self, host: &mut dyn HostChannel) -> Result<()> {
        self.user_presence_test(host).into_status()
    }

    /// Drop a cancel left over from an earlier request
    pub(crate) fn clear_cancel(&self) {
        self.cancel.take();
    }

    pub(crate) fn advance_counter(&mut self) -> Result<u32> {
        let mut count = state::advance_counter(&mut self.store, 0)?;
        if count == 0 {
            count = state::advance_counter(&mut self.store, 0)?;
        }
        Ok(count)
    }

    pub(crate) fn read_counter(&mut self) -> Result<u32> {
        Ok(state::read_counter(&mut self.store)?)
    }

    pub(crate) fn make_credential_id(&self, rp_id_hash: &[u8; 32], count: u32) -> Result<CredentialId> {
        CredentialId::generate(self.state.transport_key(), rp_id_hash, count)
    }

    pub(crate) fn authenticate_credential(&self, id: &[u8], rp_id_hash: &[u8; 32]) -> Option<CredentialId> {
        CredentialId::from_bytes(id).filter(|cred| cred.authenticate(self.state.transport_key(), rp_id_hash))
    }

    pub(crate) fn credential_private_key(&self, id: &CredentialId) -> Result<[u8; 32]> {
        id.private_key(self.state.transport_key2())
    }

    pub(crate) fn credential_random(&self, id: &CredentialId) -> Result<[u8; 32]> {
        id.cred_random(self.state.transport_key2())
    }

    /// Every readable resident key, in slot order
    pub fn resident_keys(&mut self) -> Vec<ResidentKey> {
        state::load_resident_keys(&mut self.store, self.state.rk_stored)
            .into_iter()
            .map(|(_, rk)| rk)
            .collect()
    }

    /// Overwrite the slot holding the same relying party and user handle,
    /// else append to the table.
    pub(crate) fn save_resident_key(&mut self, rk: &ResidentKey) -> Result<()> {
        let stored = self.state.rk_stored;
        for (index, existing) in state::load_resident_keys(&mut self.store, stored) {
            if existing.matches(rk) {
                log::debug!("replacing resident key {index}");
                state::store_resident_key(&mut self.store, index, rk)?;
                return Ok(());
            }
        }
        if usize::from(stored) >= self.config.max_resident_keys {
            log::warn!("resident key table full");
            return Err(StatusCode::KeyStoreFull);
        }
        state::store_resident_key(&mut self.store, stored, rk)?;
        self.state.rk_stored = stored + 1;
        self.persist_state()
    }

    // PIN protocol one

    /// COSE form of the current key-agreement public key
    pub(crate) fn key_agreement_cose(&self) -> Value {
        let (x, y) = self.key_agreement.public_key_cose();
        cbor::cose_ec2_key(crate::types::CoseAlgorithm::EcdhEsHkdf256 as i64, &x, &y)
    }

    pub(crate) fn reset_key_agreement(&mut self) {
        self.key_agreement = KeyPair::generate();
    }

    /// `SHA-256(ECDH(platform key).x)`
    pub(crate) fn shared_secret(&self, platform_key: &Value) -> Result<[u8; 32]> {
        let (x, y) = cbor::parse_cose_ec2_key(platform_key)?;
        let raw = self.key_agreement.shared_secret_cose(&x, &y)?;
        Ok(pin_protocol::derive_shared_key(&raw))
    }

    /// `HMAC(PIN_TOKEN, clientDataHash)[..16] == pinAuth`
    pub(crate) fn verify_pin_auth(&self, pin_auth: &[u8], client_data_hash: &[u8]) -> bool {
        if pin_auth.len() != pin_protocol::AUTH_TAG_SIZE {
            return false;
        }
        pin_protocol::verify(self.pin_token.as_bytes(), &[client_data_hash], pin_auth).unwrap_or(false)
    }

    /// Compare a decrypted 16-byte PIN hash with the stored one
    pub(crate) fn pin_hash_matches(&self, pin_hash: &[u8]) -> bool {
        let salted = Sha256::new()
            .chain_update(pin_hash)
            .chain_update(self.state.pin_salt.as_bytes())
            .finalize();
        self.state.pin_code_hash.ct_eq_prefix(&salted[..16])
    }

    /// Store `SHA-256(SHA-256(pin)[..16] || salt)` and mark the PIN set
    pub(crate) fn update_pin(&mut self, pin: &[u8]) -> Result<()> {
        let mut intermediate: [u8; 32] = Sha256::digest(pin).into();
        let hash: [u8; 32] = Sha256::new()
            .chain_update(&intermediate[..16])
            .chain_update(self.state.pin_salt.as_bytes())
            .finalize()
            .into();
        zeroize::Zeroize::zeroize(&mut intermediate);
        self.state.pin_code_hash = Secret::new(hash);
        self.state.is_pin_set = true;
        self.persist_state()?;
        log::info!("new PIN set");
        Ok(())
    }

    pub(crate) fn reset_pin_attempts(&mut self) -> Result<()> {
        self.state.remaining_tries = self.config.pin_lockout_attempts;
        self.boot_attempts_left = self.config.pin_boot_attempts;
        self.persist_state()
    }

    /// Burn one attempt from both counters; lock at zero retries
    pub(crate) fn decrement_pin_attempts(&mut self) -> Result<()> {
        self.boot_attempts_left = self.boot_attempts_left.saturating_sub(1);
        if self.is_locked() {
            log::warn!("device locked");
            return Err(StatusCode::PinBlocked);
        }
        self.state.remaining_tries -= 1;
        self.persist_state()?;
        log::warn!("PIN attempts left: {}", self.state.remaining_tries);
        if self.is_locked() {
            self.lock_device_permanently()?;
        }
        Ok(())
    }

    /// Zero the PIN token and stored PIN hash; only reset recovers
    pub(crate) fn lock_device_permanently(&mut self) -> Result<()> {
        self.pin_token.clear();
        self.state.pin_code_hash.clear();
        log::error!("device locked permanently");
        self.persist_state()
    }

    /// Factory reset
    pub fn reset(&mut self) -> Result<()> {
        let mut fresh = AuthenticatorState::fresh(self.config.pin_lockout_attempts);
        if self.config.attestation_key.is_none() {
            fresh
                .store_key(ATTESTATION_KEY_SLOT, self.attestation_key.as_bytes())
                .map_err(|_| StatusCode::KeyStoreFull)?;
        }
        self.state = fresh;
        self.persist_state()?;
        state::reset_resident_keys(&mut self.store).map_err(|err| {
            log::error!("resident key wipe failed: {err}");
            StatusCode::from(err)
        })?;
        self.pin_token = Secret::random();
        self.assertion.clear();
        self.reset_key_agreement();
        self.boot_attempts_left = self.config.pin_boot_attempts;
        log::info!("authenticator reset");
        Ok(())
    }
}
