use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use rand::RngCore;

use crate::error::*;
use crate::keys::KeyMaterial;
use crate::pool::ErrorRecord;
use crate::verifier::VerifiedToken;

pub(crate) type Fingerprint = [u8; 32];

enum Cached {
    Valid(VerifiedToken),
    Rejected(ErrorRecord),
}

struct Entry {
    value: Cached,
    expires_at: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<Fingerprint, Entry>,
    insertion_order: VecDeque<Fingerprint>,
}

/// Verification results of a single verifier, bounded in size and time.
pub(crate) struct VerificationCache {
    fingerprint_key: [u8; 32],
    capacity: usize,
    entries: Mutex<Entries>,
}

impl VerificationCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut fingerprint_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut fingerprint_key);
        VerificationCache {
            fingerprint_key,
            capacity,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Identifies a (token, key) pair. The hash is keyed with a per-cache secret
    /// so that fingerprints reveal nothing about the key.
    pub(crate) fn fingerprint(&self, token: &str, key: &KeyMaterial) -> Fingerprint {
        let mut state = blake2b_simd::Params::new()
            .hash_length(32)
            .key(&self.fingerprint_key)
            .to_state();
        for part in [
            token.as_bytes(),
            key.as_bytes(),
            key.passphrase().unwrap_or_default(),
        ] {
            state.update(&(part.len() as u64).to_le_bytes());
            state.update(part);
        }
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(state.finalize().as_bytes());
        fingerprint
    }

    /// A previous result for this fingerprint, if it hasn't expired at `now`.
    pub(crate) fn get(&self, fingerprint: &Fingerprint, now: u64) -> Option<Result<VerifiedToken, Error>> {
        let mut entries = self.entries.lock();
        let entry = entries.map.get(fingerprint)?;
        if now >= entry.expires_at {
            entries.map.remove(fingerprint);
            return None;
        }
        Some(match &entry.value {
            Cached::Valid(verified) => Ok(verified.clone()),
            Cached::Rejected(record) => Err(record.clone().into_error()),
        })
    }

    pub(crate) fn insert_valid(&self, fingerprint: Fingerprint, verified: VerifiedToken, expires_at: u64) {
        self.insert(fingerprint, Cached::Valid(verified), expires_at)
    }

    pub(crate) fn insert_rejected(&self, fingerprint: Fingerprint, err: &Error, expires_at: u64) {
        self.insert(fingerprint, Cached::Rejected(ErrorRecord::from_error(err)), expires_at)
    }

    fn insert(&self, fingerprint: Fingerprint, value: Cached, expires_at: u64) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        let entries = &mut *entries;
        if !entries.map.contains_key(&fingerprint) {
            while entries.map.len() >= self.capacity {
                match entries.insertion_order.pop_front() {
                    Some(oldest) => {
                        entries.map.remove(&oldest);
                    }
                    None => break,
                }
            }
            entries.insertion_order.push_back(fingerprint);
        }
        entries.map.insert(fingerprint, Entry { value, expires_at });
        // Expired entries removed by `get` leave stale positions behind.
        if entries.insertion_order.len() > self.capacity * 2 {
            let map = &entries.map;
            entries.insertion_order.retain(|fp| map.contains_key(fp));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().map.len()
    }
}
