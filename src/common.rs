use std::collections::HashSet;

use coarsetime::{Duration, UnixTimeStamp};
use serde_json::{Map, Value};

use crate::algorithms::Algorithm;

pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Claims and header fields added by a signer
#[derive(Clone, Debug, Default)]
pub struct SignerOptions {
    /// Write the injected claims back into the caller's payload (`Signer::sign_mut`)
    /// instead of working on a copy
    pub mutate_payload: bool,

    /// Do not add an `iat` claim
    pub no_timestamp: bool,

    /// Use this time instead of the system clock
    pub clock_timestamp: Option<UnixTimeStamp>,

    /// Add an `exp` claim, relative to `iat`
    pub expires_in: Option<Duration>,

    /// Add an `nbf` claim, relative to `iat`
    pub not_before: Option<Duration>,

    pub jwt_id: Option<String>,

    /// One audience is encoded as a string, several as an array
    pub audience: Vec<String>,

    pub issuer: Option<String>,

    pub subject: Option<String>,

    pub nonce: Option<String>,

    /// Key identifier added to the header
    pub key_id: Option<String>,

    /// Additional header fields. `alg` cannot be overridden.
    pub header: Map<String, Value>,

    /// Header `typ`, `JWT` if not set
    pub signature_type: Option<String>,
}

/// Additional features to enable during verification
#[derive(Clone, Debug)]
pub struct VerifierOptions {
    /// Algorithms accepted in the token header.
    ///
    /// By default, only the algorithm the verifier was created with is accepted.
    /// `none` is only accepted if it is explicitly listed here, or if it is the
    /// verifier's own algorithm.
    pub algorithms: Option<HashSet<Algorithm>>,

    /// Maximum number of entries in the verification cache
    pub cache_size: usize,

    /// Keep successful verifications for that long. The cache is disabled if not set.
    pub cache_ttl: Option<Duration>,

    /// Keep rejections for that long. Rejections are not cached if not set.
    pub error_cache_ttl: Option<Duration>,

    /// Require the issuer to be present in the set
    pub allowed_issuers: Option<HashSet<String>>,

    /// Require at least one of the audiences to be present in the set
    pub allowed_audiences: Option<HashSet<String>>,

    /// Require the subject to be present in the set
    pub allowed_subjects: Option<HashSet<String>>,

    /// Require the JWT identifier to be present in the set
    pub allowed_jwt_ids: Option<HashSet<String>>,

    /// Require the nonce to be present in the set
    pub allowed_nonces: Option<HashSet<String>>,

    /// Claims that must be present, whatever their value
    pub required_claims: HashSet<String>,

    /// Accept expired tokens
    pub ignore_expiration: bool,

    /// Accept tokens that are not valid yet
    pub ignore_not_before: bool,

    /// Reject tokens issued more than `max_age` ago
    pub max_age: Option<Duration>,

    /// Use this time instead of the system clock
    pub clock_timestamp: Option<UnixTimeStamp>,

    /// Time tolerance for validating `exp`, `nbf` and `max_age`
    pub clock_tolerance: Option<Duration>,

    /// Require the header `typ` to match, case-insensitively
    pub check_type: Option<String>,

    /// Require a specific key identifier to be present
    pub required_key_id: Option<String>,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        VerifierOptions {
            algorithms: None,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_ttl: None,
            error_cache_ttl: None,
            allowed_issuers: None,
            allowed_audiences: None,
            allowed_subjects: None,
            allowed_jwt_ids: None,
            allowed_nonces: None,
            required_claims: HashSet::new(),
            ignore_expiration: false,
            ignore_not_before: false,
            max_age: None,
            clock_timestamp: None,
            clock_tolerance: None,
            check_type: None,
            required_key_id: None,
        }
    }
}
