//! Signed JSON Web Tokens, with signature operations optionally offloaded to a
//! pool of worker threads.
//!
//! A [`Signer`](signer::Signer) injects the standard time and identity claims
//! and signs; a [`Verifier`](verifier::Verifier) checks the signature, the
//! header and the claims, and can remember results. Both run their
//! cryptography in-process unless they are given a running
//! [`WorkerPool`](pool::WorkerPool).

#![forbid(unsafe_code)]

pub mod algorithms;
pub mod claims;
pub mod common;
pub mod error;
pub mod jwt_header;
pub mod keys;
pub mod pool;
pub mod signer;
pub mod token;
pub mod verifier;

mod cache;

pub use coarsetime;
pub use serde;

pub mod prelude {
    pub use std::collections::HashSet;

    pub use crate::algorithms::{ecdsa_der_to_fixed, ecdsa_fixed_to_der, Algorithm, AlgorithmFamily};
    pub use crate::claims::*;
    pub use crate::common::*;
    pub use crate::error::{error_kind, Error, JWTError};
    pub use crate::jwt_header::Header;
    pub use crate::keys::*;
    pub use crate::pool::{ErrorRecord, PoolOptions, PoolState, PoolStats, WorkerPool};
    pub use crate::signer::Signer;
    pub use crate::token::*;
    pub use crate::verifier::*;
    pub use coarsetime::{self, Clock, Duration, UnixTimeStamp};
    pub use serde::{Deserialize, Serialize};
}
