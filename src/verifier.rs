use std::collections::HashSet;
use std::sync::Arc;

use coarsetime::Clock;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::algorithms::Algorithm;
use crate::cache::VerificationCache;
use crate::claims;
use crate::common::VerifierOptions;
use crate::error::*;
use crate::jwt_header::Header;
use crate::keys::{KeyMaterial, SecretResolver, SecretSource};
use crate::pool::WorkerPool;
use crate::token::{Payload, Token, TokenParts};

/// A token whose signature and claims have been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub header: Header,
    pub payload: Payload,
    pub signature: Vec<u8>,
}

/// Checks tokens against a key source and a set of validation options.
///
/// Clones share the verification cache.
#[derive(Clone)]
pub struct Verifier {
    algorithm: Algorithm,
    allowed_algorithms: HashSet<Algorithm>,
    resolver: SecretResolver,
    options: VerifierOptions,
    cache: Option<Arc<VerificationCache>>,
    pool: Option<WorkerPool>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("algorithm", &self.algorithm)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .field("resolver", &self.resolver)
            .field("options", &self.options)
            .field("cache", &self.cache.is_some())
            .field("pool", &self.pool)
            .finish()
    }
}

impl Verifier {
    pub fn new(algorithm: Algorithm, secret: impl Into<SecretSource>, options: VerifierOptions) -> Self {
        Self::with_resolver(algorithm, SecretResolver::new(secret), options)
    }

    pub fn with_resolver(algorithm: Algorithm, resolver: SecretResolver, options: VerifierOptions) -> Self {
        let allowed_algorithms = options
            .algorithms
            .clone()
            .unwrap_or_else(|| [algorithm].iter().copied().collect());
        let caching = options.cache_ttl.is_some() || options.error_cache_ttl.is_some();
        let cache = if caching && options.cache_size > 0 {
            Some(Arc::new(VerificationCache::new(options.cache_size)))
        } else {
            None
        };
        Verifier {
            algorithm,
            allowed_algorithms,
            resolver,
            options,
            cache,
            pool: None,
        }
    }

    /// Check signatures on `pool` when it is running.
    pub fn with_pool(mut self, pool: &WorkerPool) -> Self {
        self.pool = Some(pool.clone());
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn options(&self) -> &VerifierOptions {
        &self.options
    }

    /// Verify a token and return its claims.
    pub async fn verify(&self, token: &str) -> Result<Payload, Error> {
        Ok(self.verify_complete(token).await?.payload)
    }

    /// Verify a token and deserialize its claims.
    pub async fn verify_as<T: DeserializeOwned>(&self, token: &str) -> Result<T, Error> {
        let payload = self.verify(token).await?;
        serde_json::from_value(payload.into()).map_err(wrap(JWTError::MalformedPayload))
    }

    /// Verify a token and return its header, claims and signature.
    pub async fn verify_complete(&self, token: &str) -> Result<VerifiedToken, Error> {
        let parts = Token::decode(token)?;
        let algorithm = self.accepted_algorithm(parts.header.algorithm())?;
        let key = if algorithm == Algorithm::None {
            KeyMaterial::from_bytes(b"")
        } else {
            self.resolver.resolve(Some(&parts.header)).await?
        };
        let now = self
            .options
            .clock_timestamp
            .unwrap_or_else(Clock::now_since_epoch)
            .as_secs();

        let cache = match &self.cache {
            None => return self.check(parts, algorithm, &key, now).await,
            Some(cache) => cache,
        };
        let fingerprint = cache.fingerprint(token, &key);
        if let Some(cached) = cache.get(&fingerprint, now) {
            trace!("verification cache hit");
            return cached;
        }
        let active_from = claims::active_from(&parts.payload, &self.options);
        let verified = self.check(parts, algorithm, &key, now).await;
        match &verified {
            Ok(verified) => {
                if let Some(ttl) = self.options.cache_ttl {
                    let mut expires_at = now.saturating_add(ttl.as_secs());
                    if let Some(valid_until) = claims::valid_until(&verified.payload, &self.options) {
                        expires_at = expires_at.min(valid_until);
                    }
                    cache.insert_valid(fingerprint, verified.clone(), expires_at);
                }
            }
            Err(err) => {
                if let Some(ttl) = self.options.error_cache_ttl {
                    let mut expires_at = now.saturating_add(ttl.as_secs());
                    // A token that is not active yet will be once its `nbf` is reached.
                    if error_kind(err) == Some(JWTError::TokenNotActive) {
                        if let Some(active_from) = active_from {
                            expires_at = expires_at.min(active_from);
                        }
                    }
                    if !is_transient(err) {
                        cache.insert_rejected(fingerprint, err, expires_at);
                    }
                }
            }
        }
        verified
    }

    fn accepted_algorithm(&self, name: &str) -> Result<Algorithm, Error> {
        let algorithm: Algorithm = name.parse()?;
        ensure!(
            self.allowed_algorithms.contains(&algorithm),
            JWTError::InvalidAlgorithm
        );
        Ok(algorithm)
    }

    async fn check(
        &self,
        parts: TokenParts,
        algorithm: Algorithm,
        key: &KeyMaterial,
        now: u64,
    ) -> Result<VerifiedToken, Error> {
        let verified = self
            .check_signature(algorithm, parts.signing_input.as_bytes(), &parts.signature, key)
            .await
            .map_err(signature_verification_error)?;
        ensure!(verified, JWTError::SignatureVerificationFailed);

        if let Some(expected) = &self.options.check_type {
            let matches = parts
                .header
                .signature_type()
                .map_or(false, |typ| typ.eq_ignore_ascii_case(expected));
            ensure!(matches, JWTError::InvalidTokenType);
        }
        if let Some(required_key_id) = &self.options.required_key_id {
            ensure!(
                parts.header.key_id() == Some(required_key_id.as_str()),
                JWTError::ClaimMismatch
            );
        }
        claims::validate(&parts.payload, &self.options, now)?;

        Ok(VerifiedToken {
            header: parts.header,
            payload: parts.payload,
            signature: parts.signature,
        })
    }

    async fn check_signature(
        &self,
        algorithm: Algorithm,
        signing_input: &[u8],
        signature: &[u8],
        key: &KeyMaterial,
    ) -> Result<bool, Error> {
        match &self.pool {
            Some(pool) => pool.verify(algorithm, signing_input, signature, key).await,
            None => algorithm.verify(signing_input, signature, key),
        }
    }
}

/// Key and algorithm problems keep their kind, anything else becomes
/// `SignatureVerificationError`.
fn signature_verification_error(err: Error) -> Error {
    match error_kind(&err) {
        Some(JWTError::InvalidKeyMaterial)
        | Some(JWTError::WeakKey)
        | Some(JWTError::InvalidAlgorithm)
        | Some(JWTError::SignatureVerificationError)
        | Some(JWTError::WorkerOperationFailed) => err,
        _ => err.context(JWTError::SignatureVerificationError),
    }
}

/// Rejections that may not happen again with the same token.
fn is_transient(err: &Error) -> bool {
    matches!(
        error_kind(err),
        Some(JWTError::WorkerOperationFailed)
            | Some(JWTError::KeyFetchError)
            | Some(JWTError::KeyFetchTimeout)
    )
}
