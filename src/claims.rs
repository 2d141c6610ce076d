use std::collections::HashSet;

use serde_json::Value;

use crate::common::{SignerOptions, VerifierOptions};
use crate::error::*;
use crate::token::Payload;

pub const ISSUED_AT: &str = "iat";
pub const EXPIRES_AT: &str = "exp";
pub const NOT_BEFORE: &str = "nbf";
pub const ISSUER: &str = "iss";
pub const SUBJECT: &str = "sub";
pub const AUDIENCE: &str = "aud";
pub const JWT_ID: &str = "jti";
pub const NONCE: &str = "nonce";

/// Read a NumericDate claim. Time claims must be non-negative integers.
pub(crate) fn timestamp(payload: &Payload, name: &str) -> Result<Option<u64>, Error> {
    match payload.get(name) {
        None => Ok(None),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(ts) => Ok(Some(ts)),
            None => bail!(JWTError::InvalidClaimValue),
        },
        Some(_) => bail!(JWTError::InvalidClaimValue),
    }
}

fn string_claim<'a>(payload: &'a Payload, name: &str) -> Result<Option<&'a str>, Error> {
    match payload.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => bail!(JWTError::InvalidClaimValue),
    }
}

/// `aud` is either a single string or an array of strings.
fn audiences(payload: &Payload) -> Result<Option<Vec<&str>>, Error> {
    match payload.get(AUDIENCE) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(vec![s.as_str()])),
        Some(Value::Array(values)) => {
            let mut audiences = Vec::with_capacity(values.len());
            for value in values {
                match value {
                    Value::String(s) => audiences.push(s.as_str()),
                    _ => bail!(JWTError::InvalidClaimValue),
                }
            }
            Ok(Some(audiences))
        }
        Some(_) => bail!(JWTError::InvalidClaimValue),
    }
}

fn insert_absent(payload: &mut Payload, name: &str, value: impl Into<Value>) {
    if !payload.contains_key(name) {
        payload.insert(name.to_string(), value.into());
    }
}

/// Add the claims configured on a signer. A claim already present in the
/// payload is never replaced.
pub(crate) fn inject(payload: &mut Payload, options: &SignerOptions, now: u64) -> Result<(), Error> {
    let issued_at = timestamp(payload, ISSUED_AT).map_err(wrap(JWTError::MalformedPayload))?;
    let base = issued_at.unwrap_or(now);
    if !options.no_timestamp {
        insert_absent(payload, ISSUED_AT, base);
    }
    if let Some(expires_in) = options.expires_in {
        insert_absent(payload, EXPIRES_AT, offset(base, expires_in.as_secs())?);
    }
    if let Some(not_before) = options.not_before {
        insert_absent(payload, NOT_BEFORE, offset(base, not_before.as_secs())?);
    }
    if let Some(jwt_id) = &options.jwt_id {
        insert_absent(payload, JWT_ID, jwt_id.as_str());
    }
    if let Some(issuer) = &options.issuer {
        insert_absent(payload, ISSUER, issuer.as_str());
    }
    if let Some(subject) = &options.subject {
        insert_absent(payload, SUBJECT, subject.as_str());
    }
    if let Some(nonce) = &options.nonce {
        insert_absent(payload, NONCE, nonce.as_str());
    }
    match options.audience.as_slice() {
        [] => {}
        [audience] => insert_absent(payload, AUDIENCE, audience.as_str()),
        audiences => insert_absent(payload, AUDIENCE, audiences.to_vec()),
    }
    Ok(())
}

fn offset(base: u64, secs: u64) -> Result<u64, Error> {
    base.checked_add(secs)
        .ok_or_else(|| anyhow!(JWTError::MalformedPayload))
}

fn check_allowed(allowed: &Option<HashSet<String>>, value: Option<&str>) -> Result<(), Error> {
    if let Some(allowed) = allowed {
        match value {
            Some(value) if allowed.contains(value) => {}
            _ => bail!(JWTError::ClaimMismatch),
        }
    }
    Ok(())
}

/// Check the registered claims of a payload whose signature has been verified.
pub(crate) fn validate(payload: &Payload, options: &VerifierOptions, now: u64) -> Result<(), Error> {
    let tolerance = options.clock_tolerance.map(|t| t.as_secs()).unwrap_or(0);

    for name in &options.required_claims {
        ensure!(payload.contains_key(name), JWTError::MissingRequiredClaim);
    }

    if !options.ignore_expiration {
        if let Some(expires_at) = timestamp(payload, EXPIRES_AT)? {
            ensure!(
                now <= expires_at.saturating_add(tolerance),
                JWTError::TokenExpired
            );
        }
    }
    if !options.ignore_not_before {
        if let Some(not_before) = timestamp(payload, NOT_BEFORE)? {
            ensure!(
                now.saturating_add(tolerance) >= not_before,
                JWTError::TokenNotActive
            );
        }
    }
    let issued_at = timestamp(payload, ISSUED_AT)?;
    if let Some(max_age) = options.max_age {
        let issued_at = match issued_at {
            Some(issued_at) => issued_at,
            None => bail!(JWTError::MissingRequiredClaim),
        };
        ensure!(
            now.saturating_sub(issued_at) <= max_age.as_secs().saturating_add(tolerance),
            JWTError::TokenTooOld
        );
    }

    check_allowed(&options.allowed_issuers, string_claim(payload, ISSUER)?)?;
    check_allowed(&options.allowed_subjects, string_claim(payload, SUBJECT)?)?;
    check_allowed(&options.allowed_jwt_ids, string_claim(payload, JWT_ID)?)?;
    check_allowed(&options.allowed_nonces, string_claim(payload, NONCE)?)?;
    if let Some(allowed) = &options.allowed_audiences {
        let matched = audiences(payload)?
            .map(|audiences| audiences.iter().any(|aud| allowed.contains(*aud)))
            .unwrap_or(false);
        ensure!(matched, JWTError::ClaimMismatch);
    }
    Ok(())
}

/// First time at which a payload that validated now may stop validating.
/// Bounds how long a verified token may be cached.
pub(crate) fn valid_until(payload: &Payload, options: &VerifierOptions) -> Option<u64> {
    let tolerance = options.clock_tolerance.map(|t| t.as_secs()).unwrap_or(0);
    let expires_at = timestamp(payload, EXPIRES_AT).ok().flatten();
    let too_old_at = match (options.max_age, timestamp(payload, ISSUED_AT).ok().flatten()) {
        (Some(max_age), Some(issued_at)) => Some(
            issued_at
                .saturating_add(max_age.as_secs())
                .saturating_add(tolerance)
                .saturating_add(1),
        ),
        _ => None,
    };
    match (expires_at, too_old_at) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// First time at which a payload rejected as not active yet may be accepted.
pub(crate) fn active_from(payload: &Payload, options: &VerifierOptions) -> Option<u64> {
    let tolerance = options.clock_tolerance.map(|t| t.as_secs()).unwrap_or(0);
    timestamp(payload, NOT_BEFORE)
        .ok()
        .flatten()
        .map(|not_before| not_before.saturating_sub(tolerance))
}
