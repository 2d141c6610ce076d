use super::Algorithm;
use crate::error::*;
use crate::keys::KeyMaterial;

// Every curve exposes the same RustCrypto API, only the crate and the digest differ.
macro_rules! ecdsa_curve {
    ($name:ident, $curve:ident, $hash:ty) => {
        mod $name {
            use std::convert::TryFrom;

            use $curve::ecdsa::{
                self, signature::DigestVerifier as _, signature::RandomizedDigestSigner as _,
            };
            use $curve::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};

            use crate::error::*;
            use crate::keys::KeyMaterial;

            fn signing_key(key: &KeyMaterial) -> Result<ecdsa::SigningKey, Error> {
                let raw = key.unlocked()?;
                let parsed = if key.passphrase().is_some() || key.is_pem() {
                    let pem = String::from_utf8_lossy(&raw);
                    let pem = pem.trim();
                    ecdsa::SigningKey::from_pkcs8_pem(pem).ok().or_else(|| {
                        $curve::SecretKey::from_sec1_pem(pem)
                            .ok()
                            .map(ecdsa::SigningKey::from)
                    })
                } else {
                    ecdsa::SigningKey::from_pkcs8_der(&raw)
                        .ok()
                        .or_else(|| ecdsa::SigningKey::from_slice(&raw).ok())
                };
                parsed.ok_or_else(|| anyhow!(JWTError::InvalidKeyMaterial))
            }

            fn verifying_key(key: &KeyMaterial) -> Result<ecdsa::VerifyingKey, Error> {
                let parsed = if key.is_pem() {
                    let pem = String::from_utf8_lossy(key.as_bytes());
                    ecdsa::VerifyingKey::from_public_key_pem(pem.trim()).ok()
                } else {
                    ecdsa::VerifyingKey::from_public_key_der(key.as_bytes())
                        .ok()
                        .or_else(|| ecdsa::VerifyingKey::from_sec1_bytes(key.as_bytes()).ok())
                };
                match parsed {
                    Some(pk) => Ok(pk),
                    None => Ok(*signing_key(key)?.verifying_key()),
                }
            }

            pub(super) fn sign(authenticated: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, Error> {
                let sk = signing_key(key)?;
                let mut digest = <$hash>::new();
                digest.update(authenticated);
                let mut rng = rand::thread_rng();
                let signature: ecdsa::Signature = sk
                    .try_sign_digest_with_rng(&mut rng, digest)
                    .map_err(wrap(JWTError::SignatureCreationFailed))?;
                Ok(signature.to_bytes().to_vec())
            }

            pub(super) fn verify(
                authenticated: &[u8],
                signature: &[u8],
                key: &KeyMaterial,
            ) -> Result<bool, Error> {
                let pk = verifying_key(key)?;
                let signature = match ecdsa::Signature::try_from(signature) {
                    Ok(signature) => signature,
                    Err(_) => return Ok(false),
                };
                let mut digest = <$hash>::new();
                digest.update(authenticated);
                Ok(pk.verify_digest(digest, &signature).is_ok())
            }

            pub(super) fn der_to_fixed(der: &[u8]) -> Result<Vec<u8>, Error> {
                let signature =
                    ecdsa::Signature::from_der(der).map_err(wrap(JWTError::MalformedToken))?;
                Ok(signature.to_bytes().to_vec())
            }

            pub(super) fn fixed_to_der(fixed: &[u8]) -> Result<Vec<u8>, Error> {
                let signature =
                    ecdsa::Signature::try_from(fixed).map_err(wrap(JWTError::MalformedToken))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    };
}

ecdsa_curve!(p256_sha256, p256, hmac_sha256::Hash);
ecdsa_curve!(k256_sha256, k256, hmac_sha256::Hash);
ecdsa_curve!(p384_sha384, p384, hmac_sha512::sha384::Hash);

/// Size of a fixed-width `R || S` signature.
pub(crate) fn signature_length(alg: Algorithm) -> Result<usize, Error> {
    match alg {
        Algorithm::ES256 | Algorithm::ES256K => Ok(64),
        Algorithm::ES384 => Ok(96),
        _ => bail!(JWTError::InvalidAlgorithm),
    }
}

pub(super) fn sign(alg: Algorithm, authenticated: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, Error> {
    match alg {
        Algorithm::ES256 => p256_sha256::sign(authenticated, key),
        Algorithm::ES256K => k256_sha256::sign(authenticated, key),
        Algorithm::ES384 => p384_sha384::sign(authenticated, key),
        _ => bail!(JWTError::InvalidAlgorithm),
    }
}

pub(super) fn verify(
    alg: Algorithm,
    authenticated: &[u8],
    signature: &[u8],
    key: &KeyMaterial,
) -> Result<bool, Error> {
    if signature.len() != signature_length(alg)? {
        return Ok(false);
    }
    match alg {
        Algorithm::ES256 => p256_sha256::verify(authenticated, signature, key),
        Algorithm::ES256K => k256_sha256::verify(authenticated, signature, key),
        Algorithm::ES384 => p384_sha384::verify(authenticated, signature, key),
        _ => bail!(JWTError::InvalidAlgorithm),
    }
}

/// Convert an ASN.1/DER encoded ECDSA signature into the fixed-width form
/// used in tokens.
pub fn ecdsa_der_to_fixed(alg: Algorithm, der: &[u8]) -> Result<Vec<u8>, Error> {
    match alg {
        Algorithm::ES256 => p256_sha256::der_to_fixed(der),
        Algorithm::ES256K => k256_sha256::der_to_fixed(der),
        Algorithm::ES384 => p384_sha384::der_to_fixed(der),
        _ => bail!(JWTError::InvalidAlgorithm),
    }
}

/// Convert a fixed-width `R || S` signature into ASN.1/DER.
pub fn ecdsa_fixed_to_der(alg: Algorithm, fixed: &[u8]) -> Result<Vec<u8>, Error> {
    ensure!(
        fixed.len() == signature_length(alg)?,
        JWTError::MalformedToken
    );
    match alg {
        Algorithm::ES256 => p256_sha256::fixed_to_der(fixed),
        Algorithm::ES256K => k256_sha256::fixed_to_der(fixed),
        Algorithm::ES384 => p384_sha384::fixed_to_der(fixed),
        _ => bail!(JWTError::InvalidAlgorithm),
    }
}
