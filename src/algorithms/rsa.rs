#[cfg(any(
    all(feature = "pure-rust", not(feature = "optimal")),
    target_arch = "wasm32",
    target_arch = "wasm64"
))]
use superboring as boring;

use boring::hash::MessageDigest;
use boring::pkey::{PKey, Private, Public};
use boring::rsa::{Padding, Rsa};
use boring::sign::{Signer, Verifier};

use super::{Algorithm, AlgorithmFamily};
use crate::error::*;
use crate::keys::KeyMaterial;

fn hash(alg: Algorithm) -> Result<MessageDigest, Error> {
    Ok(match alg {
        Algorithm::RS256 | Algorithm::PS256 => MessageDigest::sha256(),
        Algorithm::RS384 | Algorithm::PS384 => MessageDigest::sha384(),
        Algorithm::RS512 | Algorithm::PS512 => MessageDigest::sha512(),
        _ => bail!(JWTError::InvalidAlgorithm),
    })
}

fn padding_scheme(alg: Algorithm) -> Padding {
    if alg.family() == AlgorithmFamily::RsaPss {
        Padding::PKCS1_PSS
    } else {
        Padding::PKCS1
    }
}

fn key_pair(key: &KeyMaterial) -> Result<Rsa<Private>, Error> {
    let raw = key.unlocked()?;
    let rsa_sk = if key.passphrase().is_some() || key.is_pem() {
        let pem = String::from_utf8_lossy(&raw);
        Rsa::<Private>::private_key_from_pem(pem.trim().as_bytes())
    } else {
        Rsa::<Private>::private_key_from_der(&raw)
    }
    .map_err(wrap(JWTError::InvalidKeyMaterial))?;
    if !(rsa_sk.check_key().map_err(wrap(JWTError::InvalidKeyMaterial))?) {
        bail!(JWTError::InvalidKeyMaterial);
    }
    Ok(rsa_sk)
}

/// Public key for verification. A private key is accepted too; its public
/// half is used.
fn public_key(key: &KeyMaterial) -> Result<Rsa<Public>, Error> {
    let parsed = if key.is_pem() {
        let pem = String::from_utf8_lossy(key.as_bytes());
        let pem = pem.trim().as_bytes();
        Rsa::<Public>::public_key_from_pem(pem)
            .or_else(|_| Rsa::<Public>::public_key_from_pem_pkcs1(pem))
    } else {
        Rsa::<Public>::public_key_from_der(key.as_bytes())
            .or_else(|_| Rsa::<Public>::public_key_from_der_pkcs1(key.as_bytes()))
    };
    match parsed {
        Ok(rsa_pk) => Ok(rsa_pk),
        Err(_) => {
            let rsa_sk = key_pair(key)?;
            let n = rsa_sk.n().to_owned().map_err(wrap(JWTError::InvalidKeyMaterial))?;
            let e = rsa_sk.e().to_owned().map_err(wrap(JWTError::InvalidKeyMaterial))?;
            Rsa::<Public>::from_public_components(n, e).map_err(wrap(JWTError::InvalidKeyMaterial))
        }
    }
}

pub(super) fn sign(alg: Algorithm, authenticated: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, Error> {
    let digest = hash(alg)?;
    let pkey = PKey::from_rsa(key_pair(key)?).map_err(wrap(JWTError::InvalidKeyMaterial))?;
    let mut signer = Signer::new(digest, &pkey).map_err(wrap(JWTError::SignatureCreationFailed))?;
    signer
        .set_rsa_padding(padding_scheme(alg))
        .map_err(wrap(JWTError::SignatureCreationFailed))?;
    signer
        .update(authenticated)
        .map_err(wrap(JWTError::SignatureCreationFailed))?;
    let signature = signer
        .sign_to_vec()
        .map_err(wrap(JWTError::SignatureCreationFailed))?;
    Ok(signature)
}

pub(super) fn verify(
    alg: Algorithm,
    authenticated: &[u8],
    signature: &[u8],
    key: &KeyMaterial,
) -> Result<bool, Error> {
    let digest = hash(alg)?;
    let pkey = PKey::from_rsa(public_key(key)?).map_err(wrap(JWTError::InvalidKeyMaterial))?;
    let mut verifier =
        Verifier::new(digest, &pkey).map_err(wrap(JWTError::SignatureVerificationError))?;
    verifier
        .set_rsa_padding(padding_scheme(alg))
        .map_err(wrap(JWTError::SignatureVerificationError))?;
    verifier
        .update(authenticated)
        .map_err(wrap(JWTError::SignatureVerificationError))?;
    // Malformed signatures (wrong length, out of range) are reported as a mismatch.
    Ok(verifier.verify(signature).unwrap_or(false))
}
