use ed25519_compact::{KeyPair, Noise, PublicKey, SecretKey, Signature};

use crate::error::*;
use crate::keys::KeyMaterial;

fn key_pair(key: &KeyMaterial) -> Result<KeyPair, Error> {
    let raw = key.unlocked()?;
    let kp = if key.passphrase().is_some() || key.is_pem() {
        let pem = String::from_utf8_lossy(&raw);
        let pem = pem.trim();
        match KeyPair::from_pem(pem) {
            Ok(kp) => kp,
            Err(_) => KeyPair::from_seed(
                SecretKey::from_pem(pem)
                    .map_err(wrap(JWTError::InvalidKeyMaterial))?
                    .seed(),
            ),
        }
    } else {
        match KeyPair::from_der(&raw) {
            Ok(kp) => kp,
            Err(_) => KeyPair::from_slice(&raw).map_err(wrap(JWTError::InvalidKeyMaterial))?,
        }
    };
    Ok(kp)
}

fn public_key(key: &KeyMaterial) -> Result<PublicKey, Error> {
    let parsed = if key.is_pem() {
        PublicKey::from_pem(String::from_utf8_lossy(key.as_bytes()).trim())
    } else {
        PublicKey::from_der(key.as_bytes()).or_else(|_| PublicKey::from_slice(key.as_bytes()))
    };
    match parsed {
        Ok(pk) => Ok(pk),
        Err(_) => Ok(key_pair(key)?.pk),
    }
}

pub(super) fn sign(authenticated: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, Error> {
    let kp = key_pair(key)?;
    let noise = Some(Noise::generate());
    Ok(kp.sk.sign(authenticated, noise).to_vec())
}

pub(super) fn verify(authenticated: &[u8], signature: &[u8], key: &KeyMaterial) -> Result<bool, Error> {
    let pk = public_key(key)?;
    let signature = match Signature::from_slice(signature) {
        Ok(signature) => signature,
        Err(_) => return Ok(false),
    };
    Ok(pk.verify(authenticated, &signature).is_ok())
}
