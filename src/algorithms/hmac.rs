use hmac_sha512::sha384 as hmac_sha384;

use super::Algorithm;
use crate::error::*;
use crate::keys::KeyMaterial;

/// Shortest shared secret accepted for HMAC algorithms.
pub const MIN_HMAC_KEY_LENGTH: usize = 12;

fn authentication_tag(alg: Algorithm, authenticated: &[u8], key: &[u8]) -> Result<Vec<u8>, Error> {
    let tag = match alg {
        Algorithm::HS256 => hmac_sha256::HMAC::mac(authenticated, key).to_vec(),
        Algorithm::HS384 => hmac_sha384::HMAC::mac(authenticated, key).to_vec(),
        Algorithm::HS512 => hmac_sha512::HMAC::mac(authenticated, key).to_vec(),
        _ => bail!(JWTError::InvalidAlgorithm),
    };
    Ok(tag)
}

pub(super) fn sign(alg: Algorithm, authenticated: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, Error> {
    ensure!(key.as_bytes().len() >= MIN_HMAC_KEY_LENGTH, JWTError::WeakKey);
    authentication_tag(alg, authenticated, key.as_bytes())
}

pub(super) fn verify(
    alg: Algorithm,
    authenticated: &[u8],
    authentication_tag_to_check: &[u8],
    key: &KeyMaterial,
) -> Result<bool, Error> {
    ensure!(key.as_bytes().len() >= MIN_HMAC_KEY_LENGTH, JWTError::WeakKey);
    let expected = authentication_tag(alg, authenticated, key.as_bytes())?;
    Ok(expected.len() == authentication_tag_to_check.len()
        && ct_codecs::verify(&expected, authentication_tag_to_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ct_codecs::{Base64UrlSafeNoPadding, Decoder};

    #[test]
    fn matches_a_known_token() {
        // Signature of the well-known jwt.io example token
        let signing_input = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.eyJzdWIiOiIxMjM0NTY3ODkwIiwibmFtZSI6IkpvaG4gRG9lIiwiaWF0IjoxNTE2MjM5MDIyfQ";
        let signature = Base64UrlSafeNoPadding::decode_to_vec(
            "SflKxwRJSMeKKF2QT4fwpMeJf36POk6yJV_adQssw5c",
            None,
        )
        .unwrap();
        let key = KeyMaterial::from("your-256-bit-secret");
        assert_eq!(
            sign(Algorithm::HS256, signing_input.as_bytes(), &key).unwrap(),
            signature
        );
        assert!(verify(Algorithm::HS256, signing_input.as_bytes(), &signature, &key).unwrap());
        assert!(!verify(Algorithm::HS256, signing_input.as_bytes(), &signature[..31], &key).unwrap());
    }

    #[test]
    fn tag_length_follows_the_hash() {
        let key = KeyMaterial::from("0123456789abcdef");
        assert_eq!(sign(Algorithm::HS256, b"x", &key).unwrap().len(), 32);
        assert_eq!(sign(Algorithm::HS384, b"x", &key).unwrap().len(), 48);
        assert_eq!(sign(Algorithm::HS512, b"x", &key).unwrap().len(), 64);
    }
}
