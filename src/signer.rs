use coarsetime::Clock;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::algorithms::Algorithm;
use crate::claims;
use crate::common::SignerOptions;
use crate::error::*;
use crate::jwt_header::Header;
use crate::keys::{KeyMaterial, SecretResolver, SecretSource};
use crate::pool::WorkerPool;
use crate::token::{Payload, Token};

const DEFAULT_SIGNATURE_TYPE: &str = "JWT";

/// Creates signed tokens for one algorithm and one key source.
#[derive(Debug, Clone)]
pub struct Signer {
    algorithm: Algorithm,
    resolver: SecretResolver,
    options: SignerOptions,
    pool: Option<WorkerPool>,
}

impl Signer {
    pub fn new(
        algorithm: Algorithm,
        secret: impl Into<SecretSource>,
        options: SignerOptions,
    ) -> Result<Self, Error> {
        Self::with_resolver(algorithm, SecretResolver::new(secret), options)
    }

    /// A signer using a configured resolver. Keys picked from a token header
    /// cannot be used for signing.
    pub fn with_resolver(
        algorithm: Algorithm,
        resolver: SecretResolver,
        options: SignerOptions,
    ) -> Result<Self, Error> {
        if resolver.source().depends_on_header() {
            return Err(anyhow!("a signing key cannot depend on the token header")
                .context(JWTError::SigningKeyUnavailable));
        }
        Ok(Signer {
            algorithm,
            resolver,
            options,
            pool: None,
        })
    }

    /// Compute signatures on `pool` when it is running.
    pub fn with_pool(mut self, pool: &WorkerPool) -> Self {
        self.pool = Some(pool.clone());
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn options(&self) -> &SignerOptions {
        &self.options
    }

    /// Sign a set of claims. `claims` must serialize to a JSON object.
    pub async fn sign<T: Serialize>(&self, claims: &T) -> Result<String, Error> {
        self.sign_with(claims, &Map::new()).await
    }

    /// Sign a set of claims, adding `header` fields to the configured ones.
    pub async fn sign_with<T: Serialize>(
        &self,
        claims: &T,
        header: &Map<String, Value>,
    ) -> Result<String, Error> {
        let mut payload = match serde_json::to_value(claims).map_err(wrap(JWTError::MalformedPayload))? {
            Value::Object(payload) => payload,
            _ => bail!(JWTError::MalformedPayload),
        };
        self.sign_payload(&mut payload, header).await
    }

    /// Sign a payload. With `mutate_payload`, the injected claims are also
    /// added to `payload`; otherwise it is left untouched.
    pub async fn sign_mut(&self, payload: &mut Payload) -> Result<String, Error> {
        if self.options.mutate_payload {
            self.sign_payload(payload, &Map::new()).await
        } else {
            let mut copy = payload.clone();
            self.sign_payload(&mut copy, &Map::new()).await
        }
    }

    async fn sign_payload(
        &self,
        payload: &mut Payload,
        header_fields: &Map<String, Value>,
    ) -> Result<String, Error> {
        let now = self
            .options
            .clock_timestamp
            .unwrap_or_else(Clock::now_since_epoch)
            .as_secs();
        claims::inject(payload, &self.options, now)?;

        let signature_type = self
            .options
            .signature_type
            .clone()
            .unwrap_or_else(|| DEFAULT_SIGNATURE_TYPE.to_string());
        let header = Header::new(self.algorithm, Some(signature_type))
            .with_key_id(self.options.key_id.clone())
            .with_fields(&self.options.header)
            .with_fields(header_fields);

        let key = self.signing_key().await?;
        let signing_input = Token::encode(&header, payload)?;
        let signature = self
            .compute_signature(signing_input.as_bytes(), &key)
            .await
            .map_err(signature_creation_error)?;
        Token::assemble(&signing_input, &signature)
    }

    async fn signing_key(&self) -> Result<KeyMaterial, Error> {
        if self.algorithm == Algorithm::None {
            return Ok(KeyMaterial::from_bytes(b""));
        }
        self.resolver
            .resolve(None)
            .await
            .map_err(wrap(JWTError::SigningKeyUnavailable))
    }

    async fn compute_signature(&self, signing_input: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, Error> {
        match &self.pool {
            Some(pool) => pool.sign(self.algorithm, signing_input, key).await,
            None => self.algorithm.sign(signing_input, key),
        }
    }
}

/// Key and algorithm problems keep their kind, anything else becomes
/// `SignatureCreationFailed`.
fn signature_creation_error(err: Error) -> Error {
    match error_kind(&err) {
        Some(JWTError::InvalidKeyMaterial)
        | Some(JWTError::WeakKey)
        | Some(JWTError::InvalidAlgorithm)
        | Some(JWTError::SignatureCreationFailed)
        | Some(JWTError::WorkerOperationFailed) => err,
        _ => err.context(JWTError::SignatureCreationFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coarsetime::{Duration, UnixTimeStamp};
    use serde_json::json;

    const NOW: u64 = 1_600_000_000;

    fn options() -> SignerOptions {
        SignerOptions {
            clock_timestamp: Some(UnixTimeStamp::from_secs(NOW)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn claims_and_header_are_injected() {
        let signer = Signer::new(
            Algorithm::HS256,
            "your-256-bit-secret",
            SignerOptions {
                expires_in: Some(Duration::from_secs(3600)),
                issuer: Some("issuer".to_string()),
                key_id: Some("key-1".to_string()),
                ..options()
            },
        )
        .unwrap();
        let token = signer.sign(&json!({"sub": "alice"})).await.unwrap();
        let parts = Token::decode(&token).unwrap();
        assert_eq!(parts.header.algorithm(), "HS256");
        assert_eq!(parts.header.signature_type(), Some("JWT"));
        assert_eq!(parts.header.key_id(), Some("key-1"));
        assert_eq!(
            Value::Object(parts.payload),
            json!({"sub": "alice", "iat": NOW, "exp": NOW + 3600, "iss": "issuer"})
        );
    }

    #[tokio::test]
    async fn payloads_are_copied_unless_mutation_is_requested() {
        let mut payload = json!({"sub": "alice"}).as_object().unwrap().clone();
        let signer = Signer::new(Algorithm::HS384, "a-secret-of-some-length", options()).unwrap();
        signer.sign_mut(&mut payload).await.unwrap();
        assert!(!payload.contains_key("iat"));

        let signer = Signer::new(
            Algorithm::HS384,
            "a-secret-of-some-length",
            SignerOptions {
                mutate_payload: true,
                ..options()
            },
        )
        .unwrap();
        signer.sign_mut(&mut payload).await.unwrap();
        assert_eq!(payload["iat"], json!(NOW));
    }

    #[tokio::test]
    async fn header_fields_never_change_the_algorithm() {
        let signer = Signer::new(Algorithm::HS256, "a-secret-of-some-length", options()).unwrap();
        let fields = json!({"alg": "none", "typ": "at+jwt", "x-custom": 1});
        let token = signer
            .sign_with(&json!({}), fields.as_object().unwrap())
            .await
            .unwrap();
        let header = Token::decode_metadata(&token).unwrap();
        assert_eq!(header.algorithm(), "HS256");
        assert_eq!(header.signature_type(), Some("at+jwt"));
        assert_eq!(header.get("x-custom"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn payloads_must_be_objects() {
        let signer = Signer::new(Algorithm::HS256, "a-secret-of-some-length", options()).unwrap();
        let err = signer.sign(&json!([1, 2, 3])).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(JWTError::MalformedPayload));
        let err = signer.sign(&"a string").await.unwrap_err();
        assert_eq!(error_kind(&err), Some(JWTError::MalformedPayload));
    }

    #[tokio::test]
    async fn key_failures() {
        let err = Signer::new(
            Algorithm::HS256,
            SecretSource::from_header_fn(|_: &Header| async { Ok(KeyMaterial::from("unused")) }),
            options(),
        )
        .unwrap_err();
        assert_eq!(error_kind(&err), Some(JWTError::SigningKeyUnavailable));

        let signer = Signer::new(
            Algorithm::HS256,
            SecretSource::from_fn(|| Err(anyhow!("no key today"))),
            options(),
        )
        .unwrap();
        let err = signer.sign(&json!({})).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(JWTError::SigningKeyUnavailable));

        let signer = Signer::new(Algorithm::HS256, "short", options()).unwrap();
        let err = signer.sign(&json!({})).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(JWTError::WeakKey));
    }

    #[tokio::test]
    async fn unsecured_tokens_have_no_signature() {
        let signer = Signer::new(Algorithm::None, "", options()).unwrap();
        let token = signer.sign(&json!({"sub": "alice"})).await.unwrap();
        assert!(token.ends_with('.'));
        assert_eq!(token.matches('.').count(), 2);
    }
}
