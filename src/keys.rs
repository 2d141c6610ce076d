use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use coarsetime::{Clock, UnixTimeStamp};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use pkcs8::der::pem::LineEnding;
use pkcs8::{EncryptedPrivateKeyInfo, SecretDocument};
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::error::*;
use crate::jwt_header::Header;

const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Signing or verification key material: a shared secret, PEM text or DER bytes,
/// optionally protected by a passphrase.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
    passphrase: Option<Vec<u8>>,
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if let Some(passphrase) = self.passphrase.as_mut() {
            passphrase.zeroize();
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.bytes.len())
            .field("pem", &self.is_pem())
            .field("protected", &self.passphrase.is_some())
            .finish()
    }
}

impl KeyMaterial {
    /// Key material from raw bytes (an HMAC secret, DER, or PEM bytes).
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        KeyMaterial {
            bytes: bytes.as_ref().to_vec(),
            passphrase: None,
        }
    }

    /// Key material from PEM text.
    pub fn from_pem(pem: &str) -> Self {
        Self::from_bytes(pem.trim())
    }

    /// An encrypted PKCS#8 private key and the passphrase protecting it.
    pub fn with_passphrase(mut self, passphrase: impl AsRef<[u8]>) -> Self {
        self.passphrase = Some(passphrase.as_ref().to_vec());
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn passphrase(&self) -> Option<&[u8]> {
        self.passphrase.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_pem(&self) -> bool {
        let trimmed = trim_ascii_start(&self.bytes);
        trimmed.starts_with(b"-----BEGIN ")
    }

    /// Key material with the passphrase protection removed.
    ///
    /// Encrypted PKCS#8 keys are decrypted and returned as an unencrypted
    /// PKCS#8 PEM document; unprotected keys are returned as-is.
    pub(crate) fn unlocked(&self) -> Result<Zeroizing<Vec<u8>>, Error> {
        let passphrase = match &self.passphrase {
            None => return Ok(Zeroizing::new(self.bytes.clone())),
            Some(passphrase) => passphrase,
        };
        let decrypted = if self.is_pem() {
            let pem = std::str::from_utf8(&self.bytes).map_err(wrap(JWTError::InvalidKeyMaterial))?;
            let (label, document) =
                SecretDocument::from_pem(pem.trim()).map_err(wrap(JWTError::InvalidKeyMaterial))?;
            ensure!(
                label == ENCRYPTED_PRIVATE_KEY_LABEL,
                JWTError::InvalidKeyMaterial
            );
            decrypt_pkcs8(document.as_bytes(), passphrase)?
        } else {
            decrypt_pkcs8(&self.bytes, passphrase)?
        };
        let pem = decrypted
            .to_pem("PRIVATE KEY", LineEnding::LF)
            .map_err(wrap(JWTError::InvalidKeyMaterial))?;
        Ok(Zeroizing::new(pem.as_bytes().to_vec()))
    }
}

fn decrypt_pkcs8(der: &[u8], passphrase: &[u8]) -> Result<SecretDocument, Error> {
    let info = EncryptedPrivateKeyInfo::try_from(der).map_err(wrap(JWTError::InvalidKeyMaterial))?;
    info.decrypt(passphrase)
        .map_err(wrap(JWTError::InvalidKeyMaterial))
}

fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

impl From<&[u8]> for KeyMaterial {
    fn from(bytes: &[u8]) -> Self {
        KeyMaterial::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for KeyMaterial {
    fn from(bytes: Vec<u8>) -> Self {
        KeyMaterial {
            bytes,
            passphrase: None,
        }
    }
}

impl From<&str> for KeyMaterial {
    fn from(s: &str) -> Self {
        KeyMaterial::from_bytes(s)
    }
}

impl From<String> for KeyMaterial {
    fn from(s: String) -> Self {
        KeyMaterial::from(s.into_bytes())
    }
}

pub type KeyFuture = BoxFuture<'static, Result<KeyMaterial, Error>>;

type SyncKeyFn = dyn Fn() -> Result<KeyMaterial, Error> + Send + Sync;
type AsyncKeyFn = dyn Fn() -> KeyFuture + Send + Sync;
type HeaderKeyFn = dyn Fn(&Header) -> KeyFuture + Send + Sync;

/// Where key material comes from.
#[derive(Clone)]
pub enum SecretSource {
    /// A fixed key
    Static(KeyMaterial),
    /// A function returning the key
    Sync(Arc<SyncKeyFn>),
    /// A function returning the key asynchronously
    Async(Arc<AsyncKeyFn>),
    /// A function picking the key from the token header. Verification only.
    ByHeader(Arc<HeaderKeyFn>),
}

impl fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSource::Static(key) => f.debug_tuple("Static").field(key).finish(),
            SecretSource::Sync(_) => f.write_str("Sync(..)"),
            SecretSource::Async(_) => f.write_str("Async(..)"),
            SecretSource::ByHeader(_) => f.write_str("ByHeader(..)"),
        }
    }
}

impl SecretSource {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<KeyMaterial, Error> + Send + Sync + 'static,
    {
        SecretSource::Sync(Arc::new(f))
    }

    pub fn from_async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<KeyMaterial, Error>> + Send + 'static,
    {
        SecretSource::Async(Arc::new(move || f().boxed()))
    }

    pub fn from_header_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(&Header) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<KeyMaterial, Error>> + Send + 'static,
    {
        SecretSource::ByHeader(Arc::new(move |header: &Header| f(header).boxed()))
    }

    /// `true` if the key can only be picked once a token header is known.
    pub fn depends_on_header(&self) -> bool {
        matches!(self, SecretSource::ByHeader(_))
    }
}

impl From<KeyMaterial> for SecretSource {
    fn from(key: KeyMaterial) -> Self {
        SecretSource::Static(key)
    }
}

impl From<&[u8]> for SecretSource {
    fn from(key: &[u8]) -> Self {
        SecretSource::Static(key.into())
    }
}

impl From<Vec<u8>> for SecretSource {
    fn from(key: Vec<u8>) -> Self {
        SecretSource::Static(key.into())
    }
}

impl From<&str> for SecretSource {
    fn from(key: &str) -> Self {
        SecretSource::Static(key.into())
    }
}

impl From<String> for SecretSource {
    fn from(key: String) -> Self {
        SecretSource::Static(key.into())
    }
}

struct CachedKey {
    key: KeyMaterial,
    expires_at: UnixTimeStamp,
}

/// Obtains key material from a [`SecretSource`], with an optional bounded
/// wait and an optional per-`kid` cache.
#[derive(Clone, Debug)]
pub struct SecretResolver {
    source: SecretSource,
    timeout: Option<Duration>,
    cache: Option<Arc<KeyCache>>,
}

struct KeyCache {
    ttl: coarsetime::Duration,
    entries: Mutex<HashMap<Option<String>, CachedKey>>,
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl SecretResolver {
    pub fn new(source: impl Into<SecretSource>) -> Self {
        SecretResolver {
            source: source.into(),
            timeout: None,
            cache: None,
        }
    }

    /// Fail with `KeyFetchTimeout` if the source takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keep resolved keys for `ttl`, keyed by the header `kid`.
    pub fn with_cache(mut self, ttl: coarsetime::Duration) -> Self {
        self.cache = Some(Arc::new(KeyCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }));
        self
    }

    pub fn source(&self) -> &SecretSource {
        &self.source
    }

    /// Resolve the key for a token. `header` is only consulted by
    /// header-dependent sources and as the cache key.
    pub async fn resolve(&self, header: Option<&Header>) -> Result<KeyMaterial, Error> {
        if let SecretSource::Static(key) = &self.source {
            return Ok(key.clone());
        }
        let cache_key = header.and_then(|h| h.key_id().map(str::to_string));
        if let Some(key) = self.cached(&cache_key) {
            return Ok(key);
        }

        let pending: KeyFuture = match &self.source {
            SecretSource::Static(key) => return Ok(key.clone()),
            SecretSource::Sync(f) => {
                let key = f();
                async move { key }.boxed()
            }
            SecretSource::Async(f) => f(),
            SecretSource::ByHeader(f) => match header {
                Some(header) => f(header),
                None => {
                    return Err(anyhow!("the key source requires a token header")
                        .context(JWTError::KeyFetchError))
                }
            },
        };

        let resolved = match self.timeout {
            None => pending.await,
            Some(timeout) => match tokio::time::timeout(timeout, pending).await {
                Ok(resolved) => resolved,
                Err(_) => bail!(JWTError::KeyFetchTimeout),
            },
        };
        let key = match resolved {
            Ok(key) if !key.is_empty() => key,
            Ok(_) => bail!(JWTError::KeyFetchError),
            Err(err) => {
                debug!(error = %err, "key source failed");
                return Err(err.context(JWTError::KeyFetchError));
            }
        };
        if let Some(cache) = &self.cache {
            cache.entries.lock().insert(
                cache_key,
                CachedKey {
                    key: key.clone(),
                    expires_at: Clock::now_since_epoch() + cache.ttl,
                },
            );
        }
        Ok(key)
    }

    fn cached(&self, cache_key: &Option<String>) -> Option<KeyMaterial> {
        let cache = self.cache.as_ref()?;
        let mut entries = cache.entries.lock();
        let now = Clock::now_since_epoch();
        match entries.get(cache_key) {
            Some(entry) if entry.expires_at > now => Some(entry.key.clone()),
            Some(_) => {
                entries.remove(cache_key);
                None
            }
            None => None,
        }
    }
}
