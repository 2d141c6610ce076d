#[allow(unused)]
pub use anyhow::{anyhow, bail, ensure, Error};

/// Kinds of failures reported by signers, verifiers and the worker pool.
///
/// Errors are carried as `anyhow::Error`; the kind can be recovered with
/// `err.downcast_ref::<JWTError>()`, and a lower-level cause, when present,
/// is the next element of `err.chain()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum JWTError {
    #[error("Malformed token")]
    MalformedToken,
    #[error("Payload is not representable as a JSON object")]
    MalformedPayload,
    #[error("Invalid or unsupported algorithm")]
    InvalidAlgorithm,
    #[error("Invalid key material")]
    InvalidKeyMaterial,
    #[error("Key is too short")]
    WeakKey,
    #[error("Cannot fetch the key")]
    KeyFetchError,
    #[error("Timed out while fetching the key")]
    KeyFetchTimeout,
    #[error("Signing key unavailable")]
    SigningKeyUnavailable,
    #[error("Cannot create the token signature")]
    SignatureCreationFailed,
    #[error("Token signature is invalid")]
    SignatureVerificationFailed,
    #[error("Cannot verify the token signature")]
    SignatureVerificationError,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Token is not active yet")]
    TokenNotActive,
    #[error("Token is too old")]
    TokenTooOld,
    #[error("Token claim is not allowed")]
    ClaimMismatch,
    #[error("Required claim missing")]
    MissingRequiredClaim,
    #[error("Invalid claim value")]
    InvalidClaimValue,
    #[error("Invalid token type")]
    InvalidTokenType,
    #[error("Worker operation failed")]
    WorkerOperationFailed,
}

const ALL_KINDS: [JWTError; 19] = [
    JWTError::MalformedToken,
    JWTError::MalformedPayload,
    JWTError::InvalidAlgorithm,
    JWTError::InvalidKeyMaterial,
    JWTError::WeakKey,
    JWTError::KeyFetchError,
    JWTError::KeyFetchTimeout,
    JWTError::SigningKeyUnavailable,
    JWTError::SignatureCreationFailed,
    JWTError::SignatureVerificationFailed,
    JWTError::SignatureVerificationError,
    JWTError::TokenExpired,
    JWTError::TokenNotActive,
    JWTError::TokenTooOld,
    JWTError::ClaimMismatch,
    JWTError::MissingRequiredClaim,
    JWTError::InvalidClaimValue,
    JWTError::InvalidTokenType,
    JWTError::WorkerOperationFailed,
];

impl JWTError {
    /// Stable identifier of the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            JWTError::MalformedToken => "MALFORMED_TOKEN",
            JWTError::MalformedPayload => "MALFORMED_PAYLOAD",
            JWTError::InvalidAlgorithm => "INVALID_ALGORITHM",
            JWTError::InvalidKeyMaterial => "INVALID_KEY_MATERIAL",
            JWTError::WeakKey => "WEAK_KEY",
            JWTError::KeyFetchError => "KEY_FETCH_ERROR",
            JWTError::KeyFetchTimeout => "KEY_FETCH_TIMEOUT",
            JWTError::SigningKeyUnavailable => "SIGNING_KEY_UNAVAILABLE",
            JWTError::SignatureCreationFailed => "SIGNATURE_CREATION_FAILED",
            JWTError::SignatureVerificationFailed => "SIGNATURE_VERIFICATION_FAILED",
            JWTError::SignatureVerificationError => "SIGNATURE_VERIFICATION_ERROR",
            JWTError::TokenExpired => "TOKEN_EXPIRED",
            JWTError::TokenNotActive => "TOKEN_NOT_ACTIVE",
            JWTError::TokenTooOld => "TOKEN_TOO_OLD",
            JWTError::ClaimMismatch => "CLAIM_MISMATCH",
            JWTError::MissingRequiredClaim => "MISSING_REQUIRED_CLAIM",
            JWTError::InvalidClaimValue => "INVALID_CLAIM_VALUE",
            JWTError::InvalidTokenType => "INVALID_TOKEN_TYPE",
            JWTError::WorkerOperationFailed => "WORKER_OPERATION_FAILED",
        }
    }

    /// Look up an error kind by its stable identifier.
    pub fn from_code(code: &str) -> Option<JWTError> {
        ALL_KINDS.iter().copied().find(|kind| kind.code() == code)
    }
}

/// Return the error kind attached to `err`, if any.
///
/// Kinds attached as context take precedence over kinds found deeper in the chain.
pub fn error_kind(err: &Error) -> Option<JWTError> {
    err.downcast_ref::<JWTError>()
        .or_else(|| {
            err.chain()
                .find_map(|cause| cause.downcast_ref::<JWTError>())
        })
        .copied()
}

/// Attach a kind to an arbitrary lower-level error, keeping it as the cause.
pub(crate) fn wrap<E>(kind: JWTError) -> impl FnOnce(E) -> Error
where
    E: Into<Error>,
{
    move |err| err.into().context(kind)
}
