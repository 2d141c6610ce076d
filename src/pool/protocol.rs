//! Framing of requests and replies inside the preallocated regions of a slot.
//!
//! A request is packed as five contiguous fields whose lengths are kept in a
//! separate array: `[opcode, algorithm]`, the key, its passphrase (empty when
//! absent), the signing input and the signature (empty for signing).
//! A reply is a status and a single field: the signature, the verification
//! result, or an encoded [`ErrorRecord`].

use std::convert::TryInto;

use zeroize::Zeroize;

use crate::algorithms::Algorithm;
use crate::error::*;
use crate::keys::KeyMaterial;

const REQUEST_FIELDS: usize = 5;
const MAX_CAUSE_DEPTH: usize = 32;

const OP_SIGN: u8 = 0;
const OP_VERIFY: u8 = 1;

const STATUS_SIGNATURE: i32 = 0;
const STATUS_VERIFIED: i32 = 1;
const STATUS_FAILED: i32 = -1;
const STATUS_OVERFLOW: i32 = -2;

const VERIFIED: &[u8] = &[1];
const MISMATCH: &[u8] = &[0];

/// A cryptographic operation, as handed to a worker or run in-process.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Request<'a> {
    Sign {
        algorithm: Algorithm,
        key: &'a KeyMaterial,
        signing_input: &'a [u8],
    },
    Verify {
        algorithm: Algorithm,
        key: &'a KeyMaterial,
        signing_input: &'a [u8],
        signature: &'a [u8],
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Signature(Vec<u8>),
    Verified(bool),
}

impl Request<'_> {
    pub(crate) fn run(&self) -> Result<Outcome, Error> {
        match *self {
            Request::Sign {
                algorithm,
                key,
                signing_input,
            } => algorithm.sign(signing_input, key).map(Outcome::Signature),
            Request::Verify {
                algorithm,
                key,
                signing_input,
                signature,
            } => algorithm
                .verify(signing_input, signature, key)
                .map(Outcome::Verified),
        }
    }

    fn fields(&self) -> [&[u8]; REQUEST_FIELDS] {
        match *self {
            Request::Sign {
                key, signing_input, ..
            } => [
                &[],
                key.as_bytes(),
                passphrase(key),
                signing_input,
                &[],
            ],
            Request::Verify {
                key,
                signing_input,
                signature,
                ..
            } => [
                &[],
                key.as_bytes(),
                passphrase(key),
                signing_input,
                signature,
            ],
        }
    }

    fn header(&self) -> [u8; 2] {
        match self {
            Request::Sign { algorithm, .. } => [OP_SIGN, algorithm.id()],
            Request::Verify { algorithm, .. } => [OP_VERIFY, algorithm.id()],
        }
    }
}

fn passphrase(key: &KeyMaterial) -> &[u8] {
    key.passphrase().unwrap_or_default()
}

/// A request unpacked by a worker. The key is copied out of the slot, the
/// other fields are borrowed from it.
pub(crate) struct Framed<'a> {
    opcode: u8,
    algorithm: Algorithm,
    key: KeyMaterial,
    primary: &'a [u8],
    secondary: &'a [u8],
}

impl Framed<'_> {
    pub(crate) fn request(&self) -> Result<Request<'_>, Error> {
        match self.opcode {
            OP_SIGN => Ok(Request::Sign {
                algorithm: self.algorithm,
                key: &self.key,
                signing_input: self.primary,
            }),
            OP_VERIFY => Ok(Request::Verify {
                algorithm: self.algorithm,
                key: &self.key,
                signing_input: self.primary,
                signature: self.secondary,
            }),
            opcode => Err(anyhow!("unknown opcode {}", opcode).context(JWTError::WorkerOperationFailed)),
        }
    }
}

/// Preallocated request and reply regions bound to one worker.
///
/// A slot has a single owner at any time: it travels from the availability
/// queue to a caller, from the caller to its worker and back.
#[derive(Default)]
pub(crate) struct Slot {
    worker: usize,
    request: Box<[u8]>,
    request_lengths: [usize; REQUEST_FIELDS],
    reply: Box<[u8]>,
    reply_length: usize,
    status: i32,
}

impl Slot {
    pub(crate) fn new(worker: usize, buffer_size: usize) -> Self {
        Slot {
            worker,
            request: vec![0u8; buffer_size].into_boxed_slice(),
            request_lengths: [0; REQUEST_FIELDS],
            reply: vec![0u8; buffer_size].into_boxed_slice(),
            reply_length: 0,
            status: 0,
        }
    }

    pub(crate) fn worker(&self) -> usize {
        self.worker
    }

    /// Pack a request. Returns `false`, leaving the slot empty, if it doesn't fit.
    pub(crate) fn write_request(&mut self, request: &Request<'_>) -> bool {
        let header = request.header();
        let mut fields = request.fields();
        fields[0] = &header;
        let total: usize = fields.iter().map(|field| field.len()).sum();
        if total > self.request.len() {
            return false;
        }
        let mut offset = 0;
        for (i, field) in fields.iter().enumerate() {
            self.request[offset..offset + field.len()].copy_from_slice(field);
            self.request_lengths[i] = field.len();
            offset += field.len();
        }
        true
    }

    fn request_fields(&self) -> Result<[&[u8]; REQUEST_FIELDS], Error> {
        let mut fields: [&[u8]; REQUEST_FIELDS] = [&[]; REQUEST_FIELDS];
        let mut offset = 0;
        for (i, len) in self.request_lengths.iter().enumerate() {
            fields[i] = self
                .request
                .get(offset..offset + len)
                .ok_or_else(|| anyhow!(JWTError::WorkerOperationFailed))?;
            offset += len;
        }
        Ok(fields)
    }

    pub(crate) fn read_request(&self) -> Result<Framed<'_>, Error> {
        let [header, secret, passphrase, primary, secondary] = self.request_fields()?;
        let (opcode, algorithm) = match header {
            [opcode, algorithm] => (*opcode, Algorithm::from_id(*algorithm)?),
            _ => bail!(JWTError::WorkerOperationFailed),
        };
        let mut key = KeyMaterial::from_bytes(secret);
        if !passphrase.is_empty() {
            key = key.with_passphrase(passphrase);
        }
        Ok(Framed {
            opcode,
            algorithm,
            key,
            primary,
            secondary,
        })
    }

    /// Wipe the request region, which may hold key material.
    pub(crate) fn clear_request(&mut self) {
        let used: usize = self.request_lengths.iter().sum();
        self.request[..used].zeroize();
        self.request_lengths = [0; REQUEST_FIELDS];
    }

    pub(crate) fn write_reply(&mut self, result: &Result<Outcome, Error>) {
        let encoded;
        let (status, field): (i32, &[u8]) = match result {
            Ok(Outcome::Signature(signature)) => (STATUS_SIGNATURE, signature.as_slice()),
            Ok(Outcome::Verified(true)) => (STATUS_VERIFIED, VERIFIED),
            Ok(Outcome::Verified(false)) => (STATUS_VERIFIED, MISMATCH),
            Err(err) => {
                encoded = ErrorRecord::from_error(err).encode();
                (STATUS_FAILED, encoded.as_slice())
            }
        };
        if field.len() > self.reply.len() {
            self.status = STATUS_OVERFLOW;
            self.reply_length = 0;
            return;
        }
        self.reply[..field.len()].copy_from_slice(field);
        self.reply_length = field.len();
        self.status = status;
    }

    pub(crate) fn read_reply(&self) -> Result<Outcome, Error> {
        let field = &self.reply[..self.reply_length];
        match (self.status, field) {
            (STATUS_SIGNATURE, signature) => Ok(Outcome::Signature(signature.to_vec())),
            (STATUS_VERIFIED, [verified]) => Ok(Outcome::Verified(*verified == 1)),
            (STATUS_FAILED, encoded) => Err(ErrorRecord::decode(encoded)?.into_error()),
            (STATUS_OVERFLOW, _) => Err(anyhow!(
                "reply does not fit in a {} bytes region",
                self.reply.len()
            )
            .context(JWTError::WorkerOperationFailed)),
            (status, _) => Err(
                anyhow!("unexpected reply status {}", status).context(JWTError::WorkerOperationFailed)
            ),
        }
    }
}

/// An error flattened into plain values, so that it can cross a thread
/// boundary and be rebuilt on the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Stable code of the error kind, empty for errors without a kind
    pub code: String,
    pub message: String,
    pub cause: Option<Box<ErrorRecord>>,
}

impl ErrorRecord {
    pub fn from_error(err: &Error) -> Self {
        let causes: Vec<ErrorRecord> = err
            .chain()
            .skip(1)
            .map(|cause| ErrorRecord {
                code: cause
                    .downcast_ref::<JWTError>()
                    .map(|kind| kind.code().to_string())
                    .unwrap_or_default(),
                message: cause.to_string(),
                cause: None,
            })
            .collect();
        let cause = causes.into_iter().rev().fold(None, |inner, mut record| {
            record.cause = inner;
            Some(Box::new(record))
        });
        ErrorRecord {
            code: error_kind(err)
                .map(|kind| kind.code().to_string())
                .unwrap_or_default(),
            message: err.to_string(),
            cause,
        }
    }

    /// Rebuild an error with the same kind and message as the recorded one.
    pub fn into_error(self) -> Error {
        let mut links = Vec::new();
        let mut next = Some(Box::new(self));
        while let Some(record) = next {
            let ErrorRecord {
                code,
                message,
                cause,
            } = *record;
            links.push((JWTError::from_code(&code), message));
            next = cause;
        }
        let mut rebuilt: Option<Error> = None;
        for (kind, message) in links.into_iter().rev() {
            let is_kind = kind.map(|kind| kind.to_string() == message).unwrap_or(false);
            rebuilt = Some(match (rebuilt, kind) {
                (None, Some(kind)) if is_kind => Error::new(kind),
                (None, Some(kind)) => Error::new(kind).context(message),
                (None, None) => Error::msg(message),
                (Some(inner), Some(kind)) if is_kind => inner.context(kind),
                // The kind is already carried by the cause.
                (Some(inner), Some(kind)) if error_kind(&inner) == Some(kind) => inner.context(message),
                (Some(inner), Some(kind)) => inner.context(kind).context(message),
                (Some(inner), None) => inner.context(message),
            });
        }
        rebuilt.unwrap_or_else(|| anyhow!(JWTError::WorkerOperationFailed))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut next = Some(self);
        while let Some(record) = next {
            out.extend_from_slice(&(record.code.len() as u16).to_le_bytes());
            out.extend_from_slice(record.code.as_bytes());
            out.extend_from_slice(&(record.message.len() as u32).to_le_bytes());
            out.extend_from_slice(record.message.as_bytes());
            out.push(record.cause.is_some() as u8);
            next = record.cause.as_deref();
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = Reader { bytes };
        let mut records = Vec::new();
        loop {
            ensure!(records.len() < MAX_CAUSE_DEPTH, JWTError::WorkerOperationFailed);
            let code_len = u16::from_le_bytes(reader.array()?) as usize;
            let code = reader.string(code_len)?;
            let message_len = u32::from_le_bytes(reader.array()?) as usize;
            let message = reader.string(message_len)?;
            records.push((code, message));
            let [has_cause] = reader.array()?;
            if has_cause == 0 {
                break;
            }
        }
        ensure!(reader.bytes.is_empty(), JWTError::WorkerOperationFailed);
        let mut decoded: Option<Box<ErrorRecord>> = None;
        for (code, message) in records.into_iter().rev() {
            decoded = Some(Box::new(ErrorRecord {
                code,
                message,
                cause: decoded,
            }));
        }
        decoded
            .map(|record| *record)
            .ok_or_else(|| anyhow!(JWTError::WorkerOperationFailed))
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        ensure!(self.bytes.len() >= len, JWTError::WorkerOperationFailed);
        let (taken, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(taken)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        self.take(N)?
            .try_into()
            .map_err(|_| anyhow!(JWTError::WorkerOperationFailed))
    }

    fn string(&mut self, len: usize) -> Result<String, Error> {
        String::from_utf8(self.take(len)?.to_vec()).map_err(wrap(JWTError::WorkerOperationFailed))
    }
}
