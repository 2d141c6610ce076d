use ct_codecs::{Base64UrlSafeNoPadding, Decoder, Encoder};
use serde_json::{Map, Value};

use crate::error::*;
use crate::jwt_header::*;

pub const MAX_HEADER_LENGTH: usize = 8192;

/// Claim set carried by a token.
pub type Payload = Map<String, Value>;

/// Utilities to build and take apart compact tokens
pub struct Token;

/// A token split into its components. Nothing in here has been verified.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenParts {
    pub header: Header,
    pub payload: Payload,
    /// `base64url(header) "." base64url(payload)`, exactly as found in the token
    pub signing_input: String,
    pub signature: Vec<u8>,
    pub(crate) header_bytes: Vec<u8>,
    pub(crate) payload_bytes: Vec<u8>,
}

impl TokenParts {
    /// Decoded bytes of the header segment, before JSON parsing
    pub fn header_bytes(&self) -> &[u8] {
        &self.header_bytes
    }

    /// Decoded bytes of the payload segment, before JSON parsing
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload_bytes
    }
}

impl Token {
    /// Compute the bytes that get signed for a header and a payload.
    pub fn encode(header: &Header, payload: &Payload) -> Result<String, Error> {
        let header_json = serde_json::to_string(header).map_err(wrap(JWTError::MalformedPayload))?;
        let payload_json =
            serde_json::to_string(payload).map_err(wrap(JWTError::MalformedPayload))?;
        Ok(format!(
            "{}.{}",
            Base64UrlSafeNoPadding::encode_to_string(header_json)?,
            Base64UrlSafeNoPadding::encode_to_string(payload_json)?
        ))
    }

    /// Append a signature to a signing input. An empty signature produces an
    /// unsecured token with an empty third segment.
    pub fn assemble(signing_input: &str, signature: &[u8]) -> Result<String, Error> {
        let mut token = String::with_capacity(signing_input.len() + 1 + signature.len() * 4 / 3 + 2);
        token.push_str(signing_input);
        token.push('.');
        token.push_str(&Base64UrlSafeNoPadding::encode_to_string(signature)?);
        Ok(token)
    }

    /// Split a token and decode every segment, without checking the signature.
    pub fn decode(token: &str) -> Result<TokenParts, Error> {
        let parts: Vec<&str> = token.split('.').collect();
        ensure!(
            parts.len() == 2 || parts.len() == 3,
            JWTError::MalformedToken
        );
        let (header_b64, payload_b64) = (parts[0], parts[1]);
        let signature_b64 = parts.get(2).copied().unwrap_or("");
        ensure!(
            !header_b64.is_empty() && !payload_b64.is_empty(),
            JWTError::MalformedToken
        );
        ensure!(header_b64.len() <= MAX_HEADER_LENGTH, JWTError::MalformedToken);

        let header_bytes = decode_segment(header_b64)?;
        let header = parse_header(&header_bytes)?;
        let payload_bytes = decode_segment(payload_b64)?;
        let payload = match serde_json::from_slice::<Value>(&payload_bytes)
            .map_err(wrap(JWTError::MalformedToken))?
        {
            Value::Object(payload) => payload,
            _ => bail!(JWTError::MalformedToken),
        };
        let signature = decode_segment(signature_b64)?;
        let signing_input = token[..header_b64.len() + 1 + payload_b64.len()].to_string();
        Ok(TokenParts {
            header,
            payload,
            signing_input,
            signature,
            header_bytes,
            payload_bytes,
        })
    }

    /// Decode the header only, which can be useful to pick a key before
    /// the token is verified.
    pub fn decode_metadata(token: &str) -> Result<Header, Error> {
        let header_b64 = token.split('.').next().unwrap_or("");
        ensure!(
            !header_b64.is_empty() && header_b64.len() <= MAX_HEADER_LENGTH,
            JWTError::MalformedToken
        );
        parse_header(&decode_segment(header_b64)?)
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, Error> {
    Base64UrlSafeNoPadding::decode_to_vec(segment, None).map_err(wrap(JWTError::MalformedToken))
}

fn parse_header(header_bytes: &[u8]) -> Result<Header, Error> {
    match serde_json::from_slice::<Value>(header_bytes).map_err(wrap(JWTError::MalformedToken))? {
        value @ Value::Object(_) => {
            serde_json::from_value(value).map_err(wrap(JWTError::MalformedToken))
        }
        _ => bail!(JWTError::MalformedToken),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Payload {
        json!({"sub": "1234567890", "name": "John Doe", "admin": true})
            .as_object()
            .unwrap()
            .clone()
    }

    fn kind(err: Error) -> Option<JWTError> {
        error_kind(&err)
    }

    #[test]
    fn decodes_what_it_encodes() {
        let header = Header::new("HS256", Some("JWT".to_string()));
        let signing_input = Token::encode(&header, &payload()).unwrap();
        let token = Token::assemble(&signing_input, &[1, 2, 3, 250]).unwrap();
        let parts = Token::decode(&token).unwrap();
        assert_eq!(parts.header, header);
        assert_eq!(parts.payload, payload());
        assert_eq!(parts.signing_input, signing_input);
        assert_eq!(parts.signature, vec![1, 2, 3, 250]);
        assert_eq!(
            parts.payload_bytes(),
            serde_json::to_string(&payload()).unwrap().as_bytes()
        );
    }

    #[test]
    fn unsecured_tokens_have_an_empty_signature_segment() {
        let header = Header::new("none", Some("JWT".to_string()));
        let signing_input = Token::encode(&header, &payload()).unwrap();
        let token = Token::assemble(&signing_input, &[]).unwrap();
        assert!(token.ends_with('.'));
        assert!(Token::decode(&token).unwrap().signature.is_empty());
        assert!(Token::decode(&signing_input).unwrap().signature.is_empty());
    }

    #[test]
    fn keeps_the_original_segment_bytes() {
        // Non-canonical JSON (extra spaces, key order) must be preserved verbatim.
        let header_json = br#"{ "typ":"JWT", "alg":"HS256" }"#;
        let payload_json = br#"{"b":1,  "a":2}"#;
        let token = format!(
            "{}.{}.",
            Base64UrlSafeNoPadding::encode_to_string(header_json).unwrap(),
            Base64UrlSafeNoPadding::encode_to_string(payload_json).unwrap()
        );
        let parts = Token::decode(&token).unwrap();
        assert_eq!(parts.header_bytes(), &header_json[..]);
        assert_eq!(parts.payload_bytes(), &payload_json[..]);
        assert_eq!(parts.signing_input, &token[..token.len() - 1]);
    }

    #[test]
    fn rejects_malformed_tokens() {
        let header = Header::new("HS256", None);
        let signing_input = Token::encode(&header, &payload()).unwrap();
        let valid = Token::assemble(&signing_input, b"sig").unwrap();

        let bad_tokens = vec![
            String::new(),
            "abc".to_string(),
            "a.b.c.d".to_string(),
            format!("{}.x", valid),
            format!("!!.{}", signing_input.split('.').nth(1).unwrap()),
            format!("{}.@@@.", signing_input.split('.').next().unwrap()),
        ];
        for bad in &bad_tokens {
            assert_eq!(
                kind(Token::decode(bad).unwrap_err()),
                Some(JWTError::MalformedToken),
                "{}",
                bad
            );
        }

        let not_an_object = format!(
            "{}.{}.",
            signing_input.split('.').next().unwrap(),
            Base64UrlSafeNoPadding::encode_to_string("[1,2]").unwrap()
        );
        assert_eq!(
            kind(Token::decode(&not_an_object).unwrap_err()),
            Some(JWTError::MalformedToken)
        );

        let no_alg = format!(
            "{}.{}.",
            Base64UrlSafeNoPadding::encode_to_string(r#"{"typ":"JWT"}"#).unwrap(),
            signing_input.split('.').nth(1).unwrap()
        );
        assert_eq!(
            kind(Token::decode(&no_alg).unwrap_err()),
            Some(JWTError::MalformedToken)
        );
    }

    #[test]
    fn metadata_only_needs_the_header() {
        let header = Header::new("ES256", None).with_key_id(Some("kid-1".to_string()));
        let signing_input = Token::encode(&header, &payload()).unwrap();
        let metadata = Token::decode_metadata(&signing_input).unwrap();
        assert_eq!(metadata.key_id(), Some("kid-1"));
        assert_eq!(metadata.algorithm(), "ES256");
    }
}
