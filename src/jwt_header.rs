use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JOSE header of a token.
///
/// Registered fields used by signers and verifiers are exposed as typed
/// fields; everything else is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "alg")]
    pub(crate) algorithm: String,

    #[serde(rename = "typ", default, skip_serializing_if = "Option::is_none")]
    pub(crate) signature_type: Option<String>,

    #[serde(rename = "kid", default, skip_serializing_if = "Option::is_none")]
    pub(crate) key_id: Option<String>,

    #[serde(rename = "cty", default, skip_serializing_if = "Option::is_none")]
    pub(crate) content_type: Option<String>,

    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

impl Header {
    pub(crate) fn new(algorithm: impl ToString, signature_type: Option<String>) -> Self {
        Header {
            algorithm: algorithm.to_string(),
            signature_type,
            key_id: None,
            content_type: None,
            extra: Map::new(),
        }
    }

    pub(crate) fn with_key_id(mut self, key_id: Option<String>) -> Self {
        if key_id.is_some() {
            self.key_id = key_id;
        }
        self
    }

    /// Merge caller-supplied header fields. `alg` is never overridden.
    pub(crate) fn with_fields(mut self, fields: &Map<String, Value>) -> Self {
        for (name, value) in fields {
            match (name.as_str(), value) {
                ("alg", _) => {}
                ("typ", Value::String(s)) => self.signature_type = Some(s.clone()),
                ("kid", Value::String(s)) => self.key_id = Some(s.clone()),
                ("cty", Value::String(s)) => self.content_type = Some(s.clone()),
                _ => {
                    self.extra.insert(name.clone(), value.clone());
                }
            }
        }
        self
    }

    /// The algorithm declared by this header ("alg").
    ///
    /// This information is not protected until the signature is verified.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The token type ("typ")
    pub fn signature_type(&self) -> Option<&str> {
        self.signature_type.as_deref()
    }

    /// The key identifier ("kid")
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// The content type ("cty")
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Any other header field, by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = r#"{"alg":"HS256","typ":"JWT","kid":"k1","x5t":"abc","crit":["b64"]}"#;
        let header: Header = serde_json::from_str(raw).unwrap();
        assert_eq!(header.algorithm(), "HS256");
        assert_eq!(header.key_id(), Some("k1"));
        assert_eq!(header.get("x5t"), Some(&json!("abc")));
        let again: Header = serde_json::from_str(&serde_json::to_string(&header).unwrap()).unwrap();
        assert_eq!(again, header);
    }

    #[test]
    fn caller_fields_cannot_replace_the_algorithm() {
        let mut fields = Map::new();
        fields.insert("alg".to_string(), json!("none"));
        fields.insert("kid".to_string(), json!("key-2"));
        fields.insert("x-custom".to_string(), json!(1));
        let header = Header::new("ES256", Some("JWT".to_string())).with_fields(&fields);
        assert_eq!(header.algorithm(), "ES256");
        assert_eq!(header.key_id(), Some("key-2"));
        assert_eq!(header.get("x-custom"), Some(&json!(1)));
    }
}
