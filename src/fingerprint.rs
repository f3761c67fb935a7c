//! Fingerprint derivation: extraction, canonical serialization and hashing.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use blake2::Blake2b512;
use md5::Md5;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::IdempotencyError;
use crate::extract::{is_missing_key, KeyExtractor};

/// Digest used to hash fingerprints and payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5 (default; collision resistance is not required for keys)
    #[default]
    Md5,
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
    /// BLAKE2b-512
    Blake2b,
}

impl HashAlgorithm {
    /// Hashes `data` and returns the lowercase hex digest.
    pub fn hex_digest(&self, data: &[u8]) -> String {
        match self {
            Self::Md5 => hex::<Md5>(data),
            Self::Sha1 => hex::<Sha1>(data),
            Self::Sha256 => hex::<Sha256>(data),
            Self::Sha512 => hex::<Sha512>(data),
            Self::Blake2b => hex::<Blake2b512>(data),
        }
    }

    /// The canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake2b => "blake2b",
        }
    }
}

fn hex<D: Digest>(data: &[u8]) -> String {
    let digest = D::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = IdempotencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "blake2b" | "blake2b512" => Ok(Self::Blake2b),
            _ => Err(IdempotencyError::configuration(format!(
                "unsupported hash algorithm '{}'",
                s
            ))),
        }
    }
}

/// Serializes a JSON value with object keys sorted at every level.
///
/// Independent of serde_json's `preserve_order` feature, so the same logical
/// payload always hashes the same on every host.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Derives idempotency keys and payload hashes from request payloads.
#[derive(Clone)]
pub struct Fingerprinter {
    algorithm: HashAlgorithm,
    key_expression: Option<String>,
    require_key: bool,
    validation_expression: Option<String>,
    extractor: Arc<dyn KeyExtractor>,
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("algorithm", &self.algorithm)
            .field("key_expression", &self.key_expression)
            .field("require_key", &self.require_key)
            .field("validation_expression", &self.validation_expression)
            .finish()
    }
}

impl Fingerprinter {
    /// Creates a fingerprinter. Expressions are validated against `extractor`.
    pub fn new(
        algorithm: HashAlgorithm,
        key_expression: Option<String>,
        require_key: bool,
        validation_expression: Option<String>,
        extractor: Arc<dyn KeyExtractor>,
    ) -> Result<Self, IdempotencyError> {
        for expression in key_expression.iter().chain(validation_expression.iter()) {
            extractor
                .validate(expression)
                .map_err(|e| IdempotencyError::configuration(e.to_string()))?;
        }
        Ok(Self {
            algorithm,
            key_expression,
            require_key,
            validation_expression,
            extractor,
        })
    }

    /// Returns the configured digest.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Returns true if payload validation is configured.
    pub fn validates_payload(&self) -> bool {
        self.validation_expression.is_some()
    }

    /// Hashes a JSON value in canonical form.
    pub fn hash_value(&self, value: &Value) -> String {
        self.algorithm.hex_digest(canonical_json(value).as_bytes())
    }

    /// Computes `<scope>#<hash>` for `input`.
    ///
    /// With a key expression, the hash covers the extracted value. When that
    /// value is missing the call fails if a key is required, otherwise the
    /// whole input is hashed and a warning is logged.
    pub fn idempotency_key(&self, scope: &str, input: &Value) -> Result<String, IdempotencyError> {
        let source = match &self.key_expression {
            Some(expression) => {
                let extracted = self
                    .extractor
                    .extract(expression, input)
                    .map_err(|e| IdempotencyError::configuration(e.to_string()))?;
                if is_missing_key(extracted.as_ref()) {
                    if self.require_key {
                        return Err(IdempotencyError::missing_key(expression.clone()));
                    }
                    tracing::warn!(
                        expression = %expression,
                        "No idempotency key value found, hashing the whole payload"
                    );
                    None
                } else {
                    extracted
                }
            }
            None => None,
        };

        let hashed = match source {
            Some(value) => self.hash_value(&value),
            None => self.hash_value(input),
        };
        Ok(format!("{}#{}", scope, hashed))
    }

    /// Computes the payload hash for validation, or `None` when validation is
    /// not configured.
    pub fn payload_hash(&self, input: &Value) -> Result<Option<String>, IdempotencyError> {
        let Some(expression) = &self.validation_expression else {
            return Ok(None);
        };
        let extracted = self
            .extractor
            .extract(expression, input)
            .map_err(|e| IdempotencyError::configuration(e.to_string()))?;
        Ok(Some(self.hash_value(&extracted.unwrap_or(Value::Null))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::extract::FieldPathExtractor;
    use serde_json::json;

    fn fingerprinter(key: Option<&str>, require: bool, validation: Option<&str>) -> Fingerprinter {
        Fingerprinter::new(
            HashAlgorithm::Md5,
            key.map(String::from),
            require,
            validation.map(String::from),
            Arc::new(FieldPathExtractor),
        )
        .unwrap()
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            HashAlgorithm::Md5.hex_digest(b"abc"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            HashAlgorithm::Sha1.hex_digest(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            HashAlgorithm::Sha256.hex_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(HashAlgorithm::Sha512.hex_digest(b"abc").len(), 128);
        assert_eq!(HashAlgorithm::Blake2b.hex_digest(b"abc").len(), 128);
    }

    #[test]
    fn test_parse_hash_algorithm() {
        assert_eq!("md5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("blake2b".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake2b);
        let err = "crc32".parse::<HashAlgorithm>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": [1, {"z": 0, "y": 1}], "c": "x"}});
        assert_eq!(
            canonical_json(&a),
            r#"{"a":{"c":"x","d":[1,{"y":1,"z":0}]},"b":1}"#
        );
    }

    #[test]
    fn test_key_is_scoped_hash_of_whole_input() {
        let fp = fingerprint_default();
        let input = json!({"order": 1});
        let key = fp.idempotency_key("orders.create", &input).unwrap();
        let expected = HashAlgorithm::Md5.hex_digest(br#"{"order":1}"#);
        assert_eq!(key, format!("orders.create#{}", expected));
    }

    fn fingerprint_default() -> Fingerprinter {
        fingerprinter(None, false, None)
    }

    #[test]
    fn test_key_uses_extracted_value() {
        let fp = fingerprinter(Some("body.order_id"), false, None);
        let a = fp
            .idempotency_key("s", &json!({"body": {"order_id": "o-1", "ts": 1}}))
            .unwrap();
        let b = fp
            .idempotency_key("s", &json!({"body": {"order_id": "o-1", "ts": 2}}))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_key_required() {
        let fp = fingerprinter(Some("body.order_id"), true, None);
        let err = fp.idempotency_key("s", &json!({"body": {}})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKey);
    }

    #[test]
    fn test_decoded_body_with_only_null_fields_is_missing() {
        let fp = fingerprinter(Some("powertools_json(body)"), true, None);
        let input = json!({"body": "{\"id\": null}"});
        let err = fp.idempotency_key("s", &input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKey);
    }

    #[test]
    fn test_missing_key_optional_hashes_whole_input() {
        let fp = fingerprinter(Some("body.order_id"), false, None);
        let input = json!({"body": {"other": 1}});
        let key = fp.idempotency_key("s", &input).unwrap();
        assert_eq!(key, format!("s#{}", fp.hash_value(&input)));
    }

    #[test]
    fn test_payload_hash_only_when_configured() {
        assert_eq!(fingerprint_default().payload_hash(&json!({})).unwrap(), None);

        let fp = fingerprinter(Some("id"), false, Some("amount"));
        let a = fp.payload_hash(&json!({"id": 1, "amount": 10})).unwrap();
        let b = fp.payload_hash(&json!({"id": 1, "amount": 11})).unwrap();
        assert!(a.is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_expression_rejected_at_construction() {
        let result = Fingerprinter::new(
            HashAlgorithm::Md5,
            Some("a..b".to_string()),
            false,
            None,
            Arc::new(FieldPathExtractor),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Configuration);
    }
}
