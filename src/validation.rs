//! Payload validation for successful responses
//!
//! A 2xx response only counts when its body is a JSON object that carries the
//! configured required fields and whose identity field names the item we
//! asked for.

use crate::config::ValidationConfig;

/// Outcome of checking a response body
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validation {
    /// Body is the requested record
    Valid,
    /// Body is malformed or describes a different record
    Invalid {
        /// Why the body was rejected
        reason: String,
    },
    /// Nothing to validate (the attempt did not produce a body)
    NotApplicable,
}

impl Validation {
    /// Whether the payload passed validation
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

/// Validate a response body for `item_id`
pub fn validate_payload(config: &ValidationConfig, item_id: &str, body: &[u8]) -> Validation {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            return Validation::Invalid {
                reason: format!("body is not valid JSON: {e}"),
            };
        }
    };

    let Some(object) = value.as_object() else {
        return Validation::Invalid {
            reason: "body is not a JSON object".to_string(),
        };
    };

    if let Some(missing) = config
        .required_fields
        .iter()
        .find(|field| object.get(field.as_str()).is_none_or(|v| v.is_null()))
    {
        return Validation::Invalid {
            reason: format!("missing required field '{missing}'"),
        };
    }

    let identity = match object.get(&config.identity_field) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(_) => {
            return Validation::Invalid {
                reason: format!("field '{}' is not a string", config.identity_field),
            };
        }
        None => {
            return Validation::Invalid {
                reason: format!("missing identity field '{}'", config.identity_field),
            };
        }
    };

    if !identity.eq_ignore_ascii_case(item_id) {
        return Validation::Invalid {
            reason: format!("identity mismatch: requested '{item_id}', got '{identity}'"),
        };
    }

    Validation::Valid
}
