//! Job invocation payload and its stored encoding.
//!
//! A job is stored as two text columns: the invocation descriptor (target type,
//! method and parameter types) and the serialized argument list. The framework
//! owns the meaning of these values; this module only encodes and decodes them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ModelError, ModelResult};

/// What to call for a job and with which (already serialized) arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub type_name: String,
    pub method: String,
    pub parameter_types: Vec<String>,
    /// One serialized value per parameter, in call order.
    pub arguments: Vec<String>,
}

/// The stored invocation descriptor (`job.invocation_data`).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvocationDescriptor {
    #[serde(rename = "type")]
    type_name: String,
    method: String,
    #[serde(default)]
    parameter_types: Vec<String>,
}

/// Why a stored job could not be turned back into an [`Invocation`].
///
/// Returned as data from job reads, never raised, so one corrupt job does not
/// abort a caller iterating over many.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not load job: {message}")]
pub struct JobLoadError {
    pub message: String,
}

impl JobLoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Invocation {
    pub fn new(type_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
            parameter_types: Vec::new(),
            arguments: Vec::new(),
        }
    }

    /// Append one argument with its declared parameter type.
    pub fn with_argument(
        mut self,
        parameter_type: impl Into<String>,
        serialized_value: impl Into<String>,
    ) -> Self {
        self.parameter_types.push(parameter_type.into());
        self.arguments.push(serialized_value.into());
        self
    }

    /// Check the shape required before a job may be stored.
    pub fn validate(&self) -> ModelResult<()> {
        if self.type_name.trim().is_empty() {
            return Err(ModelError::encoding("invocation type name is empty"));
        }
        if self.method.trim().is_empty() {
            return Err(ModelError::encoding("invocation method is empty"));
        }
        if self.parameter_types.len() != self.arguments.len() {
            return Err(ModelError::encoding(format!(
                "{} parameter types but {} arguments",
                self.parameter_types.len(),
                self.arguments.len()
            )));
        }
        Ok(())
    }

    /// Encode into `(invocation_data, arguments)` column values.
    pub fn encode(&self) -> ModelResult<(String, String)> {
        self.validate()?;
        let descriptor = InvocationDescriptor {
            type_name: self.type_name.clone(),
            method: self.method.clone(),
            parameter_types: self.parameter_types.clone(),
        };
        let invocation_data = serde_json::to_string(&descriptor)
            .map_err(|e| ModelError::encoding(format!("invocation descriptor: {e}")))?;
        let arguments = serde_json::to_string(&self.arguments)
            .map_err(|e| ModelError::encoding(format!("arguments: {e}")))?;
        Ok((invocation_data, arguments))
    }

    /// Decode stored column values.
    pub fn decode(invocation_data: &str, arguments: &str) -> Result<Self, JobLoadError> {
        let descriptor: InvocationDescriptor = serde_json::from_str(invocation_data)
            .map_err(|e| JobLoadError::new(format!("invocation descriptor: {e}")))?;
        let arguments: Vec<String> = serde_json::from_str(arguments)
            .map_err(|e| JobLoadError::new(format!("arguments: {e}")))?;

        let invocation = Self {
            type_name: descriptor.type_name,
            method: descriptor.method,
            parameter_types: descriptor.parameter_types,
            arguments,
        };
        invocation
            .validate()
            .map_err(|e| JobLoadError::new(e.to_string()))?;
        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Invocation {
        Invocation::new("Mailer", "send")
            .with_argument("String", "\"alice@example.com\"")
            .with_argument("Int32", "3")
    }

    #[test]
    fn encoded_descriptor_uses_stored_field_names() {
        let (data, args) = sample().encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["type"], "Mailer");
        assert_eq!(value["method"], "send");
        assert_eq!(value["parameterTypes"][1], "Int32");
        assert_eq!(args, r#"["\"alice@example.com\"","3"]"#);
    }

    #[test]
    fn decode_restores_encoded_invocation() {
        let original = sample();
        let (data, args) = original.encode().unwrap();
        assert_eq!(Invocation::decode(&data, &args).unwrap(), original);
    }

    #[test]
    fn encode_rejects_missing_method() {
        let err = Invocation::new("Mailer", " ").encode().unwrap_err();
        assert!(matches!(err, ModelError::Encoding(_)));
    }

    #[test]
    fn decode_reports_garbage_as_load_error() {
        let err = Invocation::decode("{not json", "[]").unwrap_err();
        assert!(err.message.contains("invocation descriptor"));

        let err = Invocation::decode(r#"{"type":"A","method":"b","parameterTypes":["X"]}"#, "[]")
            .unwrap_err();
        assert!(err.message.contains("parameter types"));
    }
}
