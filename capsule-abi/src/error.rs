//! Error types shared by plugins and the manager

use thiserror::Error;

use crate::types::RegisterStatus;

/// Errors a plugin sees while talking to the manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// The manager refused a capability registration
    #[error("Registration of '{api}' rejected: {status:?}")]
    Rejected { api: String, status: RegisterStatus },

    /// Identifier contains an interior NUL
    #[error("Invalid capability identifier: {0:?}")]
    InvalidIdentifier(String),
}

/// Errors returned by parameter get/set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// No parameter with this identifier is registered
    #[error("Unknown parameter: {0}")]
    UnknownParam(String),

    /// A typed accessor was used with a type other than the registered one
    #[error("Parameter '{param}' holds {expected}, not {found}")]
    TypeMismatch {
        param: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Identifier cannot be exposed across the C boundary
    #[error("Invalid parameter identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A null storage pointer was supplied for parameter '{0}'
    #[error("Null value storage for parameter '{0}'")]
    NullBlob(String),
}

impl ParamError {
    /// Create an unknown-parameter error
    pub fn unknown(ident: impl Into<String>) -> Self {
        Self::UnknownParam(ident.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display() {
        let err = PluginError::Rejected {
            api: "Osi1".to_string(),
            status: RegisterStatus::Duplicate,
        };
        let msg = err.to_string();
        assert!(msg.contains("Osi1"));
        assert!(msg.contains("Duplicate"));
    }

    #[test]
    fn test_unknown_param_display() {
        let err = ParamError::unknown("primal tolerance");
        assert_eq!(err.to_string(), "Unknown parameter: primal tolerance");
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = ParamError::TypeMismatch {
            param: "iter max".to_string(),
            expected: "u32",
            found: "f64",
        };
        let msg = err.to_string();
        assert!(msg.contains("iter max"));
        assert!(msg.contains("u32"));
        assert!(msg.contains("f64"));
    }

    #[test]
    fn test_invalid_identifier_display() {
        let err = ParamError::InvalidIdentifier("bad\0name".to_string());
        assert!(err.to_string().contains("Invalid parameter identifier"));
    }
}
