//! Error taxonomy for the binding boundary
//!
//! Every failure that can reach the scripting side is a [`BridgeError`].
//! Validation failures are returned synchronously at the call site; failures
//! inside work items travel back through the call invoker as promise
//! rejections. Both paths carry the same type.

use thiserror::Error;

/// Result alias used across the bridge
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Stable classification of a [`BridgeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    MissingRequiredField,
    TypeMismatch,
    UnsupportedAlgorithm,
    NativeInitializationError,
    NativeOperationError,
    Cancelled,
    Timeout,
}

impl ErrorKind {
    /// Name surfaced to the runtime as the exception code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::MissingRequiredField => "MissingRequiredField",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::UnsupportedAlgorithm => "UnsupportedAlgorithm",
            ErrorKind::NativeInitializationError => "NativeInitializationError",
            ErrorKind::NativeOperationError => "NativeOperationError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Timeout => "Timeout",
        }
    }
}

/// Runtime-visible failure of a bridge call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Wrong argument count or malformed payload
    #[error("{operation}: {detail}")]
    InvalidArgument { operation: String, detail: String },

    /// Named property absent on an object argument
    #[error("{operation}: {field} is required")]
    MissingRequiredField { operation: String, field: String },

    /// Argument or field has the wrong runtime type
    #[error("{operation}: {field} must be {expected}, got {actual}")]
    TypeMismatch {
        operation: String,
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Unknown curve, cipher or digest name
    #[error("{operation}: {family} {name} not supported")]
    UnsupportedAlgorithm {
        operation: String,
        family: &'static str,
        name: String,
    },

    /// The native library rejected the configuration
    #[error("{operation}: native initialization failed: {reason}")]
    NativeInitialization { operation: String, reason: String },

    /// Failure during an operational call
    #[error("{operation}: {reason}")]
    NativeOperation { operation: String, reason: String },

    /// Work item dropped before it started executing
    #[error("{operation}: cancelled before execution")]
    Cancelled { operation: String },

    /// A blocking await on the runtime thread gave up
    #[error("{operation}: timed out after {waited_ms} ms")]
    Timeout { operation: String, waited_ms: u64 },
}

impl BridgeError {
    pub fn invalid_argument(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        BridgeError::InvalidArgument {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    pub fn missing_field(operation: impl Into<String>, field: impl Into<String>) -> Self {
        BridgeError::MissingRequiredField {
            operation: operation.into(),
            field: field.into(),
        }
    }

    pub fn type_mismatch(
        operation: impl Into<String>,
        field: impl Into<String>,
        expected: &'static str,
        actual: &'static str,
    ) -> Self {
        BridgeError::TypeMismatch {
            operation: operation.into(),
            field: field.into(),
            expected,
            actual,
        }
    }

    pub fn unsupported(
        operation: impl Into<String>,
        family: &'static str,
        name: impl Into<String>,
    ) -> Self {
        BridgeError::UnsupportedAlgorithm {
            operation: operation.into(),
            family,
            name: name.into(),
        }
    }

    pub fn native_init(operation: impl Into<String>, reason: impl ToString) -> Self {
        BridgeError::NativeInitialization {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn native_op(operation: impl Into<String>, reason: impl ToString) -> Self {
        BridgeError::NativeOperation {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        BridgeError::Cancelled {
            operation: operation.into(),
        }
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            BridgeError::MissingRequiredField { .. } => ErrorKind::MissingRequiredField,
            BridgeError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            BridgeError::UnsupportedAlgorithm { .. } => ErrorKind::UnsupportedAlgorithm,
            BridgeError::NativeInitialization { .. } => ErrorKind::NativeInitializationError,
            BridgeError::NativeOperation { .. } => ErrorKind::NativeOperationError,
            BridgeError::Cancelled { .. } => ErrorKind::Cancelled,
            BridgeError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Exception code string for the runtime side
    pub fn code(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Name of the operation that failed
    pub fn operation(&self) -> &str {
        match self {
            BridgeError::InvalidArgument { operation, .. }
            | BridgeError::MissingRequiredField { operation, .. }
            | BridgeError::TypeMismatch { operation, .. }
            | BridgeError::UnsupportedAlgorithm { operation, .. }
            | BridgeError::NativeInitialization { operation, .. }
            | BridgeError::NativeOperation { operation, .. }
            | BridgeError::Cancelled { operation }
            | BridgeError::Timeout { operation, .. } => operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_message_names_field() {
        let err = BridgeError::missing_field("createECDH", "curve_name");
        assert_eq!(err.to_string(), "createECDH: curve_name is required");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = BridgeError::type_mismatch("createECDH", "params", "an object", "string");
        assert_eq!(
            err.to_string(),
            "createECDH: params must be an object, got string"
        );
        assert_eq!(err.code(), "TypeMismatch");
    }

    #[test]
    fn test_operation_accessor() {
        let err = BridgeError::cancelled("ecdh.generateKeysAsync");
        assert_eq!(err.operation(), "ecdh.generateKeysAsync");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
