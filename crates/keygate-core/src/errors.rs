//! Unified error system for Keygate
//!
//! Every engine operation resolves to a single shape: a numeric [`ErrorCode`]
//! plus a human-readable message. Collaborator failures are caught at their
//! call site and converted into a code; nothing crosses a task boundary as a
//! panic or an untyped error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Caller-side precondition failed; no hardware was touched
    Precondition,
    /// Key hierarchy is not in the state the operation requires
    KeyState,
    /// Sensor or secure hardware refused the operation
    Hardware,
    /// A network collaborator failed or refused
    Network,
    /// Single-flight admission or engine-side cancellation
    Admission,
    /// Export blob could not be decoded
    Codec,
    /// Persistence or engine-internal failure
    Internal,
}

/// Stable numeric result codes delivered to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    NotInitialized = 1,
    DeviceUnsupported = 2,
    SceneUnregistered = 3,
    InvalidParameter = 4,

    RootKeyAbsent = 10,
    SceneKeyAbsent = 11,
    SceneKeyExpired = 12,
    SignatureInvalid = 13,
    RootKeyGenerationFailed = 14,
    SceneKeyGenerationFailed = 15,
    KeyRemovalFailed = 16,
    KeyExportFailed = 17,
    KeyIndeterminate = 18,

    SensorLocked = 20,
    UserCancelled = 21,
    AuthenticationFailed = 22,
    NoBiometricEnrolled = 23,
    SensorUnavailable = 24,

    GetChallengeFailed = 30,
    UploadOrVerifyFailed = 31,
    UploadKeyFailed = 32,
    GetSupportFailed = 33,

    AdmissionRejected = 40,
    Cancelled = 41,

    ExportBlobOversize = 50,
    ExportBlobTruncated = 51,
    ExportBlobMalformed = 52,

    StorageFailed = 60,
    Internal = 61,
}

impl ErrorCode {
    /// Numeric value handed to callers
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Taxonomy bucket this code belongs to
    pub fn category(self) -> ErrorCategory {
        match self.as_i32() {
            1..=9 => ErrorCategory::Precondition,
            10..=19 => ErrorCategory::KeyState,
            20..=29 => ErrorCategory::Hardware,
            30..=39 => ErrorCategory::Network,
            40..=49 => ErrorCategory::Admission,
            50..=59 => ErrorCategory::Codec,
            _ => ErrorCategory::Internal,
        }
    }

    /// Whether re-running key preparation can resolve this failure
    pub fn requires_key_preparation(self) -> bool {
        matches!(
            self,
            ErrorCode::RootKeyAbsent
                | ErrorCode::SceneKeyAbsent
                | ErrorCode::SceneKeyExpired
                | ErrorCode::SignatureInvalid
        )
    }

    /// Short description used when no detail message is available
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::NotInitialized => "engine not initialized",
            ErrorCode::DeviceUnsupported => "device does not support biometric keys",
            ErrorCode::SceneUnregistered => "scene was not registered at init",
            ErrorCode::InvalidParameter => "invalid parameter",
            ErrorCode::RootKeyAbsent => "root key absent or invalid",
            ErrorCode::SceneKeyAbsent => "scene key absent",
            ErrorCode::SceneKeyExpired => "scene key expired",
            ErrorCode::SignatureInvalid => "signature invalid",
            ErrorCode::RootKeyGenerationFailed => "root key generation failed",
            ErrorCode::SceneKeyGenerationFailed => "scene key generation failed",
            ErrorCode::KeyRemovalFailed => "key removal failed",
            ErrorCode::KeyExportFailed => "key export failed",
            ErrorCode::KeyIndeterminate => "key state indeterminate",
            ErrorCode::SensorLocked => "biometric sensor locked",
            ErrorCode::UserCancelled => "user cancelled",
            ErrorCode::AuthenticationFailed => "biometric authentication failed",
            ErrorCode::NoBiometricEnrolled => "no biometric enrolled",
            ErrorCode::SensorUnavailable => "biometric hardware unavailable",
            ErrorCode::GetChallengeFailed => "challenge fetch failed",
            ErrorCode::UploadOrVerifyFailed => "signature upload or verification failed",
            ErrorCode::UploadKeyFailed => "key upload failed",
            ErrorCode::GetSupportFailed => "support query failed",
            ErrorCode::AdmissionRejected => "same task already in flight",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::ExportBlobOversize => "export blob length exceeds limit",
            ErrorCode::ExportBlobTruncated => "export blob truncated",
            ErrorCode::ExportBlobMalformed => "export blob malformed",
            ErrorCode::StorageFailed => "preference storage failed",
            ErrorCode::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_i32())
    }
}

/// The single error shape delivered to every engine callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct KeygateError {
    /// Taxonomy code
    pub code: ErrorCode,
    /// Detail message
    pub message: String,
}

impl KeygateError {
    /// Create an error with an explicit message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an error carrying the code's default description
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.description())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageFailed, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Numeric code
    pub fn code_value(&self) -> i32 {
        self.code.as_i32()
    }

    /// Category of the underlying code
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

/// Standard Result type for Keygate operations
pub type KeygateResult<T> = std::result::Result<T, KeygateError>;

/// Extension for attaching a code to foreign errors at their call site
pub trait ResultExt<T> {
    /// Convert the error into a [`KeygateError`] with `code` and a context prefix
    fn with_code(self, code: ErrorCode, context: &str) -> KeygateResult<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_code(self, code: ErrorCode, context: &str) -> KeygateResult<T> {
        self.map_err(|e| KeygateError::new(code, format!("{context}: {e}")))
    }
}
