//! Error taxonomy (§7).
//!
//! One enum per concern, in the style of the original `wsi_streamer::error`:
//! `thiserror` derives, `#[from]` conversions where a lower layer's error is
//! always a cause, plain string payloads where an upstream SDK only gives
//! us text.

use thiserror::Error;

/// I/O errors produced anywhere in the reader chain (§7).
///
/// Every variant that can be attributed to a specific read carries the
/// resource identity of the lowest-level reader that failed, and the
/// offset/length being read where applicable — "user-visible behavior" in
/// §7.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Caller supplied bad parameters: negative/overflowing offset or
    /// length, a read-only or too-small target buffer, a non-power-of-two
    /// block size.
    #[error("invalid argument for {identity}: {message}")]
    InvalidArgument { identity: String, message: String },

    /// The resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication or authorization was refused.
    #[error("permission denied for {identity}: {message}")]
    PermissionDenied { identity: String, message: String },

    /// Transient backend/transport failure; safe to retry.
    #[error("unavailable: {identity}: {message}")]
    Unavailable { identity: String, message: String },

    /// A cache entry was inconsistent (file missing or short, length
    /// mismatch between index and content).
    #[error("corrupt cache entry for {identity}: {message}")]
    Corrupt { identity: String, message: String },

    /// The backend refuses range requests, or the URI scheme has no
    /// registered provider.
    #[error("unsupported: {identity}: {message}")]
    Unsupported { identity: String, message: String },

    /// Catch-all for unclassified lower-level failure.
    #[error("io error for {identity}: {message}")]
    Io { identity: String, message: String },

    /// Caller cancellation was observed.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl IoError {
    pub fn invalid_argument(identity: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::InvalidArgument {
            identity: identity.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(identity: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Unavailable {
            identity: identity.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(identity: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Unsupported {
            identity: identity.into(),
            message: message.into(),
        }
    }

    pub fn io(identity: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Io {
            identity: identity.into(),
            message: message.into(),
        }
    }

    pub fn corrupt(identity: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Corrupt {
            identity: identity.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied(identity: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::PermissionDenied {
            identity: identity.into(),
            message: message.into(),
        }
    }

    /// The resource identity this error is attributed to, when known.
    pub fn identity(&self) -> Option<&str> {
        match self {
            IoError::InvalidArgument { identity, .. }
            | IoError::PermissionDenied { identity, .. }
            | IoError::Unavailable { identity, .. }
            | IoError::Corrupt { identity, .. }
            | IoError::Unsupported { identity, .. }
            | IoError::Io { identity, .. } => Some(identity),
            IoError::NotFound(_) | IoError::Cancelled(_) => None,
        }
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => IoError::NotFound(e.to_string()),
            ErrorKind::PermissionDenied => IoError::PermissionDenied {
                identity: String::new(),
                message: e.to_string(),
            },
            _ => IoError::Io {
                identity: String::new(),
                message: e.to_string(),
            },
        }
    }
}

/// Configuration-time errors: invalid parameter values, bad block sizes,
/// missing required keys (§4.8, §9 "Replacing fluent builders").
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("missing required configuration key: {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("block size must be a positive power of two, got {0}")]
    NotPowerOfTwo(u64),

    #[error("unparseable URI: {0}")]
    InvalidUri(String),
}

/// Provider dispatch errors (§4.8 "Dispatch algorithm").
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("no provider registered with id '{0}'")]
    ProviderNotFound(String),

    #[error("no provider can process URI '{0}'")]
    NoProvider(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] IoError),
}
