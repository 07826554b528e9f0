//! Error types for the driver core.
//!
//! Server-reported failures keep the ISC status code so callers can
//! reconstruct the server's diagnosis.

use std::time::Duration;

use thiserror::Error;

// ============================================================================
// ISC status codes raised locally
// ============================================================================

pub const ISC_BAD_TRANS_HANDLE: i32 = 335544332;
pub const ISC_SEGMENT: i32 = 335544366;
pub const ISC_SEGSTR_EOF: i32 = 335544367;
pub const ISC_BAD_STMT_HANDLE: i32 = 335544485;
pub const ISC_NETWORK_ERROR: i32 = 335544721;
pub const ISC_NET_READ_ERR: i32 = 335544726;
pub const ISC_NET_WRITE_ERR: i32 = 335544727;
pub const ISC_INVALID_DIMENSION: i32 = 335544913;

#[derive(Error, Debug)]
pub enum FbError {
    #[error("Server error {code}: {message}")]
    Server { code: i32, message: String },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Invalid state: {0}")]
    StateError(String),

    #[error("Timeout while getting a connection from pool after {timeout:?}")]
    PoolTimeout { timeout: Duration },

    #[error("Pool error: {0}")]
    PoolError(String),

    #[error("Info buffer still truncated after {attempts} attempts")]
    Truncated { attempts: u32 },

    #[error("Unsupported wire type code {0}")]
    UnsupportedType(i32),

    #[error("Array field {relation}.{field} is not describable")]
    NotDescribable { relation: String, field: String },

    #[error("Invalid array dimension count {0}")]
    InvalidDimension(usize),

    #[error("Type conversion error: {0}")]
    TypeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FbError {
    /// Shorthand for a server-reported failure.
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        FbError::Server {
            code,
            message: message.into(),
        }
    }

    /// The ISC status code carried by this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            FbError::Server { code, .. } => Some(*code),
            FbError::InvalidDimension(_) => Some(ISC_INVALID_DIMENSION),
            _ => None,
        }
    }

    /// Whether the attachment that produced this error must be discarded.
    pub fn is_fatal_for_connection(&self) -> bool {
        match self {
            FbError::IoError(_) => true,
            FbError::Server { code, .. } => matches!(
                *code,
                ISC_NETWORK_ERROR | ISC_NET_READ_ERR | ISC_NET_WRITE_ERR
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FbError>;
