// error.rs — map load and configuration errors

use thiserror::Error;

/// Broad classification of a `CmError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CorruptMapData,
    LimitExceeded,
    BadConfig,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CmError {
    /// A lump references something that does not exist or is malformed.
    #[error("corrupt map data in {lump}: {reason}")]
    CorruptMapData { lump: &'static str, reason: String },

    #[error("{what} exceeds limit ({count} > {max})")]
    LimitExceeded {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("unknown collision cvar \"{0}\"")]
    UnknownCvar(String),

    #[error("bad value \"{value}\" for {name}")]
    BadCvarValue { name: String, value: String },
}

impl CmError {
    pub fn corrupt(lump: &'static str, reason: impl Into<String>) -> Self {
        CmError::CorruptMapData {
            lump,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CmError::CorruptMapData { .. } => ErrorKind::CorruptMapData,
            CmError::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            CmError::UnknownCvar(_) | CmError::BadCvarValue { .. } => ErrorKind::BadConfig,
        }
    }
}

pub type CmResult<T> = Result<T, CmError>;

/// Fails with `LimitExceeded` when `count > max`.
pub fn check_limit(what: &'static str, count: usize, max: usize) -> CmResult<()> {
    if count > max {
        return Err(CmError::LimitExceeded { what, count, max });
    }
    Ok(())
}
