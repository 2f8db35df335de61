use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::model::{Field, ZoneId};
use crate::transport::{TransportError, WireError};

/// Errors returned to callers of the engine. Runtime transport failures never
/// surface here; they become notices and connectivity transitions instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("unknown zone '{0}'")]
    UnknownZone(String),
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("zone {zone} has no {field} field")]
    UnsupportedField { zone: ZoneId, field: Field },
    #[error("invalid {field} value: {reason}")]
    InvalidValue { field: Field, reason: String },
    #[error("invalid PIN: {0}")]
    InvalidPin(String),
    #[error("sync engine has shut down")]
    EngineClosed,
}

/// Failure of a one-shot device request (preset lookup, PIN change, reset).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("device did not answer within {0:?}")]
    NoAnswer(Duration),
    #[error("{0}")]
    Failed(String),
}
