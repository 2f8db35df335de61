use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::{DeviceSnapshot, Field, FieldValue, ZoneId};
use crate::sync::Outcome;

pub mod http;
pub mod mock;
pub mod websocket;
pub mod wire;

pub use http::HttpTransport;
pub use wire::{PresetDetails, WireError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("device rejected request: {0}")]
    Rejected(String),
    #[error("undecodable payload: {0}")]
    Decode(#[from] WireError),
    #[error("invalid device address: {0}")]
    InvalidUrl(String),
    #[error("transport does not support {0}")]
    Unsupported(&'static str),
}

impl TransportError {
    /// How a failed command send is reported to reconciliation. Only
    /// connect-level failures count as the device being unreachable.
    pub fn into_outcome(self) -> Outcome {
        match self {
            TransportError::Unreachable(reason) => Outcome::TransportError(reason),
            TransportError::Timeout => Outcome::Timeout,
            other => Outcome::Rejected(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Decode(WireError::Json(err.to_string()))
        } else {
            TransportError::Unreachable(err.to_string())
        }
    }
}

/// Stream of full-state pushes. `next` returns `None` once the device closes
/// the channel or it fails.
pub struct LiveChannel {
    rx: mpsc::Receiver<DeviceSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl LiveChannel {
    pub fn new(rx: mpsc::Receiver<DeviceSnapshot>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    pub async fn next(&mut self) -> Option<DeviceSnapshot> {
        self.rx.recv().await
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Everything the sync engine needs from the device link.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn fetch_full_state(&self) -> Result<DeviceSnapshot, TransportError>;

    async fn send_field_update(
        &self,
        zone: ZoneId,
        field: Field,
        value: FieldValue,
    ) -> Result<(), TransportError>;

    /// Whether `open_live_channel` can ever succeed.
    fn has_live_channel(&self) -> bool {
        false
    }

    async fn open_live_channel(&self) -> Result<LiveChannel, TransportError> {
        Err(TransportError::Unsupported("live channel"))
    }

    async fn preset_details(&self, _slot: u8) -> Result<PresetDetails, TransportError> {
        Err(TransportError::Unsupported("preset details"))
    }

    async fn update_pin(&self, _current: &str, _new: &str) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("PIN changes"))
    }

    async fn reset_to_default(&self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("factory reset"))
    }
}
