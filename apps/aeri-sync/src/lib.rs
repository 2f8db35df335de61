//! Controller-side state synchronization for AERI LIGHT multi-zone LED
//! controllers.
//!
//! The [`sync::SyncCore`] state machine keeps an optimistic local mirror of
//! the device, coalesces commands per zone field and reconciles every
//! outcome; [`engine::SyncEngine`] drives it over a [`transport::DeviceTransport`].

pub mod app;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod sync;
pub mod telemetry;
pub mod transport;

pub use config::Config;
pub use engine::{SyncEngine, SyncHandle};
pub use error::{AdminError, SyncError};
pub use model::{Delivery, DeviceSnapshot, Field, FieldValue, ZoneId};
pub use sync::{Connectivity, Notice, SyncEvent};
