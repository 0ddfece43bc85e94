//! Lucent Application
//!
//! The sync coordinator tying a scene host to the optical compositor,
//! the message protocol spoken with the host, and configuration.

mod config;
mod coordinator;
mod pipeline;
mod protocol;
mod writeback;

pub use config::{AppConfig, ConfigError, RecapturePolicy};
pub use coordinator::{BatchOutcome, BatchReport, SyncCoordinator, SyncHandle};
pub use pipeline::{CycleError, CycleResult, RenderCycle, RenderedGlass};
pub use protocol::{decode_data_url, encode_data_url, ImageCaptured, Inbound, Outbound, ProtocolError};
pub use writeback::{Recorder, WriteBack, WriteBackError};
