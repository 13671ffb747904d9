//! rally-core: wire format and configuration shared by every Rally crate.

pub mod config;
pub mod wire;

pub use config::{ConfigError, RallyConfig};
pub use wire::{
    Body, Envelope, Kind, PeerId, ProbeId, Timestamp, TransferId, TransferMetadata, WireError,
};
