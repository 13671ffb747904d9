//! CLI command modules.

pub mod game;
pub mod http;
pub mod status;
pub mod transfers;
