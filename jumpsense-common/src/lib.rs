//! # JumpSense Common Library
//!
//! Shared code for the JumpSense crates:
//! - Error and result types
//! - Configuration file resolution (TOML)
//! - Logging initialisation
//! - Sensor timestamp utilities

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
pub use time::Timestamp;
