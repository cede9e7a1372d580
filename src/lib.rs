//! peakcharge library - off-peak EV charging scheduler
//!
//! This module exports internal components for integration testing.

pub mod cli;
pub mod clock;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod health;
pub mod policy;
pub mod redact;
pub mod scheduler;
pub mod status;
pub mod window;
