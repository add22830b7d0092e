//! # Configuration
//!
//! Controller settings loaded from the environment and adjusted by command-line flags.

mod controller;

pub use controller::{ControllerConfig, LockBackend};
