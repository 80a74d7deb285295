//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the chart enrichment crates:
//! - Logging and tracing setup
//! - Configuration and bridge injection
//! - Event bus for refresh lifecycle notifications
//!
//! Other crates depend on this one for the conventions it establishes, not
//! for any domain logic.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
