//! # OMCI Testkit
//!
//! Test utilities for the OMCI synchronization engine.
//!
//! This crate provides:
//! - [`SimulatedOnu`], a transport that answers OMCI requests from an
//!   in-memory MIB and alarm table
//! - Agent fixtures wired to a simulated ONU
//! - Property-based test generators using proptest
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use omci_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn reaches_in_sync() {
//!     let t = TestAgent::new(quiet_config(), SimulatedOnu::new());
//!     let device = t.agent.add_device("onu-1").unwrap();
//!     device.start().await.unwrap();
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod onu;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::onu::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use onu::*;
