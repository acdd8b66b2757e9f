//! Common test utilities and helpers
//!
//! This module provides shared utilities for the integration tests:
//! - A scripted in-memory transport
//! - Engine fixtures with a manual clock and memory storage
//! - Custom assertion macros

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod mock_transport;

// Re-export commonly used utilities
pub use fixtures::*;
pub use mock_transport::*;
