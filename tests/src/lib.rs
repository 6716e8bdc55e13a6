//! # Photon-Flow Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/       # Cross-subsystem choreography
//!     ├── choreography.rs  # End-to-end upload-to-events scenarios
//!     └── laws.rs          # Idempotence and boundary properties
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p pf-tests
//!
//! # By category
//! cargo test -p pf-tests integration::choreography::
//! cargo test -p pf-tests integration::laws::
//! ```

#![allow(dead_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod integration;
