//! Integration test driver for the `tests/integration/` suites.
//!
//! Each `mod` below maps to a file that drives a full [`devlink::Agent`]
//! against mock adapters. All tests run on the host with no radio, broker
//! or flash required.

#![cfg(not(target_os = "espidf"))]

mod dispatch_tests;
mod identity_tests;
mod lifecycle_tests;
mod ota_tests;
