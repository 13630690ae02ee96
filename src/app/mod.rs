//! Application core: the agent façade and its boundary.
//!
//! [`service::Agent`] is what the surrounding firmware loop holds and calls
//! once per iteration. All interaction with radios, sockets and flash goes
//! through the **port traits** in [`ports`], keeping this layer fully
//! testable without real peripherals.

pub mod events;
pub mod ports;
pub mod service;
