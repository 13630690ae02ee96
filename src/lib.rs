//! devlink device agent library.
//!
//! Connectivity and lifecycle core of a cloud-connected device: WiFi link,
//! registration checkin, MQTT command channel, persisted identity and OTA
//! firmware replacement. The application builds an [`Agent`] from its port
//! adapters and calls [`Agent::advance`] once per main-loop iteration.
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; host builds get simulation adapters.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod fsm;
pub mod identity;
pub mod link;
pub mod ota;
pub mod protocol;

pub use app::events::AgentEvent;
pub use app::ports::{Callbacks, Platform, Ports};
pub use app::service::Agent;
pub use config::AgentConfig;
pub use error::{Error, Result};
pub use fsm::Phase;
