//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every [`AgentEvent`] to the `log`
//! facade (UART / USB-CDC through `esp_idf_logger` in production).

use log::{info, warn};

use crate::app::events::AgentEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AgentEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::PhaseChanged { from, to } => info!("PHASE | {:?} -> {:?}", from, to),
            AgentEvent::Registered { udid } => info!("REGISTER | udid={}", udid),
            AgentEvent::UpdatePending { url } => info!("UPDATE | pending {}", url),
            AgentEvent::UpdateLanded => info!("UPDATE | landed"),
            AgentEvent::UpdateFinished(outcome) => info!("UPDATE | finished: {:?}", outcome),
            AgentEvent::AccessPointFallback => warn!("WIFI | access point fallback"),
            AgentEvent::OperationFailed(e) => warn!("ERROR | {}", e),
        }
    }
}
