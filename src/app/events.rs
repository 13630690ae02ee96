//! Outbound agent events.
//!
//! The [`Agent`](super::service::Agent) emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them (serial log, status LED, telemetry).

use crate::error::Error;
use crate::fsm::Phase;
use crate::ota::FlashOutcome;

/// Structured events emitted by the agent core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The lifecycle moved between phases.
    PhaseChanged { from: Phase, to: Phase },

    /// The service assigned (or confirmed) this device's UDID.
    Registered { udid: String },

    /// An update is waiting for the user to confirm it.
    UpdatePending { url: String },

    /// A previously pending update is now running.
    UpdateLanded,

    /// A firmware flash finished (successfully or not).
    UpdateFinished(FlashOutcome),

    /// The WiFi radio gave up and started the fallback access point.
    AccessPointFallback,

    /// A recoverable error surfaced during an operation.
    OperationFailed(Error),
}
