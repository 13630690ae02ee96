//! Agent façade: the hexagonal core the application drives.
//!
//! [`Agent`] owns the lifecycle FSM and the shared context. The surrounding
//! application constructs it once with its [`Ports`] and [`Callbacks`] and
//! calls [`advance`](Agent::advance) from its main loop.
//!
//! ```text
//!  RadioPort ─┐                              ┌─▶ EventSink
//!  MqttSession┼─▶ ┌────────────────────────┐ │
//!  Http/Clock ┘   │         Agent          │─┼─▶ ConfigSink
//!  StoragePort ◀──│  FSM · context · OTA   │ └─▶ FinalizeHook
//!                 └────────────────────────┘
//! ```

use log::{info, warn};

use crate::config::AgentConfig;
use crate::error::Result;
use crate::fsm::context::{AgentContext, ConnectionState, Endpoints};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, Phase};
use crate::identity::DeviceIdentity;
use crate::link;
use crate::protocol::checkin;
use crate::protocol::dispatch::DispatchOutcome;

use super::events::AgentEvent;
use super::ports::{Callbacks, Platform, Ports};

// ───────────────────────────────────────────────────────────────
// Agent
// ───────────────────────────────────────────────────────────────

pub struct Agent<P: Platform> {
    fsm: Fsm<P>,
    ctx: AgentContext<P>,
}

impl<P: Platform> Agent<P> {
    /// Build the agent and run `Init`: build constants and the persisted
    /// identity are loaded before this returns, and the lifecycle sits in
    /// `ConnectWifi`.
    pub fn new(config: AgentConfig, ports: Ports<P>, callbacks: Callbacks) -> Self {
        if let Err(e) = config.validate() {
            warn!("Agent configuration: {}", e);
        }
        let ctx = AgentContext::new(config, ports, callbacks);
        let fsm = Fsm::new(build_state_table(), Phase::Init);
        let mut agent = Self { fsm, ctx };

        agent.fsm.start(&mut agent.ctx);
        agent.advance();
        info!(
            "Agent {} started in {:?}",
            agent.ctx.hardware_id,
            agent.fsm.current_phase()
        );
        agent
    }

    // ── Per-iteration driver ──────────────────────────────────

    /// Run one lifecycle step. Never panics, never fails; errors are
    /// logged and surfaced as [`AgentEvent::OperationFailed`].
    pub fn advance(&mut self) {
        if self.ctx.restart_pending {
            return;
        }
        let from = self.fsm.current_phase();
        let to = self.fsm.tick(&mut self.ctx);
        if to != from {
            self.ctx.emit(AgentEvent::PhaseChanged { from, to });
        }
    }

    // ── Application actions ───────────────────────────────────

    /// Replace the reported status. Checks in again when the link is up
    /// and publishes `{"status":"<text>"}` on the status channel.
    pub fn set_status(&mut self, text: &str) {
        self.ctx.status = text.into();
        checkin::report_if_connected(&mut self.ctx);
        self.ctx.report_status(text);
    }

    /// Attach a geolocation to future checkins and check in again when
    /// the link is up.
    pub fn set_location(&mut self, lat: f64, lon: f64) {
        self.ctx.location = Some((lat, lon));
        checkin::report_if_connected(&mut self.ctx);
    }

    /// Run a checkin now, regardless of phase.
    pub fn checkin(&mut self) -> Result<DispatchOutcome> {
        checkin::checkin(&mut self.ctx)
    }

    /// Publish `message` on the device channel.
    pub fn publish(&mut self, message: &str, retain: bool) -> Result<()> {
        self.ctx.publish_device(message, retain)
    }

    /// Publish a retained `message` on the status channel.
    pub fn publish_status(&mut self, message: &str) -> Result<()> {
        self.ctx.publish_status(message, true)
    }

    /// Provision the API key and owner, e.g. from a setup portal, and
    /// persist them at once. Values under five characters are ignored.
    /// A `ConnectApi` parked for lack of a key checks in on the next
    /// `advance()`.
    pub fn set_credentials(&mut self, api_key: &str, owner: &str) -> Result<()> {
        if !self.ctx.identity.provision(api_key, owner) {
            return Ok(());
        }
        info!("Agent: credentials provisioned for owner {}", self.ctx.identity.owner);
        self.ctx.persist_identity()
    }

    /// Restart the WiFi retry budget from zero.
    pub fn reset_wifi_retry(&mut self) {
        link::reset_retry(&mut self.ctx);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.fsm.current_phase()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.ctx.identity
    }

    pub fn connection(&self) -> ConnectionState {
        self.ctx.conn
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.ctx.endpoints
    }

    pub fn hardware_id(&self) -> &str {
        &self.ctx.hardware_id
    }

    pub fn status(&self) -> &str {
        &self.ctx.status
    }

    /// A flash succeeded and the agent only waits for the restart.
    pub fn restart_pending(&self) -> bool {
        self.ctx.restart_pending
    }

    pub fn ticks_in_phase(&self) -> u64 {
        self.fsm.ticks_in_current_state()
    }

    /// The adapters, for inspection.
    pub fn ports(&self) -> &Ports<P> {
        &self.ctx.ports
    }

    pub fn ports_mut(&mut self) -> &mut Ports<P> {
        &mut self.ctx.ports
    }
}
