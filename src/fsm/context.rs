//! Shared mutable context threaded through every lifecycle handler.
//!
//! `AgentContext` replaces what would otherwise be process-wide globals:
//! the device identity, connection flags, update policy, endpoints and all
//! port adapters live here, and the FSM hands a `&mut` to each handler.

use log::{debug, warn};

use crate::app::events::AgentEvent;
use crate::app::ports::{Callbacks, EventSink, MqttSession, Platform, Ports, RadioPort};
use crate::config::AgentConfig;
use crate::error::{Error, Result, TransportError};
use crate::identity::{self, DeviceIdentity, HardwareId};
use crate::protocol::channels::{self, MqttChannels};
use crate::protocol::checkin::CheckinFields;

/// Status reported in checkins until the application sets its own.
pub const DEFAULT_STATUS: &str = "Registered";

// ---------------------------------------------------------------------------
// Connection flags
// ---------------------------------------------------------------------------

/// Link and session flags. Only lifecycle handlers and the link manager
/// write these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Station link is up.
    pub connected: bool,
    /// An association was started and is being waited on.
    pub wifi_connection_in_progress: bool,
    /// Connect steps since the last success, fallback or reset.
    pub wifi_retry: u32,
    pub mqtt_connected: bool,
    /// The radio gave up and hosts the fallback access point.
    pub ap_fallback: bool,
}

/// Whether announced updates are applied without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePolicy {
    pub auto_update: bool,
    pub forced_update: bool,
}

impl UpdatePolicy {
    /// Neither automatic nor forced: updates wait for the user.
    pub fn requires_confirmation(&self) -> bool {
        !self.auto_update && !self.forced_update
    }
}

/// Where the service lives. Starts from configuration and may be
/// redirected to a local proxy found through discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub cloud_host: String,
    pub api_port: u16,
    pub mqtt_host: String,
    pub mqtt_port: u16,
}

impl Endpoints {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            cloud_host: config.cloud_host.clone(),
            api_port: config.api_port,
            mqtt_host: config.mqtt_host.clone(),
            mqtt_port: config.mqtt_port,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentContext
// ---------------------------------------------------------------------------

pub struct AgentContext<P: Platform> {
    // -- Identity --
    pub config: AgentConfig,
    pub identity: DeviceIdentity,
    pub hardware_id: HardwareId,

    // -- Connectivity --
    pub conn: ConnectionState,
    pub policy: UpdatePolicy,
    pub endpoints: Endpoints,
    /// `now_ms` of the last MQTT connect attempt made from `Completed`.
    pub last_mqtt_attempt_ms: Option<u64>,

    // -- Reported state --
    /// Free-form status sent with every checkin.
    pub status: String,
    /// Latitude and longitude, if the application supplied them.
    pub location: Option<(f64, f64)>,
    /// A checkin response is being dispatched.
    pub checkin_active: bool,

    // -- Lifecycle latches --
    /// The finalize hook already ran.
    pub finalized: bool,
    /// A flash succeeded; only a restart may follow.
    pub restart_pending: bool,

    // -- Collaborators --
    pub ports: Ports<P>,
    pub callbacks: Callbacks,
}

impl<P: Platform> AgentContext<P> {
    pub fn new(config: AgentConfig, ports: Ports<P>, callbacks: Callbacks) -> Self {
        let hardware_id = identity::hardware_id(&ports.radio.mac_address());
        Self {
            identity: DeviceIdentity::from_config(&config),
            hardware_id,
            conn: ConnectionState::default(),
            policy: UpdatePolicy {
                auto_update: config.auto_update,
                forced_update: config.forced_update,
            },
            endpoints: Endpoints::from_config(&config),
            last_mqtt_attempt_ms: None,
            status: DEFAULT_STATUS.into(),
            location: None,
            checkin_active: false,
            finalized: false,
            restart_pending: false,
            ports,
            callbacks,
            config,
        }
    }

    /// Channel names for the current identity, once a UDID is known.
    pub fn channels(&self) -> Option<MqttChannels> {
        if !self.identity.has_udid() {
            return None;
        }
        MqttChannels::new(&self.identity.owner, &self.identity.udid)
    }

    /// Fields for the next checkin body, borrowed from current state.
    pub fn checkin_fields(&self) -> CheckinFields<'_> {
        CheckinFields {
            mac: &self.hardware_id,
            firmware: &self.config.firmware_version,
            version: &self.config.firmware_version_short,
            commit: &self.identity.commit_id,
            owner: &self.identity.owner,
            alias: &self.identity.alias,
            udid: if self.identity.has_udid() {
                &self.identity.udid
            } else {
                ""
            },
            status: &self.status,
            lat: self.location.map(|(lat, _)| lat),
            lon: self.location.map(|(_, lon)| lon),
            platform: &self.config.platform,
        }
    }

    /// Publish a raw message on the status channel.
    pub fn publish_status(&mut self, message: &str, retain: bool) -> Result<()> {
        let channels = self.session_channels()?;
        self.ports
            .mqtt
            .publish(&channels.status, message.as_bytes(), retain)?;
        Ok(())
    }

    /// Publish a raw message on the device channel.
    pub fn publish_device(&mut self, message: &str, retain: bool) -> Result<()> {
        let channels = self.session_channels()?;
        self.ports
            .mqtt
            .publish(&channels.device, message.as_bytes(), retain)?;
        Ok(())
    }

    /// Best-effort `{"status":"<text>"}` on the status channel.
    /// Failures are logged; there is nobody else to tell.
    pub fn report_status(&mut self, text: &str) {
        let message = match channels::status_message(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Status '{}' not encodable: {}", text, e);
                return;
            }
        };
        self.notify(&message);
    }

    /// Best-effort publish of a prepared JSON notice on the status channel.
    pub fn notify(&mut self, message: &str) {
        match self.publish_status(message, false) {
            Ok(()) => debug!("MQTT: status {}", message),
            Err(Error::Transport(TransportError::NotConnected)) => {
                debug!("MQTT: offline, status not sent: {}", message);
            }
            Err(e) => warn!("MQTT: status publish failed: {}", e),
        }
    }

    /// Persist the current identity.
    pub fn persist_identity(&mut self) -> Result<()> {
        identity::save(&mut self.ports.storage, &self.identity)
    }

    pub fn emit(&mut self, event: AgentEvent) {
        self.ports.events.emit(&event);
    }

    /// Log a failed operation and surface it as an event.
    pub fn report_error(&mut self, operation: &str, err: Error) {
        warn!("{} failed: {}", operation, err);
        self.emit(AgentEvent::OperationFailed(err));
    }

    fn session_channels(&self) -> Result<MqttChannels> {
        if !self.conn.mqtt_connected || !self.ports.mqtt.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        self.channels()
            .ok_or_else(|| TransportError::NotConnected.into())
    }
}
