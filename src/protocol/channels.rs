//! MQTT channel names and status message bodies.
//!
//! Every device owns two channels:
//!
//! ```text
//! /<owner>/<udid>          commands from the service (subscribed)
//! /<owner>/<udid>/status   device status (published, sometimes retained)
//! ```

use core::fmt::Write as _;

use serde::Serialize;

use crate::error::ParseError;

/// Upper bound for a channel name; owner and UDID are at most 64 bytes each.
pub const CHANNEL_CAPACITY: usize = 160;

pub type Channel = heapless::String<CHANNEL_CAPACITY>;

/// Status strings published on the status channel.
pub mod status {
    pub const CONNECTED: &str = "connected";
    /// Registered as the broker last will.
    pub const DISCONNECTED: &str = "disconnected";
    pub const UPDATE_STARTED: &str = "update_started";
    pub const REBOOTING: &str = "rebooting";
    pub const MQTT_UPDATE_FAILED: &str = "mqtt_update_failed";
}

/// Sent once a pending update shows up as the running firmware.
pub const UPDATE_SUCCESS_NOTICE: &str = r#"{"title":"Update Successful","body":"The device has been successfully updated.","type":"success"}"#;

/// Asks the user to confirm an update when auto-update is off.
/// The answer arrives as a `notification` payload.
pub const UPDATE_PROMPT: &str = r#"{"title":"Update Available","body":"There is an update available for this device. Do you want to install it now?","type":"actionable","response_type":"bool"}"#;

/// Command and status channel of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttChannels {
    pub device: Channel,
    pub status: Channel,
}

impl MqttChannels {
    /// Build both names. `None` if they would not fit [`CHANNEL_CAPACITY`].
    pub fn new(owner: &str, udid: &str) -> Option<Self> {
        let mut device = Channel::new();
        write!(device, "/{owner}/{udid}").ok()?;
        let mut status = device.clone();
        status.push_str("/status").ok()?;
        Some(Self { device, status })
    }
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    status: &'a str,
}

/// Encode `{"status":"<text>"}` with proper escaping.
pub fn status_message(text: &str) -> Result<String, ParseError> {
    serde_json::to_string(&StatusMessage { status: text }).map_err(|_| ParseError::Encode)
}
