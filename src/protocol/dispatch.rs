//! Inbound payload classification and dispatch.
//!
//! Responses and MQTT commands are free-form text carrying one JSON object
//! that starts with a known marker:
//!
//! | Marker                 | Kind            |
//! |------------------------|-----------------|
//! | `{"registration"`      | Registration    |
//! | `{"FIRMWARE_UPDATE"`   | Update          |
//! | `{"notification"`      | Notification    |
//! | `{"configuration"`     | Configuration   |
//!
//! When several markers occur, the one starting **latest** wins: the
//! service may prepend protocol noise or echo earlier objects before the
//! payload it means. An unauthorized-owner sentinel after the winner (or
//! anywhere, when nothing matched) aborts with [`Error::Authorization`].
//!
//! The winning object is parsed with a streaming deserializer starting at
//! the marker: exactly one JSON value, trailing bytes ignored. A parse
//! failure changes nothing.

use core::ops::Range;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::app::events::AgentEvent;
use crate::app::ports::Platform;
use crate::error::{Error, ParseError, Result, UpdateError};
use crate::fsm::context::AgentContext;
use crate::identity::PendingUpdate;
use crate::link;
use crate::ota::{self, FlashOutcome};
use crate::protocol::channels::{UPDATE_PROMPT, UPDATE_SUCCESS_NOTICE, status};

pub const REGISTRATION_MARKER: &str = "{\"registration\"";
pub const UPDATE_MARKER: &str = "{\"FIRMWARE_UPDATE\"";
pub const NOTIFICATION_MARKER: &str = "{\"notification\"";
pub const CONFIGURATION_MARKER: &str = "{\"configuration\"";

/// Sent by the service when the owner id compiled into the device is unknown.
pub const UNAUTHORIZED_SENTINEL: &str = "old_protocol_owner:-undefined-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Registration,
    Update,
    Notification,
    Configuration,
    Unknown,
}

impl PayloadKind {
    /// Top-level key of the object this kind arrives in.
    pub fn node(self) -> Option<&'static str> {
        match self {
            Self::Registration => Some("registration"),
            Self::Update => Some("FIRMWARE_UPDATE"),
            Self::Notification => Some("notification"),
            Self::Configuration => Some("configuration"),
            Self::Unknown => None,
        }
    }
}

const MARKERS: [(PayloadKind, &str); 4] = [
    (PayloadKind::Update, UPDATE_MARKER),
    (PayloadKind::Registration, REGISTRATION_MARKER),
    (PayloadKind::Notification, NOTIFICATION_MARKER),
    (PayloadKind::Configuration, CONFIGURATION_MARKER),
];

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Body of `{"registration":{…}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistrationRecord {
    pub status: String,
    pub alias: String,
    pub owner: String,
    pub udid: String,
    pub auto_update: Option<bool>,
    pub forced_update: Option<bool>,
    pub mac: String,
    pub commit: String,
    pub version: String,
    pub url: String,
    pub ott: String,
}

/// Body of `{"FIRMWARE_UPDATE":{…}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdateRecord {
    pub mac: String,
    pub commit: String,
    pub version: String,
    pub url: String,
    pub ott: String,
}

/// Body of `{"notification":{…}}`: the user's answer to a prompt.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotificationRecord {
    pub response_type: String,
    pub response: Value,
}

impl NotificationRecord {
    /// `true` for a boolean `true` or a string `"yes"`, per `response_type`.
    pub fn accepted(&self) -> bool {
        match self.response_type.as_str() {
            "bool" | "boolean" => self.response == Value::Bool(true),
            "string" | "String" => self.response.as_str() == Some("yes"),
            _ => false,
        }
    }
}

/// Replacement station credentials carried by a configuration push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

/// A configuration push. `raw` is the extracted object, byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationRecord {
    pub raw: String,
    pub credentials: Option<WifiCredentials>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadRecord {
    Registration(RegistrationRecord),
    Update(UpdateRecord),
    Notification(NotificationRecord),
    Configuration(ConfigurationRecord),
    Unknown,
}

/// One classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPayload {
    /// Byte range of the extracted object in the raw text.
    pub span: Range<usize>,
    pub record: PayloadRecord,
}

impl InboundPayload {
    pub fn kind(&self) -> PayloadKind {
        match self.record {
            PayloadRecord::Registration(_) => PayloadKind::Registration,
            PayloadRecord::Update(_) => PayloadKind::Update,
            PayloadRecord::Notification(_) => PayloadKind::Notification,
            PayloadRecord::Configuration(_) => PayloadKind::Configuration,
            PayloadRecord::Unknown => PayloadKind::Unknown,
        }
    }
}

/// What [`dispatch`] did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No recognised payload, or nothing to do for it.
    Ignored,
    /// Registration accepted and identity persisted.
    Registered,
    /// The OTA manager ran.
    Flash(FlashOutcome),
    /// The pending update is now the running firmware.
    UpdateLanded,
    /// Announced firmware is already running and nothing was pending.
    AlreadyCurrent,
    /// Update stored as pending; the user was asked to confirm.
    AwaitingConfirmation,
    /// The user declined the prompt.
    Declined,
    /// Configuration forwarded. `migrated` is set when WiFi migration ran.
    Configured { migrated: Option<bool> },
}

// ---------------------------------------------------------------------------
// Classification and extraction
// ---------------------------------------------------------------------------

/// Locate the winning marker.
///
/// Returns the kind and byte offset of the marker with the largest
/// starting offset, or `None` when no marker occurs.
pub fn classify(raw: &str) -> Result<Option<(PayloadKind, usize)>> {
    let winner = MARKERS
        .iter()
        .filter_map(|&(kind, marker)| raw.find(marker).map(|at| (kind, at)))
        .max_by_key(|&(_, at)| at);

    let sentinel = raw.rfind(UNAUTHORIZED_SENTINEL);
    match (winner, sentinel) {
        (Some((_, start)), Some(at)) if at > start => Err(Error::Authorization),
        (None, Some(_)) => Err(Error::Authorization),
        _ => Ok(winner),
    }
}

/// Classify `raw` and parse the winning object. Pure: touches no state.
pub fn parse_payload(raw: &str) -> Result<InboundPayload> {
    let Some((kind, start)) = classify(raw)? else {
        return Ok(InboundPayload {
            span: 0..0,
            record: PayloadRecord::Unknown,
        });
    };

    let mut stream = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
    let mut root = match stream.next() {
        Some(Ok(value)) => value,
        Some(Err(e)) if e.is_eof() => return Err(ParseError::Truncated.into()),
        Some(Err(_)) => return Err(ParseError::Malformed.into()),
        None => return Err(ParseError::Truncated.into()),
    };
    let span = start..start + stream.byte_offset();
    let text = &raw[span.clone()];

    let name = kind.node().ok_or(ParseError::Malformed)?;
    let node = root
        .as_object_mut()
        .and_then(|obj| obj.remove(name))
        .filter(Value::is_object)
        .ok_or(ParseError::MissingNode(name))?;

    let record = match kind {
        PayloadKind::Registration => PayloadRecord::Registration(from_node(node)?),
        PayloadKind::Update => PayloadRecord::Update(from_node(node)?),
        PayloadKind::Notification => PayloadRecord::Notification(from_node(node)?),
        PayloadKind::Configuration => PayloadRecord::Configuration(ConfigurationRecord {
            raw: text.to_string(),
            credentials: migration_credentials(&node),
        }),
        PayloadKind::Unknown => PayloadRecord::Unknown,
    };

    debug!("Dispatch: {:?} payload at {:?}", kind, span);
    Ok(InboundPayload { span, record })
}

fn from_node<T: for<'de> Deserialize<'de>>(node: Value) -> Result<T> {
    serde_json::from_value(node).map_err(|_| ParseError::Malformed.into())
}

/// Key pairs carrying replacement WiFi credentials, service names first.
const MIGRATION_KEYS: [(&str, &str); 2] = [
    ("THINX_ENV_SSID", "THINX_ENV_PASS"),
    ("ENV_SSID", "ENV_PASS"),
];

/// The first usable SSID/password pair. The password may be short but
/// not empty.
fn migration_credentials(node: &Value) -> Option<WifiCredentials> {
    let (ssid, password) = MIGRATION_KEYS.iter().find_map(|&(ssid_key, pass_key)| {
        let ssid = node.get(ssid_key)?.as_str()?;
        let password = node.get(pass_key)?.as_str()?;
        Some((ssid, password))
    })?;
    (ssid.len() > 2 && !password.is_empty()).then(|| WifiCredentials {
        ssid: ssid.to_string(),
        password: password.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Parse `raw` and apply it to the agent.
///
/// A parse or authorization error returns before anything is mutated.
pub fn dispatch<P: Platform>(ctx: &mut AgentContext<P>, raw: &str) -> Result<DispatchOutcome> {
    let payload = match parse_payload(raw) {
        Ok(p) => p,
        Err(Error::Authorization) => {
            warn!("Dispatch: service does not recognise this owner; copy the owner id from the console");
            return Err(Error::Authorization);
        }
        Err(e) => return Err(e),
    };

    match payload.record {
        PayloadRecord::Registration(rec) => apply_registration(ctx, rec),
        PayloadRecord::Update(rec) => apply_update(ctx, &rec),
        PayloadRecord::Notification(rec) => apply_notification(ctx, &rec),
        PayloadRecord::Configuration(rec) => Ok(apply_configuration(ctx, &rec)),
        PayloadRecord::Unknown => {
            debug!("Dispatch: no known payload in {} bytes", raw.len());
            Ok(DispatchOutcome::Ignored)
        }
    }
}

/// Direct URL if usable, else a one-time-token URL on the current endpoint.
fn resolve_update_url<P: Platform>(ctx: &AgentContext<P>, url: &str, ott: &str) -> Option<String> {
    if url.len() > 2 {
        return Some(url.to_string());
    }
    if ott.len() > 2 {
        return Some(format!(
            "http://{}:{}/device/firmware?ott={}",
            ctx.endpoints.cloud_host, ctx.endpoints.api_port, ott
        ));
    }
    None
}

fn apply_registration<P: Platform>(
    ctx: &mut AgentContext<P>,
    rec: RegistrationRecord,
) -> Result<DispatchOutcome> {
    match rec.status.as_str() {
        "OK" => {
            let identity = &mut ctx.identity;
            if rec.alias.len() > 1 {
                identity.alias = rec.alias;
            }
            if rec.owner.len() > 1 {
                identity.owner = rec.owner;
            }
            let mut assigned = None;
            if rec.udid.len() > 4 && identity.udid != rec.udid {
                identity.udid = rec.udid;
                assigned = Some(identity.udid.clone());
            }
            if let Some(auto) = rec.auto_update {
                ctx.policy.auto_update = auto;
            }
            if let Some(forced) = rec.forced_update {
                ctx.policy.forced_update = forced;
            }

            ctx.persist_identity()?;
            if let Some(udid) = assigned {
                info!("Dispatch: registered as {}", udid);
                ctx.emit(AgentEvent::Registered { udid });
            }
            Ok(DispatchOutcome::Registered)
        }
        "FIRMWARE_UPDATE" => {
            if !rec.commit.is_empty() && rec.commit == ctx.identity.commit_id {
                warn!("Dispatch: offered firmware has the running commit id");
            }
            let url = resolve_update_url(ctx, &rec.url, &rec.ott).ok_or(UpdateError::NoUrl)?;
            info!("Dispatch: direct firmware update for {}", rec.mac);
            Ok(DispatchOutcome::Flash(ota::update_from_url(ctx, &url)))
        }
        other => {
            warn!("Dispatch: registration status '{}'", other);
            Ok(DispatchOutcome::Ignored)
        }
    }
}

fn apply_update<P: Platform>(ctx: &mut AgentContext<P>, rec: &UpdateRecord) -> Result<DispatchOutcome> {
    if !rec.mac.is_empty() && rec.mac != ctx.hardware_id.as_str() {
        warn!("Dispatch: firmware is dedicated to device {}", rec.mac);
    }

    if ctx.identity.is_running(Some(rec.commit.as_str()), Some(rec.version.as_str())) {
        if ctx.identity.pending_update.is_none() {
            debug!("Dispatch: announced firmware already running, nothing pending");
            return Ok(DispatchOutcome::AlreadyCurrent);
        }
        ctx.identity.pending_update = None;
        ctx.persist_identity()?;
        info!("Dispatch: pending update has landed");
        ctx.notify(UPDATE_SUCCESS_NOTICE);
        ctx.emit(AgentEvent::UpdateLanded);
        return Ok(DispatchOutcome::UpdateLanded);
    }

    let url = resolve_update_url(ctx, &rec.url, &rec.ott).ok_or(UpdateError::NoUrl)?;
    let requires_confirmation = ctx.policy.requires_confirmation();
    ctx.identity.pending_update = Some(PendingUpdate {
        url: url.clone(),
        requires_confirmation,
    });
    ctx.persist_identity()?;

    if requires_confirmation {
        info!("Dispatch: update available, asking for confirmation");
        ctx.notify(UPDATE_PROMPT);
        ctx.emit(AgentEvent::UpdatePending { url });
        return Ok(DispatchOutcome::AwaitingConfirmation);
    }

    ctx.report_status(status::UPDATE_STARTED);
    Ok(DispatchOutcome::Flash(ota::update_from_url(ctx, &url)))
}

fn apply_notification<P: Platform>(
    ctx: &mut AgentContext<P>,
    rec: &NotificationRecord,
) -> Result<DispatchOutcome> {
    if !rec.accepted() {
        info!("Dispatch: user declined the update ({})", rec.response_type);
        return Ok(DispatchOutcome::Declined);
    }

    let url = match &ctx.identity.pending_update {
        Some(pending) if pending.url.len() > 4 => pending.url.clone(),
        _ => {
            info!("Dispatch: update confirmed but nothing is pending");
            return Ok(DispatchOutcome::Ignored);
        }
    };
    info!("Dispatch: user confirmed the update");
    Ok(DispatchOutcome::Flash(ota::update_from_url(ctx, &url)))
}

fn apply_configuration<P: Platform>(
    ctx: &mut AgentContext<P>,
    rec: &ConfigurationRecord,
) -> DispatchOutcome {
    let migrated = match &rec.credentials {
        Some(creds) if ctx.config.wifi_migration => {
            Some(link::migrate(ctx, &creds.ssid, &creds.password))
        }
        Some(_) => {
            debug!("Dispatch: WiFi migration disabled, credentials ignored");
            None
        }
        None => None,
    };

    match ctx.callbacks.config.as_mut() {
        Some(sink) => sink.on_configuration(&rec.raw),
        None => debug!("Dispatch: configuration received, no sink installed"),
    }
    DispatchOutcome::Configured { migrated }
}
