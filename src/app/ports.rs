//! Port traits: the hexagonal boundary between the agent core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Agent (domain)
//! ```
//!
//! Driven adapters (radio, TCP, MQTT, flasher, storage, discovery, clock,
//! event sinks) implement these traits. The [`Agent`](super::service::Agent)
//! consumes them through a [`Platform`] bundle, so the lifecycle core never
//! touches a driver directly.
//!
//! ## Security notes
//!
//! - **StoragePort** implementations SHOULD keep the identity namespace on
//!   an encrypted partition: it holds the API key.
//! - All port errors are typed; callers must handle every variant explicitly.

use core::fmt;

use crate::error::{TransportError, UpdateError};

use super::events::AgentEvent;

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash / file)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for the identity record.
///
/// # Atomicity
///
/// Write operations MUST be atomic from the caller's point of view: no
/// partial record on power loss. NVS gets this from blob write + commit,
/// file stores from write-to-temp + rename.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Radio port (driven adapter: domain → WiFi driver)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// Joining an existing network.
    Station,
    /// Hosting the fallback access point.
    AccessPoint,
}

/// The WiFi radio. `begin` only starts an association; the lifecycle
/// polls [`is_connected`](RadioPort::is_connected) on later iterations.
pub trait RadioPort {
    fn is_connected(&self) -> bool;

    fn mode(&self) -> RadioMode;

    fn set_mode(&mut self, mode: RadioMode);

    /// Start joining `credentials`, or the driver's stored network when `None`.
    fn begin(&mut self, credentials: Option<(&str, &str)>) -> Result<(), RadioError>;

    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), RadioError>;

    fn disconnect(&mut self);

    /// Factory MAC of the station interface.
    fn mac_address(&self) -> [u8; 6];
}

// ───────────────────────────────────────────────────────────────
// HTTP transport port (driven adapter: domain → TCP stream)
// ───────────────────────────────────────────────────────────────

/// Byte stream used for the checkin request.
pub trait HttpTransport {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Write `data`, returning the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever is buffered. Returns 0 when nothing is available yet
    /// (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Whether the peer still holds the connection open.
    fn connected(&self) -> bool;

    fn stop(&mut self);
}

// ───────────────────────────────────────────────────────────────
// MQTT session port (driven adapter: domain ↔ broker)
// ───────────────────────────────────────────────────────────────

/// Parameters for opening a broker session.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions<'a> {
    pub host: &'a str,
    pub port: u16,
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub keepalive_secs: u16,
    pub will_topic: &'a str,
    pub will_message: &'a str,
}

/// Sequential reader over an in-flight payload.
pub trait ByteSource {
    /// Fill `buf` with the next bytes. Returns 0 at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// A fully buffered payload exposed as a [`ByteSource`].
#[derive(Debug, Clone, Default)]
pub struct BufferedSource {
    data: Vec<u8>,
    pos: usize,
}

impl BufferedSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ByteSource for BufferedSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// One message delivered by the session pump.
pub enum InboundMessage {
    /// A payload small enough to arrive as text.
    Text { topic: String, payload: String },
    /// A payload too large to buffer as text; read it from `source`.
    Stream {
        topic: String,
        len: usize,
        source: Box<dyn ByteSource>,
    },
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { topic, payload } => f
                .debug_struct("Text")
                .field("topic", topic)
                .field("len", &payload.len())
                .finish(),
            Self::Stream { topic, len, .. } => f
                .debug_struct("Stream")
                .field("topic", topic)
                .field("len", len)
                .finish(),
        }
    }
}

/// Publish/subscribe session. The message pump is polled: each
/// [`poll`](MqttSession::poll) returns at most one already-buffered message.
pub trait MqttSession {
    fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;

    /// Service keepalive and hand out the next buffered message, if any.
    fn poll(&mut self) -> Option<InboundMessage>;

    fn disconnect(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Firmware flasher port (driven adapter: domain → HTTP OTA + partition)
// ───────────────────────────────────────────────────────────────

/// Tri-state result of an HTTP firmware update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpUpdateResult {
    Failed(UpdateError),
    NoUpdates,
    Ok,
}

pub trait FirmwareFlasher {
    /// Download and flash the image at `url` (scheme already stripped).
    fn update_from_url(&mut self, url: &str) -> HttpUpdateResult;

    /// Flash exactly `len` bytes read from `source`.
    fn flash_stream(&mut self, source: &mut dyn ByteSource, len: usize) -> Result<(), UpdateError>;

    /// Reboot into the freshly flashed image. Never returns on hardware.
    fn restart(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Service discovery port (driven adapter: domain → mDNS)
// ───────────────────────────────────────────────────────────────

/// A local proxy advertising the registration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub host: String,
    pub port: u16,
}

pub trait ServiceDiscovery {
    fn query(&mut self, service: &str, proto: &str) -> Option<DiscoveredService>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time plus a cooperative delay used by bounded waits.
pub trait Clock {
    fn now_ms(&self) -> u64;

    fn delay_ms(&mut self, ms: u32);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The agent emits structured [`AgentEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &AgentEvent);
}

// ───────────────────────────────────────────────────────────────
// Application callbacks (domain → surrounding application)
// ───────────────────────────────────────────────────────────────

/// Receives configuration pushes, exactly as the service sent them.
pub trait ConfigSink {
    fn on_configuration(&mut self, payload: &str);
}

impl<F: FnMut(&str)> ConfigSink for F {
    fn on_configuration(&mut self, payload: &str) {
        self(payload);
    }
}

/// Notified once when the lifecycle first reaches its steady state.
pub trait FinalizeHook {
    fn on_finalize(&mut self);
}

impl<F: FnMut()> FinalizeHook for F {
    fn on_finalize(&mut self) {
        self();
    }
}

/// Callbacks injected at construction. Either may be absent.
#[derive(Default)]
pub struct Callbacks {
    pub config: Option<Box<dyn ConfigSink>>,
    pub finalize: Option<Box<dyn FinalizeHook>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_configuration(mut self, sink: impl ConfigSink + 'static) -> Self {
        self.config = Some(Box::new(sink));
        self
    }

    #[must_use]
    pub fn on_finalize(mut self, hook: impl FinalizeHook + 'static) -> Self {
        self.finalize = Some(Box::new(hook));
        self
    }
}

// ───────────────────────────────────────────────────────────────
// Platform bundle
// ───────────────────────────────────────────────────────────────

/// Names the concrete adapter for every port on one target.
pub trait Platform {
    type Storage: StoragePort;
    type Radio: RadioPort;
    type Http: HttpTransport;
    type Mqtt: MqttSession;
    type Flasher: FirmwareFlasher;
    type Discovery: ServiceDiscovery;
    type Clock: Clock;
    type Events: EventSink;
}

/// Owned adapter instances for a [`Platform`].
pub struct Ports<P: Platform> {
    pub storage: P::Storage,
    pub radio: P::Radio,
    pub http: P::Http,
    pub mqtt: P::Mqtt,
    pub flasher: P::Flasher,
    pub discovery: P::Discovery,
    pub clock: P::Clock,
    pub events: P::Events,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

/// Errors from [`RadioPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// No credentials given and none stored in the driver.
    NoCredentials,
    /// SSID must be 1-32 printable ASCII bytes.
    InvalidSsid,
    /// Password must be empty (open) or 8-64 bytes.
    InvalidPassword,
    /// The driver refused the request.
    DriverFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
            Self::DriverFailed => write!(f, "WiFi driver error"),
        }
    }
}

impl From<StorageError> for crate::error::PersistenceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => Self::Unavailable,
            StorageError::Full => Self::TooLarge,
            StorageError::IoError => Self::Io,
        }
    }
}
