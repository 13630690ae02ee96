//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements        | Connects to                         |
//! |--------------|-------------------|-------------------------------------|
//! | `nvs`        | StoragePort       | NVS blob + commit / in-memory store |
//! | `file_store` | StoragePort       | VFS file, write-then-rename         |
//! | `wifi`       | RadioPort         | ESP-IDF WiFi STA / AP               |
//! | `tcp`        | HttpTransport     | lwIP / std TCP socket               |
//! | `mqtt`       | MqttSession       | ESP-MQTT client / in-memory broker  |
//! | `flasher`    | FirmwareFlasher   | HTTP download + OTA partition       |
//! | `mdns`       | ServiceDiscovery  | ESP-IDF mDNS responder              |
//! | `time`       | Clock             | esp_timer / `Instant`               |
//! | `log_sink`   | EventSink         | Serial log output                   |
//!
//! Every adapter compiles on both targets: the ESP-IDF path is selected
//! with `#[cfg(target_os = "espidf")]`, hosts get the simulation path.

pub mod device_id;
pub mod file_store;
pub mod flasher;
pub mod log_sink;
pub mod mdns;
pub mod mqtt;
pub mod nvs;
pub mod tcp;
pub mod time;
pub(super) mod utils;
pub mod wifi;

use crate::app::ports::Platform;

/// The bundled adapter set.
pub struct DevicePlatform;

impl Platform for DevicePlatform {
    type Storage = nvs::NvsAdapter;
    type Radio = wifi::WifiAdapter;
    type Http = tcp::TcpTransport;
    type Mqtt = mqtt::MqttAdapter;
    type Flasher = flasher::PartitionFlasher;
    type Discovery = mdns::MdnsAdapter;
    type Clock = time::SystemClock;
    type Events = log_sink::LogEventSink;
}

#[cfg(not(target_os = "espidf"))]
impl DevicePlatform {
    /// Simulation adapters for a host run of the agent.
    pub fn simulated_ports(
        config: &crate::config::AgentConfig,
    ) -> Result<crate::app::ports::Ports<Self>, crate::app::ports::StorageError> {
        Ok(crate::app::ports::Ports {
            storage: nvs::NvsAdapter::new()?,
            radio: wifi::WifiAdapter::new(),
            http: tcp::TcpTransport::new(),
            mqtt: mqtt::MqttAdapter::new(),
            flasher: flasher::PartitionFlasher::new(&config.user_agent),
            discovery: mdns::MdnsAdapter::new(device_id::hostname(&device_id::read_mac())),
            clock: time::SystemClock::new(),
            events: log_sink::LogEventSink::new(),
        })
    }
}
