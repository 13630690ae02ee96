//! devlink agent, ESP-IDF entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  NvsAdapter    WifiAdapter   TcpTransport   MqttAdapter      │
//! │  (Storage)     (Radio)       (Http)         (Mqtt)           │
//! │  PartitionFlasher  MdnsAdapter  SystemClock  LogEventSink    │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ─────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  Agent: lifecycle FSM · checkin · dispatch · OTA       │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;
use log::{info, warn};

use devlink::adapters::device_id;
use devlink::adapters::flasher::PartitionFlasher;
use devlink::adapters::log_sink::LogEventSink;
use devlink::adapters::mdns::MdnsAdapter;
use devlink::adapters::mqtt::MqttAdapter;
use devlink::adapters::nvs::NvsAdapter;
use devlink::adapters::tcp::TcpTransport;
use devlink::adapters::time::SystemClock;
use devlink::adapters::wifi::WifiAdapter;
use devlink::adapters::DevicePlatform;
use devlink::ota::image::mark_running_valid;
use devlink::{Agent, AgentConfig, Callbacks, Ports};

/// Main loop period between `advance` calls.
const LOOP_INTERVAL_MS: u32 = 100;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("devlink agent v{}", env!("CARGO_PKG_VERSION"));

    // Reaching main counts as a good boot for the running image.
    mark_running_valid();

    // ── 2. Peripherals and drivers ────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let wifi = EspWifi::new(peripherals.modem, sysloop, Some(nvs_partition))?;

    let storage = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {e}"))?;

    // ── 3. Agent ──────────────────────────────────────────────
    let config = AgentConfig::default();
    let ports: Ports<DevicePlatform> = Ports {
        storage,
        radio: WifiAdapter::new(wifi),
        http: TcpTransport::new(),
        mqtt: MqttAdapter::new(),
        flasher: PartitionFlasher::new(&config.user_agent),
        discovery: MdnsAdapter::new(device_id::hostname(&device_id::read_mac())),
        clock: SystemClock::new(),
        events: LogEventSink::new(),
    };
    let callbacks = Callbacks::new()
        .on_configuration(|payload: &str| info!("Configuration pushed: {}", payload))
        .on_finalize(|| info!("Agent checkin complete"));

    let mut agent = Agent::new(config, ports, callbacks);
    info!("Agent ready as {}. Entering main loop.", agent.hardware_id());

    // ── 4. Main loop ──────────────────────────────────────────
    while !agent.restart_pending() {
        agent.advance();
        FreeRtos::delay_ms(LOOP_INTERVAL_MS);
    }

    // The flasher restarts on success; only reached if that returned.
    warn!("Restart pending, resetting");
    esp_idf_hal::reset::restart();
}
