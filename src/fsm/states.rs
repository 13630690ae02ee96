//! Lifecycle phase handlers and table builder.
//!
//! ```text
//!  INIT ──▶ CONNECT_WIFI ──[link up]──▶ CONNECT_API ──[checkin]──▶ CONNECT_MQTT
//!              │    ▲                       │                        │      │
//!              └────┘ connect step          └─ parked on AP fallback │  [no udid]
//!                                                                    ▼      │
//!  COMPLETED ◀── FINALIZE ◀──[subscribed]── CHECKIN_MQTT ◀──[session]┘      │
//!      │             ▲                                                      │
//!      │             └──────────────────────────────────────────────────────┘
//!      └─ pump inbound messages, reconnect every 5 s when the session drops
//! ```
//!
//! A handler that fails returns `None` and the same phase runs again on
//! the next tick. No transition is ever undone.

use log::{debug, info, warn};

use super::context::AgentContext;
use super::{Phase, StateDescriptor};
use crate::app::ports::{Clock, ConnectOptions, InboundMessage, MqttSession, Platform};
use crate::error::{Result, TransportError};
use crate::identity::{self, DeviceIdentity, LoadSource};
use crate::link;
use crate::ota;
use crate::protocol::channels::{self, status};
use crate::protocol::{checkin, dispatch};

/// Inbound messages handled per `Completed` tick.
const MAX_MESSAGES_PER_TICK: usize = 8;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

pub fn build_state_table<P: Platform>() -> [StateDescriptor<P>; Phase::COUNT] {
    [
        StateDescriptor {
            id: Phase::Init,
            name: "Init",
            on_enter: None,
            on_exit: None,
            on_update: init_update::<P>,
        },
        StateDescriptor {
            id: Phase::ConnectWifi,
            name: "ConnectWifi",
            on_enter: Some(connect_wifi_enter::<P>),
            on_exit: None,
            on_update: connect_wifi_update::<P>,
        },
        StateDescriptor {
            id: Phase::ConnectApi,
            name: "ConnectApi",
            on_enter: Some(connect_api_enter::<P>),
            on_exit: None,
            on_update: connect_api_update::<P>,
        },
        StateDescriptor {
            id: Phase::ConnectMqtt,
            name: "ConnectMqtt",
            on_enter: None,
            on_exit: None,
            on_update: connect_mqtt_update::<P>,
        },
        StateDescriptor {
            id: Phase::CheckinMqtt,
            name: "CheckinMqtt",
            on_enter: None,
            on_exit: None,
            on_update: checkin_mqtt_update::<P>,
        },
        StateDescriptor {
            id: Phase::Finalize,
            name: "Finalize",
            on_enter: None,
            on_exit: None,
            on_update: finalize_update::<P>,
        },
        StateDescriptor {
            id: Phase::Completed,
            name: "Completed",
            on_enter: Some(completed_enter::<P>),
            on_exit: None,
            on_update: completed_update::<P>,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  INIT
// ═══════════════════════════════════════════════════════════════════════════

fn init_update<P: Platform>(ctx: &mut AgentContext<P>) -> Option<Phase> {
    let defaults = DeviceIdentity::from_config(&ctx.config);
    let loaded = identity::load(&ctx.ports.storage, &defaults);
    if loaded.source == LoadSource::Defaults {
        info!("INIT: running on build-time identity");
    }
    ctx.identity = loaded.identity;
    info!(
        "INIT: hardware id {}, firmware {}",
        ctx.hardware_id, ctx.config.firmware_version
    );
    Some(Phase::ConnectWifi)
}

// ═══════════════════════════════════════════════════════════════════════════
//  CONNECT_WIFI
// ═══════════════════════════════════════════════════════════════════════════

fn connect_wifi_enter<P: Platform>(_ctx: &mut AgentContext<P>) {
    info!("CONNECT_WIFI: waiting for station link");
}

fn connect_wifi_update<P: Platform>(ctx: &mut AgentContext<P>) -> Option<Phase> {
    if link::is_up(ctx) {
        link::resolve_discovery(ctx);
        return Some(Phase::ConnectApi);
    }
    link::connect_step(ctx);
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  CONNECT_API
// ═══════════════════════════════════════════════════════════════════════════

fn connect_api_enter<P: Platform>(ctx: &mut AgentContext<P>) {
    if ctx.conn.ap_fallback {
        warn!("CONNECT_API: access point active, checkin parked");
    } else if !ctx.identity.has_api_key() {
        warn!("CONNECT_API: no API key configured, checkin parked");
    }
}

fn connect_api_update<P: Platform>(ctx: &mut AgentContext<P>) -> Option<Phase> {
    if link::fallback_active(ctx) || !ctx.identity.has_api_key() {
        return None;
    }
    if let Err(e) = checkin::checkin(ctx) {
        ctx.report_error("Checkin", e);
    }
    Some(Phase::ConnectMqtt)
}

// ═══════════════════════════════════════════════════════════════════════════
//  CONNECT_MQTT
// ═══════════════════════════════════════════════════════════════════════════

fn connect_mqtt_update<P: Platform>(ctx: &mut AgentContext<P>) -> Option<Phase> {
    if !ctx.identity.has_udid() {
        info!("CONNECT_MQTT: no UDID yet, nothing to subscribe to");
        return Some(Phase::Finalize);
    }
    match open_session(ctx) {
        Ok(()) => Some(Phase::CheckinMqtt),
        Err(e) => {
            ctx.report_error("MQTT connect", e);
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CHECKIN_MQTT
// ═══════════════════════════════════════════════════════════════════════════

fn checkin_mqtt_update<P: Platform>(ctx: &mut AgentContext<P>) -> Option<Phase> {
    if !ctx.ports.mqtt.is_connected() {
        ctx.conn.mqtt_connected = false;
        if let Err(e) = open_session(ctx) {
            ctx.report_error("MQTT reconnect", e);
            return None;
        }
    }
    match subscribe_device_channel(ctx) {
        Ok(()) => {
            ctx.report_status(status::CONNECTED);
            Some(Phase::Finalize)
        }
        Err(e) => {
            ctx.report_error("MQTT subscribe", e);
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  FINALIZE
// ═══════════════════════════════════════════════════════════════════════════

fn finalize_update<P: Platform>(ctx: &mut AgentContext<P>) -> Option<Phase> {
    if !ctx.finalized {
        ctx.finalized = true;
        if let Some(hook) = ctx.callbacks.finalize.as_mut() {
            hook.on_finalize();
        }
    }
    Some(Phase::Completed)
}

// ═══════════════════════════════════════════════════════════════════════════
//  COMPLETED
// ═══════════════════════════════════════════════════════════════════════════

fn completed_enter<P: Platform>(ctx: &mut AgentContext<P>) {
    info!(
        "COMPLETED: steady state (mqtt {})",
        if ctx.conn.mqtt_connected { "up" } else { "down" }
    );
}

fn completed_update<P: Platform>(ctx: &mut AgentContext<P>) -> Option<Phase> {
    if ctx.conn.mqtt_connected {
        if ctx.ports.mqtt.is_connected() {
            pump_messages(ctx);
        } else {
            warn!("COMPLETED: MQTT session lost");
            ctx.conn.mqtt_connected = false;
        }
        return None;
    }

    if !ctx.identity.has_udid() {
        return None;
    }
    let now = ctx.ports.clock.now_ms();
    if let Some(last) = ctx.last_mqtt_attempt_ms {
        if now.saturating_sub(last) < u64::from(ctx.config.mqtt_reconnect_interval_ms) {
            return None;
        }
    }
    ctx.last_mqtt_attempt_ms = Some(now);

    match open_session(ctx).and_then(|()| subscribe_device_channel(ctx)) {
        Ok(()) => {
            info!("COMPLETED: MQTT session restored");
            ctx.report_status(status::CONNECTED);
        }
        Err(e) => ctx.report_error("MQTT reconnect", e),
    }
    None
}

fn pump_messages<P: Platform>(ctx: &mut AgentContext<P>) {
    for _ in 0..MAX_MESSAGES_PER_TICK {
        if ctx.restart_pending {
            return;
        }
        let Some(message) = ctx.ports.mqtt.poll() else {
            return;
        };
        match message {
            InboundMessage::Text { topic, payload } => {
                info!("MQTT: {} bytes on {}", payload.len(), topic);
                if let Err(e) = dispatch::dispatch(ctx, &payload) {
                    ctx.report_error("Dispatch", e);
                }
            }
            InboundMessage::Stream {
                topic,
                len,
                mut source,
            } => {
                let outcome = ota::update_from_stream(ctx, &topic, source.as_mut(), len);
                debug!("MQTT: streamed image of {} bytes: {:?}", len, outcome);
                if outcome.is_flashed() {
                    return;
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  MQTT session helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Open the broker session as this device, with a `disconnected` last will.
fn open_session<P: Platform>(ctx: &mut AgentContext<P>) -> Result<()> {
    let channels = ctx.channels().ok_or(TransportError::NotConnected)?;
    let will = channels::status_message(status::DISCONNECTED)?;
    let options = ConnectOptions {
        host: &ctx.endpoints.mqtt_host,
        port: ctx.endpoints.mqtt_port,
        client_id: &ctx.hardware_id,
        username: &ctx.identity.udid,
        password: &ctx.identity.api_key,
        keepalive_secs: ctx.config.mqtt_keepalive_secs,
        will_topic: &channels.status,
        will_message: &will,
    };
    info!("MQTT: connecting to {}:{}", options.host, options.port);
    ctx.ports.mqtt.connect(&options)?;
    ctx.conn.mqtt_connected = true;
    Ok(())
}

fn subscribe_device_channel<P: Platform>(ctx: &mut AgentContext<P>) -> Result<()> {
    let channels = ctx.channels().ok_or(TransportError::NotConnected)?;
    ctx.ports.mqtt.subscribe(&channels.device)?;
    info!("MQTT: subscribed to {}", channels.device);
    Ok(())
}
