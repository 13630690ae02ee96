//! WiFi link management: station connect with bounded retry, access-point
//! fallback, service discovery and credential migration.
//!
//! ```text
//!  not started ──begin──▶ in progress ──radio up──▶ connected
//!                             │
//!                  retry > WIFI_RETRY_LIMIT
//!                             ▼
//!                      access-point fallback (once)
//! ```
//!
//! Each call performs one step; the lifecycle calls again on the next tick.

use log::{info, warn};

use crate::app::events::AgentEvent;
use crate::app::ports::{Clock, Platform, RadioMode, RadioPort, ServiceDiscovery};
use crate::fsm::context::AgentContext;

const MIGRATION_POLL_MS: u32 = 100;

/// Record a live station link and clear the retry state.
pub fn mark_connected<P: Platform>(ctx: &mut AgentContext<P>) {
    if !ctx.conn.connected {
        info!("WiFi: link up after {} steps", ctx.conn.wifi_retry);
    }
    ctx.conn.connected = true;
    ctx.conn.wifi_connection_in_progress = false;
    ctx.conn.wifi_retry = 0;
}

/// Whether the lifecycle may leave `ConnectWifi`.
pub fn is_up<P: Platform>(ctx: &mut AgentContext<P>) -> bool {
    if ctx.ports.radio.is_connected() {
        mark_connected(ctx);
        return true;
    }
    ctx.conn.connected = false;
    ctx.conn.ap_fallback
}

/// End the access-point fallback once the station link is back, e.g.
/// after a setup portal joined a network. Returns whether the fallback
/// is still active.
pub fn fallback_active<P: Platform>(ctx: &mut AgentContext<P>) -> bool {
    if !ctx.conn.ap_fallback {
        return false;
    }
    if ctx.ports.radio.mode() == RadioMode::Station && ctx.ports.radio.is_connected() {
        info!("WiFi: station link restored, leaving access-point fallback");
        ctx.conn.ap_fallback = false;
        mark_connected(ctx);
        return false;
    }
    true
}

/// One connect step. Never blocks.
pub fn connect_step<P: Platform>(ctx: &mut AgentContext<P>) {
    if !ctx.conn.wifi_connection_in_progress {
        ctx.ports.radio.set_mode(RadioMode::Station);
        let credentials = (ctx.config.env_ssid.len() > 2)
            .then(|| (ctx.config.env_ssid.as_str(), ctx.config.env_pass.as_str()));
        match ctx.ports.radio.begin(credentials) {
            Ok(()) => info!(
                "WiFi: joining {}",
                credentials.map_or("stored network", |(ssid, _)| ssid)
            ),
            Err(e) => warn!("WiFi: begin failed: {}", e),
        }
        ctx.conn.wifi_connection_in_progress = true;
        return;
    }

    if ctx.conn.wifi_retry > ctx.config.wifi_retry_limit
        && ctx.ports.radio.mode() == RadioMode::Station
        && !ctx.conn.ap_fallback
    {
        fall_back_to_access_point(ctx);
        return;
    }

    ctx.conn.wifi_retry = ctx.conn.wifi_retry.saturating_add(1);
}

fn fall_back_to_access_point<P: Platform>(ctx: &mut AgentContext<P>) {
    warn!(
        "WiFi: no link after {} steps, starting access point '{}'",
        ctx.conn.wifi_retry, ctx.config.ap_ssid
    );
    ctx.ports.radio.set_mode(RadioMode::AccessPoint);
    if let Err(e) = ctx
        .ports
        .radio
        .start_access_point(&ctx.config.ap_ssid, &ctx.config.ap_password)
    {
        warn!("WiFi: access point failed to start: {}", e);
    }
    ctx.conn.wifi_retry = 0;
    ctx.conn.wifi_connection_in_progress = false;
    ctx.conn.ap_fallback = true;
    ctx.emit(AgentEvent::AccessPointFallback);
}

/// Zero the retry counter so the next step starts a fresh attempt.
pub fn reset_retry<P: Platform>(ctx: &mut AgentContext<P>) {
    ctx.conn.wifi_retry = 0;
    ctx.conn.wifi_connection_in_progress = false;
}

/// Point cloud and MQTT endpoints at a local proxy, if one advertises.
pub fn resolve_discovery<P: Platform>(ctx: &mut AgentContext<P>) {
    let Some(found) = ctx
        .ports
        .discovery
        .query(&ctx.config.discovery_service, &ctx.config.discovery_proto)
    else {
        return;
    };
    if found.host.is_empty() {
        return;
    }
    info!("Discovery: using proxy {}:{}", found.host, found.port);
    ctx.endpoints.cloud_host.clone_from(&found.host);
    ctx.endpoints.mqtt_host = found.host;
    if found.port != 0 {
        ctx.endpoints.api_port = found.port;
    }
}

/// Move the station to new credentials, waiting up to the migration
/// timeout for the link. Returns whether the radio came back up.
pub fn migrate<P: Platform>(ctx: &mut AgentContext<P>, ssid: &str, password: &str) -> bool {
    info!("WiFi: migrating to '{}'", ssid);
    ctx.ports.radio.disconnect();
    if let Err(e) = ctx.ports.radio.begin(Some((ssid, password))) {
        warn!("WiFi: migration rejected: {}", e);
        return false;
    }

    let deadline = ctx.ports.clock.now_ms() + u64::from(ctx.config.migration_timeout_ms);
    while !ctx.ports.radio.is_connected() {
        if ctx.ports.clock.now_ms() >= deadline {
            warn!("WiFi: migration to '{}' timed out", ssid);
            ctx.conn.connected = false;
            return false;
        }
        ctx.ports.clock.delay_ms(MIGRATION_POLL_MS);
    }
    info!("WiFi: migration to '{}' succeeded", ssid);
    mark_connected(ctx);
    true
}
