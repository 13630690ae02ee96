//! Over-the-air firmware replacement.
//!
//! Two entry points, both ending in a [`FlashOutcome`]:
//!
//! - [`update_from_url`]: the service announced an image URL (or a
//!   one-time-token URL); the [`FirmwareFlasher`] downloads and flashes it.
//! - [`update_from_stream`]: the image arrives as an oversized MQTT
//!   message and is flashed straight from the session's byte stream.
//!
//! `Flashed` is terminal. The context latches `restart_pending` and the
//! flasher restarts the device; on hardware that call never returns.

pub mod image;

use log::{error, info, warn};

use crate::app::events::AgentEvent;
use crate::app::ports::{ByteSource, FirmwareFlasher, HttpUpdateResult, MqttSession, Platform};
use crate::error::UpdateError;
use crate::fsm::context::AgentContext;
use crate::protocol::channels::status;
use crate::protocol::checkin;

/// What a flash attempt ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOutcome {
    /// New image written and marked bootable; a restart follows.
    Flashed,
    /// The server had nothing newer.
    NoUpdate,
    /// Nothing was changed; the current firmware keeps running.
    Failed(UpdateError),
}

impl FlashOutcome {
    pub fn is_flashed(&self) -> bool {
        matches!(self, Self::Flashed)
    }
}

/// The downloader takes `host[:port]/path`; a plain-HTTP scheme is dropped.
pub fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("http://").unwrap_or(url)
}

/// Download and flash the image at `url`.
///
/// On failure the error text becomes the device status. It is published
/// and, when the link is up, checked in.
pub fn update_from_url<P: Platform>(ctx: &mut AgentContext<P>, url: &str) -> FlashOutcome {
    let target = strip_scheme(url);
    if target.is_empty() {
        return finish(ctx, FlashOutcome::Failed(UpdateError::NoUrl));
    }

    info!("OTA: updating from {}", target);
    let outcome = match ctx.ports.flasher.update_from_url(target) {
        HttpUpdateResult::Failed(e) => {
            error!("OTA: update failed: {}", e);
            ctx.status = e.to_string();
            let text = ctx.status.clone();
            ctx.report_status(&text);
            checkin::report_if_connected(ctx);
            FlashOutcome::Failed(e)
        }
        HttpUpdateResult::NoUpdates => {
            info!("OTA: server reports no update");
            FlashOutcome::NoUpdate
        }
        HttpUpdateResult::Ok => FlashOutcome::Flashed,
    };
    finish(ctx, outcome)
}

/// Flash `len` bytes streamed from an MQTT message on `topic`.
///
/// Success publishes `rebooting`, clears the retained trigger on `topic`
/// so the image is not delivered again after the restart, and closes the
/// session. Failure publishes `mqtt_update_failed` and leaves the session up.
pub fn update_from_stream<P: Platform>(
    ctx: &mut AgentContext<P>,
    topic: &str,
    source: &mut dyn ByteSource,
    len: usize,
) -> FlashOutcome {
    info!("OTA: flashing {} bytes streamed on {}", len, topic);
    match ctx.ports.flasher.flash_stream(source, len) {
        Ok(()) => {
            ctx.report_status(status::REBOOTING);
            if let Err(e) = ctx.ports.mqtt.publish(topic, &[], true) {
                warn!("OTA: could not clear retained update on {}: {}", topic, e);
            }
            ctx.ports.mqtt.disconnect();
            ctx.conn.mqtt_connected = false;
            finish(ctx, FlashOutcome::Flashed)
        }
        Err(e) => {
            error!("OTA: streamed update failed: {}", e);
            ctx.report_status(status::MQTT_UPDATE_FAILED);
            finish(ctx, FlashOutcome::Failed(e))
        }
    }
}

fn finish<P: Platform>(ctx: &mut AgentContext<P>, outcome: FlashOutcome) -> FlashOutcome {
    ctx.emit(AgentEvent::UpdateFinished(outcome));
    if outcome.is_flashed() {
        info!("OTA: image accepted, restarting");
        ctx.restart_pending = true;
        ctx.ports.flasher.restart();
    }
    outcome
}
