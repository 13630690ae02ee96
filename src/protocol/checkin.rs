//! Checkin (registration) round trip.
//!
//! The agent tells the service who it is and what it runs; the answer is
//! free-form text that usually carries one `{"registration":…}` object and
//! goes straight to the [dispatcher](super::dispatch).
//!
//! The request is a hand-framed HTTP/1.1 `POST` over a plain
//! [`HttpTransport`] stream:
//!
//! ```text
//! POST /device/register HTTP/1.1
//! Host: <host>
//! Authentication: <api key>
//! Accept: application/json
//! Origin: device
//! Content-Type: application/json
//! User-Agent: <agent>
//! Content-Length: <n>
//!
//! {"registration":{...}}
//! ```

use core::fmt::Write as _;

use log::{debug, info, warn};
use serde::Serialize;

use crate::app::ports::{Clock, HttpTransport, Platform};
use crate::error::{ParseError, Result, TransportError};
use crate::fsm::context::AgentContext;

use super::dispatch::{self, DispatchOutcome};

pub const CHECKIN_PATH: &str = "/device/register";

/// Response bytes kept; anything past this is read and dropped.
pub const MAX_RESPONSE_LEN: usize = 8192;

const READ_CHUNK: usize = 512;
const POLL_INTERVAL_MS: u32 = 10;

fn is_blank(value: &&str) -> bool {
    value.is_empty()
}

/// Everything the service learns about the device on checkin.
/// Blank fields are left out of the body entirely.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CheckinFields<'a> {
    /// Hardware id derived from the station MAC.
    #[serde(skip_serializing_if = "is_blank")]
    pub mac: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pub firmware: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pub version: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pub commit: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pub owner: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pub alias: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pub udid: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pub status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "is_blank")]
    pub platform: &'a str,
}

#[derive(Serialize)]
struct CheckinBody<'a> {
    registration: &'a CheckinFields<'a>,
}

/// `{"registration":{…}}` for `fields`.
pub fn build_checkin_body(fields: &CheckinFields<'_>) -> Result<String> {
    serde_json::to_string(&CheckinBody {
        registration: fields,
    })
    .map_err(|_| ParseError::Encode.into())
}

/// Frame `body` as the registration request.
pub fn frame_request(host: &str, api_key: &str, user_agent: &str, body: &str) -> String {
    let mut request = String::with_capacity(body.len() + 256);
    // Writing into a String cannot fail.
    let _ = write!(
        request,
        "POST {CHECKIN_PATH} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Authentication: {api_key}\r\n\
         Accept: application/json\r\n\
         Origin: device\r\n\
         Content-Type: application/json\r\n\
         User-Agent: {user_agent}\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    );
    request
}

/// Send `request` to `host:port` and collect the raw response.
///
/// Reads until the peer closes the connection or `timeout_ms` elapses.
/// A deadline with nothing received is a [`TransportError::Timeout`]; a
/// deadline after some bytes arrived returns what was read. The transport
/// is always stopped before returning.
pub fn send<T, C>(
    transport: &mut T,
    clock: &mut C,
    host: &str,
    port: u16,
    request: &str,
    timeout_ms: u32,
) -> Result<String>
where
    T: HttpTransport,
    C: Clock,
{
    info!("Checkin: connecting to {}:{}", host, port);
    transport.connect(host, port)?;

    let bytes = request.as_bytes();
    let mut written = 0;
    while written < bytes.len() {
        match transport.write(&bytes[written..]) {
            Ok(0) | Err(_) => {
                transport.stop();
                return Err(TransportError::WriteFailed.into());
            }
            Ok(n) => written += n,
        }
    }
    debug!("Checkin: request sent ({} bytes)", written);

    let deadline = clock.now_ms() + u64::from(timeout_ms);
    let mut response: Vec<u8> = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match transport.read(&mut chunk) {
            Ok(n) => n,
            Err(e) => {
                transport.stop();
                return Err(e.into());
            }
        };

        if n > 0 {
            let keep = n.min(MAX_RESPONSE_LEN - response.len());
            response.extend_from_slice(&chunk[..keep]);
            dropped += n - keep;
        } else if !transport.connected() {
            break;
        }

        if clock.now_ms() >= deadline {
            if response.is_empty() {
                warn!("Checkin: no response within {} ms", timeout_ms);
                transport.stop();
                return Err(TransportError::Timeout.into());
            }
            warn!("Checkin: peer kept the connection open past the deadline");
            break;
        }

        if n == 0 {
            clock.delay_ms(POLL_INTERVAL_MS);
        }
    }
    transport.stop();

    if dropped > 0 {
        warn!(
            "Checkin: response exceeded {} bytes, dropped {}",
            MAX_RESPONSE_LEN, dropped
        );
    }
    if response.is_empty() {
        warn!("Checkin: connection closed without a response");
        return Err(TransportError::ReadFailed.into());
    }

    info!("Checkin: received {} bytes", response.len());
    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Check in with the service and dispatch whatever it answers.
pub fn checkin<P: Platform>(ctx: &mut AgentContext<P>) -> Result<DispatchOutcome> {
    let body = build_checkin_body(&ctx.checkin_fields())?;
    let request = frame_request(
        &ctx.endpoints.cloud_host,
        &ctx.identity.api_key,
        &ctx.config.user_agent,
        &body,
    );
    let raw = send(
        &mut ctx.ports.http,
        &mut ctx.ports.clock,
        &ctx.endpoints.cloud_host,
        ctx.endpoints.api_port,
        &request,
        ctx.config.checkin_timeout_ms,
    )?;
    ctx.checkin_active = true;
    let outcome = dispatch::dispatch(ctx, &raw);
    ctx.checkin_active = false;
    outcome
}

/// Check in again so the service sees a changed status. Skipped while the
/// link is down, without an API key, or from inside a checkin response.
pub fn report_if_connected<P: Platform>(ctx: &mut AgentContext<P>) {
    if !ctx.conn.connected || !ctx.identity.has_api_key() || ctx.checkin_active {
        return;
    }
    if let Err(e) = checkin(ctx) {
        ctx.report_error("Checkin", e);
    }
}
