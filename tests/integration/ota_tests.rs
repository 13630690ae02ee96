//! Firmware replacement outcomes, over HTTP and over the MQTT stream.

use devlink::app::ports::HttpUpdateResult;
use devlink::error::UpdateError;
use devlink::ota::FlashOutcome;
use devlink::protocol::dispatch::DispatchOutcome;
use devlink::AgentEvent;

use crate::mock_platform::*;

const UPDATE: &str = r#"{"FIRMWARE_UPDATE":{"commit":"def456","url":"http://fw.test/fw.bin"}}"#;

/// Above the text payload limit, so the broker hands it out as a stream.
fn large_image() -> Vec<u8> {
    (0..20_000u32).map(|i| (i % 251) as u8).collect()
}

#[test]
fn http_failure_becomes_the_device_status() {
    let mut h = Harness::completed(test_config());
    h.ports_mut().flasher.url_result = HttpUpdateResult::Failed(UpdateError::HttpStatus(404));

    h.deliver(UPDATE);

    assert!(!h.agent.restart_pending());
    assert_eq!(h.ports().flasher.restarts, 0);
    assert_eq!(h.agent.status(), "HTTP status 404");
    assert!(h.status_texts().contains(&r#"{"status":"HTTP status 404"}"#.to_string()));
    assert!(h.events().contains(&AgentEvent::UpdateFinished(FlashOutcome::Failed(
        UpdateError::HttpStatus(404)
    ))));
}

#[test]
fn failed_download_is_checked_in() {
    let mut h = Harness::completed(test_config());
    h.ports_mut().flasher.url_result = HttpUpdateResult::Failed(UpdateError::HttpStatus(404));
    h.ports_mut().http.respond(r#"{"registration":{"status":"OK"}}"#);

    h.deliver(UPDATE);

    let http = &h.ports().http;
    assert_eq!(http.requests.len(), 2);
    assert!(http.last_request().contains(r#""status":"HTTP status 404""#));
}

#[test]
fn failure_inside_a_checkin_does_not_check_in_again() {
    let mut h = Harness::completed(test_config());
    h.ports_mut().flasher.url_result = HttpUpdateResult::Failed(UpdateError::HttpStatus(500));
    h.ports_mut()
        .http
        .respond(r#"{"registration":{"status":"FIRMWARE_UPDATE","url":"fw.test/fw.bin"}}"#);

    assert_eq!(
        h.agent.checkin(),
        Ok(DispatchOutcome::Flash(FlashOutcome::Failed(
            UpdateError::HttpStatus(500)
        )))
    );
    assert_eq!(h.ports().http.requests.len(), 2);
    assert_eq!(h.agent.status(), "HTTP status 500");
}

#[test]
fn no_newer_image_keeps_running() {
    let mut h = Harness::completed(test_config());
    h.ports_mut().flasher.url_result = HttpUpdateResult::NoUpdates;

    h.deliver(UPDATE);

    assert!(!h.agent.restart_pending());
    assert!(h.events().contains(&AgentEvent::UpdateFinished(FlashOutcome::NoUpdate)));
    assert_eq!(h.agent.status(), "Registered");
}

#[test]
fn checkin_can_trigger_a_direct_update() {
    let mut h = Harness::new(test_config(), test_ports());
    h.ports_mut()
        .http
        .respond(r#"{"registration":{"status":"FIRMWARE_UPDATE","commit":"def456","ott":"tok-9"}}"#);

    assert_eq!(
        h.agent.checkin(),
        Ok(DispatchOutcome::Flash(FlashOutcome::Flashed))
    );
    assert_eq!(
        h.ports().flasher.urls,
        vec!["cloud.test:7442/device/firmware?ott=tok-9".to_string()]
    );
    assert!(h.agent.restart_pending());
}

#[test]
fn streamed_image_is_flashed_and_trigger_cleared() {
    let mut h = Harness::completed(test_config());
    let image = large_image();
    h.ports_mut().mqtt.inject(DEVICE_CHANNEL, image.clone());
    h.advance(1);

    assert_eq!(h.ports().flasher.streamed, vec![image]);
    assert!(h.agent.restart_pending());
    assert_eq!(h.ports().flasher.restarts, 1);
    assert!(h.status_texts().contains(&r#"{"status":"rebooting"}"#.to_string()));

    let mqtt = &h.ports().mqtt;
    let cleared = mqtt.published_on(DEVICE_CHANNEL);
    assert_eq!(cleared.len(), 1);
    assert!(cleared[0].payload.is_empty() && cleared[0].retain);
    assert!(mqtt.retained(DEVICE_CHANNEL).is_none());
    assert!(!devlink::app::ports::MqttSession::is_connected(mqtt));
    assert!(!h.agent.connection().mqtt_connected);
}

#[test]
fn streamed_failure_keeps_the_session() {
    let mut h = Harness::completed(test_config());
    h.ports_mut().flasher.stream_result = Err(UpdateError::FlashFailed);
    h.ports_mut().mqtt.inject(DEVICE_CHANNEL, large_image());
    h.advance(1);

    assert!(!h.agent.restart_pending());
    assert_eq!(
        h.status_texts().last().map(String::as_str),
        Some(r#"{"status":"mqtt_update_failed"}"#)
    );
    assert!(h.agent.connection().mqtt_connected);
    assert!(h.events().contains(&AgentEvent::UpdateFinished(FlashOutcome::Failed(
        UpdateError::FlashFailed
    ))));
}

#[test]
fn nothing_is_pumped_after_a_streamed_flash() {
    let mut h = Harness::completed(test_config());
    h.ports_mut().mqtt.inject(DEVICE_CHANNEL, large_image());
    h.ports_mut()
        .mqtt
        .inject(DEVICE_CHANNEL, r#"{"configuration":{"late":true}}"#);
    h.advance(2);

    assert_eq!(h.ports().flasher.streamed.len(), 1);
    assert!(h.configurations.borrow().is_empty());
}
