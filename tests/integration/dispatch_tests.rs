//! Commands arriving on the device channel once the agent is in its
//! steady state.

use devlink::error::{ParseError, UpdateError};
use devlink::identity::PendingUpdate;
use devlink::ota::FlashOutcome;
use devlink::protocol::channels::{UPDATE_PROMPT, UPDATE_SUCCESS_NOTICE};
use devlink::{AgentEvent, Error, Phase};

use crate::mock_platform::*;

const UPDATE: &str = r#"{"FIRMWARE_UPDATE":{"mac":"DEADBEEFCAFE","commit":"def456","version":"1.1.0","url":"http://fw.test/fw.bin"}}"#;
const ACCEPT: &str = r#"{"notification":{"response_type":"bool","response":true}}"#;
const DECLINE: &str = r#"{"notification":{"response_type":"bool","response":false}}"#;

fn manual_config() -> devlink::AgentConfig {
    let mut config = test_config();
    config.auto_update = false;
    config
}

#[test]
fn auto_update_flashes_and_restarts() {
    let mut h = Harness::completed(test_config());
    h.deliver(UPDATE);

    assert_eq!(h.ports().flasher.urls, vec!["fw.test/fw.bin".to_string()]);
    assert_eq!(h.ports().flasher.restarts, 1);
    assert!(h.agent.restart_pending());
    assert!(h.status_texts().contains(&r#"{"status":"update_started"}"#.to_string()));
    assert!(h.events().contains(&AgentEvent::UpdateFinished(FlashOutcome::Flashed)));

    // Nothing runs after a successful flash.
    let ticks = h.agent.ticks_in_phase();
    h.ports_mut().mqtt.inject(DEVICE_CHANNEL, UPDATE);
    h.advance(3);
    assert_eq!(h.agent.ticks_in_phase(), ticks);
    assert_eq!(h.ports().flasher.urls.len(), 1);
}

#[test]
fn running_firmware_is_not_flashed_again() {
    let mut h = Harness::completed(test_config());
    let same = r#"{"FIRMWARE_UPDATE":{"commit":"abc123","url":"http://fw.test/fw.bin"}}"#;
    h.deliver(same);
    h.deliver(same);
    h.deliver(r#"{"FIRMWARE_UPDATE":{"version":"devlink-test-1.0.0","url":"http://fw.test/fw.bin"}}"#);

    assert!(h.ports().flasher.urls.is_empty());
    assert!(!h.agent.restart_pending());
    assert!(h.agent.identity().pending_update.is_none());
}

#[test]
fn manual_update_waits_for_confirmation() {
    let mut h = Harness::completed(manual_config());
    h.deliver(UPDATE);

    assert!(h.ports().flasher.urls.is_empty());
    assert_eq!(
        h.agent.identity().pending_update,
        Some(PendingUpdate {
            url: "http://fw.test/fw.bin".into(),
            requires_confirmation: true,
        })
    );
    assert_eq!(h.status_texts().last().map(String::as_str), Some(UPDATE_PROMPT));
    assert!(h.events().contains(&AgentEvent::UpdatePending {
        url: "http://fw.test/fw.bin".into()
    }));
    let record = h.ports().storage.record().unwrap();
    assert!(record.contains(r#""update":"http://fw.test/fw.bin""#));
    assert!(record.contains(r#""confirm":true"#));

    h.deliver(ACCEPT);
    assert_eq!(h.ports().flasher.urls, vec!["fw.test/fw.bin".to_string()]);
    assert!(h.agent.restart_pending());
}

#[test]
fn declined_update_stays_pending() {
    let mut h = Harness::completed(manual_config());
    h.deliver(UPDATE);
    h.deliver(DECLINE);

    assert!(h.ports().flasher.urls.is_empty());
    assert!(h.agent.identity().pending_update.is_some());
    assert!(!h.agent.restart_pending());
}

#[test]
fn string_yes_confirms() {
    let mut h = Harness::completed(manual_config());
    h.deliver(UPDATE);
    h.deliver(r#"{"notification":{"response_type":"string","response":"yes"}}"#);
    assert_eq!(h.ports().flasher.urls.len(), 1);
}

#[test]
fn confirmation_without_pending_update_is_ignored() {
    let mut h = Harness::completed(manual_config());
    h.deliver(ACCEPT);
    assert!(h.ports().flasher.urls.is_empty());
    assert!(h.ports().events.failures().is_empty());
}

#[test]
fn forced_update_skips_the_prompt() {
    let mut config = manual_config();
    config.forced_update = true;
    let mut h = Harness::completed(config);
    h.deliver(UPDATE);

    assert_eq!(h.ports().flasher.urls.len(), 1);
    assert!(!h.status_texts().iter().any(|s| s == UPDATE_PROMPT));
}

#[test]
fn registration_can_switch_off_auto_update() {
    let mut ports = test_ports();
    ports
        .http
        .respond(r#"{"registration":{"status":"OK","udid":"udid-0001","owner":"owner-abc","auto_update":false}}"#);
    let mut h = Harness::new(test_config(), ports);
    assert!(h.run_until(Phase::Completed, 20));

    h.deliver(UPDATE);
    assert!(h.ports().flasher.urls.is_empty());
    assert_eq!(h.status_texts().last().map(String::as_str), Some(UPDATE_PROMPT));
}

#[test]
fn one_time_token_resolves_against_the_service() {
    let mut h = Harness::completed(test_config());
    h.deliver(r#"{"FIRMWARE_UPDATE":{"version":"2.0.0","ott":"tok-123"}}"#);
    assert_eq!(
        h.ports().flasher.urls,
        vec!["cloud.test:7442/device/firmware?ott=tok-123".to_string()]
    );
}

#[test]
fn update_without_location_is_an_error() {
    let mut h = Harness::completed(test_config());
    h.deliver(r#"{"FIRMWARE_UPDATE":{"version":"2.0.0"}}"#);

    assert!(h.ports().flasher.urls.is_empty());
    assert_eq!(
        h.ports().events.failures(),
        vec![Error::Update(UpdateError::NoUrl)]
    );
}

#[test]
fn landed_update_is_announced_and_cleared() {
    let mut ports = test_ports();
    ports.storage = MockStorage::with_record(
        r#"{"owner":"owner-abc","apikey":"test-api-key-0001","udid":"udid-0001","update":"http://fw.test/fw.bin"}"#,
    );
    ports.http.respond(r#"{"registration":{"status":"OK"}}"#);
    let mut h = Harness::new(test_config(), ports);
    assert!(h.run_until(Phase::Completed, 20));
    assert!(h.agent.identity().pending_update.is_some());

    h.deliver(r#"{"FIRMWARE_UPDATE":{"commit":"abc123"}}"#);

    assert!(h.agent.identity().pending_update.is_none());
    assert!(h.events().contains(&AgentEvent::UpdateLanded));
    assert_eq!(
        h.status_texts().last().map(String::as_str),
        Some(UPDATE_SUCCESS_NOTICE)
    );
    assert!(!h.ports().storage.record().unwrap().contains("update"));
    assert!(h.ports().flasher.urls.is_empty());

    // Announced again: nothing left to do.
    let notices = h.status_texts().len();
    h.deliver(r#"{"FIRMWARE_UPDATE":{"commit":"abc123"}}"#);
    assert_eq!(h.status_texts().len(), notices);
    assert!(h.ports().flasher.urls.is_empty());
}

#[test]
fn stored_pending_update_is_applied_on_confirmation() {
    let mut ports = test_ports();
    ports.storage = MockStorage::with_record(
        r#"{"owner":"owner-abc","udid":"udid-0001","update":"http://fw.test/stored.bin","confirm":true}"#,
    );
    ports.http.respond(r#"{"registration":{"status":"OK"}}"#);
    let mut h = Harness::new(manual_config(), ports);
    assert!(h.run_until(Phase::Completed, 20));

    h.deliver(ACCEPT);
    assert_eq!(h.ports().flasher.urls, vec!["fw.test/stored.bin".to_string()]);
}

#[test]
fn direct_update_from_registration_status() {
    let mut h = Harness::completed(test_config());
    h.deliver(r#"{"registration":{"status":"FIRMWARE_UPDATE","mac":"DEADBEEFCAFE","url":"fw.test/direct.bin"}}"#);
    assert_eq!(h.ports().flasher.urls, vec!["fw.test/direct.bin".to_string()]);
    assert!(h.agent.restart_pending());
}

#[test]
fn configuration_is_forwarded_byte_for_byte() {
    let mut h = Harness::completed(test_config());
    h.deliver(r#"noise {"configuration":{"interval":60,"name":"a b"}} trailing"#);
    assert_eq!(
        h.configurations.borrow().as_slice(),
        [r#"{"configuration":{"interval":60,"name":"a b"}}"#.to_string()]
    );
}

#[test]
fn latest_marker_decides_the_kind() {
    let mut h = Harness::completed(manual_config());
    h.deliver(&format!(r#"{ACCEPT} {{"configuration":{{"x":1}}}}"#));
    assert_eq!(h.configurations.borrow().len(), 1);
    assert!(h.ports().flasher.urls.is_empty());
}

#[test]
fn configuration_migrates_wifi() {
    let mut h = Harness::completed(test_config());
    h.deliver(r#"{"configuration":{"THINX_ENV_SSID":"NewNet","THINX_ENV_PASS":"newpass123"}}"#);

    let radio = &h.ports().radio;
    assert_eq!(radio.disconnects, 1);
    assert_eq!(
        radio.begins.last(),
        Some(&Some(("NewNet".to_string(), "newpass123".to_string())))
    );
    assert!(h.agent.connection().connected);
    assert_eq!(h.configurations.borrow().len(), 1);
}

#[test]
fn short_credential_keys_also_migrate() {
    let mut h = Harness::completed(test_config());
    h.deliver(r#"{"configuration":{"ENV_SSID":"NewNet","ENV_PASS":"newpass123"}}"#);
    assert_eq!(h.ports().radio.disconnects, 1);
    assert!(h.agent.connection().connected);
}

#[test]
fn migration_times_out_without_a_link() {
    let mut h = Harness::completed(test_config());
    h.ports_mut().radio.join_succeeds = false;
    let before = h.ports().clock.now;

    h.deliver(r#"{"configuration":{"ENV_SSID":"NewNet","ENV_PASS":"newpass123"}}"#);

    assert!(!h.agent.connection().connected);
    assert!(h.ports().clock.now - before >= 1_000);
    assert_eq!(h.configurations.borrow().len(), 1);
}

#[test]
fn migration_disabled_ignores_credentials() {
    let mut config = test_config();
    config.wifi_migration = false;
    let mut h = Harness::completed(config);
    h.deliver(r#"{"configuration":{"ENV_SSID":"NewNet","ENV_PASS":"newpass123"}}"#);

    assert_eq!(h.ports().radio.disconnects, 0);
    assert_eq!(h.ports().radio.begins.len(), 1);
    assert_eq!(h.configurations.borrow().len(), 1);
}

#[test]
fn unknown_payload_changes_nothing() {
    let mut h = Harness::completed(test_config());
    let identity = h.agent.identity().clone();
    let published = h.ports().mqtt.published().len();
    let events = h.events().len();

    h.deliver("ping");

    assert_eq!(h.agent.identity(), &identity);
    assert_eq!(h.ports().mqtt.published().len(), published);
    assert_eq!(h.events().len(), events);
}

#[test]
fn truncated_registration_is_rejected_whole() {
    let mut h = Harness::completed(test_config());
    let identity = h.agent.identity().clone();

    h.deliver(r#"{"registration":{"status":"OK","udid":"udid-7777""#);

    assert_eq!(h.agent.identity(), &identity);
    assert_eq!(
        h.ports().events.failures(),
        vec![Error::Parse(ParseError::Truncated)]
    );
}

#[test]
fn other_topics_are_not_dispatched() {
    let mut h = Harness::completed(test_config());
    h.ports_mut()
        .mqtt
        .inject("/owner-abc/other-device", r#"{"configuration":{"x":1}}"#);
    h.advance(1);
    assert!(h.configurations.borrow().is_empty());
}

#[test]
fn backlog_is_drained_a_batch_per_tick() {
    let mut h = Harness::completed(test_config());
    for i in 0..10 {
        h.ports_mut()
            .mqtt
            .inject(DEVICE_CHANNEL, format!(r#"{{"configuration":{{"seq":{i}}}}}"#));
    }
    h.advance(1);
    assert_eq!(h.configurations.borrow().len(), 8);
    h.advance(1);
    assert_eq!(h.configurations.borrow().len(), 10);
}
