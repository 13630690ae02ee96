//! Lifecycle walk: WiFi, checkin, MQTT session, finalize and steady state.

use devlink::app::ports::{DiscoveredService, RadioMode};
use devlink::error::TransportError;
use devlink::{AgentEvent, Error, Phase};

use crate::mock_platform::*;

#[test]
fn new_agent_has_loaded_identity_and_waits_for_wifi() {
    let h = Harness::new(test_config(), test_ports());
    assert_eq!(h.agent.phase(), Phase::ConnectWifi);
    assert_eq!(h.agent.hardware_id(), "DEADBEEFCAFE");
    assert_eq!(h.agent.identity().api_key, "test-api-key-0001");
    assert_eq!(h.agent.identity().owner, "owner-abc");
    assert_eq!(h.agent.status(), "Registered");
    assert_eq!(
        h.ports().events.phases(),
        vec![Phase::ConnectWifi],
        "Init must have run inside new()"
    );
}

#[test]
fn full_walk_reaches_completed() {
    let mut h = Harness::completed(test_config());

    assert_eq!(
        h.ports().events.phases(),
        vec![
            Phase::ConnectWifi,
            Phase::ConnectApi,
            Phase::ConnectMqtt,
            Phase::CheckinMqtt,
            Phase::Finalize,
            Phase::Completed,
        ]
    );
    assert_eq!(h.agent.identity().udid, UDID);
    assert_eq!(h.agent.identity().alias, "kitchen");
    assert!(h.agent.connection().connected);
    assert!(h.agent.connection().mqtt_connected);

    let mqtt = &h.ports().mqtt;
    assert_eq!(mqtt.subscriptions(), [DEVICE_CHANNEL.to_string()]);
    assert_eq!(mqtt.client_id(), "DEADBEEFCAFE");
    assert_eq!(
        mqtt.will(),
        Some((STATUS_CHANNEL, r#"{"status":"disconnected"}"#))
    );
    assert_eq!(h.status_texts(), vec![r#"{"status":"connected"}"#.to_string()]);
    assert!(h.events().contains(&AgentEvent::Registered { udid: UDID.into() }));

    // Further ticks stay in the steady state.
    h.advance(5);
    assert_eq!(h.agent.phase(), Phase::Completed);
    assert_eq!(h.finalized.get(), 1);
}

#[test]
fn first_registration_is_persisted_before_mqtt() {
    let mut ports = test_ports();
    ports
        .http
        .respond(r#"{"registration":{"status":"OK","udid":"abc123"}}"#);
    let mut h = Harness::new(test_config(), ports);
    assert!(h.ports().storage.record().is_none());

    assert!(h.run_until(Phase::ConnectMqtt, 20));
    assert_eq!(h.agent.identity().udid, "abc123");
    let record = h.ports().storage.record().unwrap();
    assert!(record.contains(r#""udid":"abc123""#));
    assert_eq!(h.ports().mqtt.connect_count(), 0);
}

#[test]
fn checkin_request_is_framed_for_the_service() {
    let h = Harness::completed(test_config());
    let http = &h.ports().http;

    assert_eq!(http.targets, vec![("cloud.test".to_string(), 7442)]);
    let request = &http.requests[0];
    assert!(request.starts_with("POST /device/register HTTP/1.1\r\n"));
    assert!(request.contains("Host: cloud.test\r\n"));
    assert!(request.contains("Authentication: test-api-key-0001\r\n"));
    assert!(request.contains("User-Agent: devlink-test\r\n"));

    let body = request.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    let reg = &json["registration"];
    assert_eq!(reg["mac"], "DEADBEEFCAFE");
    assert_eq!(reg["commit"], "abc123");
    assert_eq!(reg["owner"], "owner-abc");
    assert_eq!(reg["status"], "Registered");
    assert!(reg.get("udid").is_none(), "blank fields are omitted");
    assert!(reg.get("alias").is_none());
    assert!(!body.contains(r#""""#));
    assert!(request.contains(&format!("Content-Length: {}\r\n", body.len())));
}

#[test]
fn placeholder_udid_is_not_sent() {
    let mut config = test_config();
    config.udid = "tbd".into();
    let mut ports = test_ports();
    ports.http.respond(&registration_ok(UDID));
    let mut h = Harness::new(config, ports);
    assert!(h.run_until(Phase::ConnectMqtt, 20));

    let request = &h.ports().http.requests[0];
    let body = request.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert!(json["registration"].get("udid").is_none());
    assert_eq!(h.agent.identity().udid, UDID);
}

#[test]
fn station_joins_with_build_credentials() {
    let h = Harness::completed(test_config());
    assert_eq!(
        h.ports().radio.begins,
        vec![Some(("TestNet".to_string(), "password1".to_string()))]
    );
}

#[test]
fn short_build_ssid_uses_stored_network() {
    let mut config = test_config();
    config.env_ssid = "ab".into();
    let mut h = Harness::new(config, test_ports());
    h.advance(1);
    assert_eq!(h.ports().radio.begins, vec![None]);
}

#[test]
fn no_udid_skips_the_mqtt_session() {
    let mut ports = test_ports();
    ports.http.respond(r#"{"registration":{"status":"OK"}}"#);
    let mut h = Harness::new(test_config(), ports);

    assert!(h.run_until(Phase::Completed, 20));
    assert!(!h.ports().events.phases().contains(&Phase::CheckinMqtt));
    assert_eq!(h.ports().mqtt.connect_count(), 0);
    assert_eq!(h.finalized.get(), 1);
}

#[test]
fn access_point_fallback_after_retry_limit() {
    let mut ports = test_ports();
    ports.radio.join_succeeds = false;
    let mut h = Harness::new(test_config(), ports);

    assert!(h.run_until(Phase::ConnectApi, 20));
    let radio = &h.ports().radio;
    assert_eq!(radio.mode, RadioMode::AccessPoint);
    assert_eq!(
        radio.access_point,
        Some(("DEVLINK-AP".to_string(), "PASSWORD".to_string()))
    );
    assert!(h.agent.connection().ap_fallback);
    assert!(h.events().contains(&AgentEvent::AccessPointFallback));
    assert_eq!(h.agent.connection().wifi_retry, 0);

    // Parked: no checkin while hosting the access point.
    h.advance(10);
    assert_eq!(h.agent.phase(), Phase::ConnectApi);
    assert!(h.ports().http.targets.is_empty());
    let fallbacks = h
        .events()
        .iter()
        .filter(|e| **e == AgentEvent::AccessPointFallback)
        .count();
    assert_eq!(fallbacks, 1);
}

#[test]
fn provisioned_credentials_release_a_parked_checkin() {
    let mut config = test_config();
    config.api_key = String::new();
    config.owner = String::new();
    let mut ports = test_ports();
    ports.http.respond(&registration_ok(UDID));
    let mut h = Harness::new(config, ports);

    assert!(h.run_until(Phase::ConnectApi, 20));
    h.advance(3);
    assert_eq!(h.agent.phase(), Phase::ConnectApi);
    assert!(h.ports().http.targets.is_empty());

    // Too short: ignored and not persisted.
    h.agent.set_credentials("key", "own").unwrap();
    assert!(h.ports().storage.record().is_none());

    h.agent.set_credentials("test-api-key-0001", "owner-abc").unwrap();
    let record = h.ports().storage.record().unwrap();
    assert!(record.contains(r#""apikey":"test-api-key-0001""#));
    assert!(record.contains(r#""owner":"owner-abc""#));

    h.advance(1);
    assert_eq!(h.ports().http.targets.len(), 1);
    assert!(h.ports().http.last_request().contains("Authentication: test-api-key-0001"));
    assert!(h.run_until(Phase::Completed, 20));
    assert_eq!(h.agent.identity().udid, UDID);
}

#[test]
fn station_link_after_fallback_resumes_the_checkin() {
    let mut config = test_config();
    config.api_key = String::new();
    let mut ports = test_ports();
    ports.radio.join_succeeds = false;
    ports.http.respond(&registration_ok(UDID));
    let mut h = Harness::new(config, ports);

    assert!(h.run_until(Phase::ConnectApi, 20));
    assert!(h.agent.connection().ap_fallback);

    // A setup portal hands over the key and joins the station network.
    h.agent.set_credentials("test-api-key-0001", "owner-abc").unwrap();
    h.ports_mut().radio.mode = RadioMode::Station;
    h.ports_mut().radio.link_up = true;

    h.advance(1);
    assert!(!h.agent.connection().ap_fallback);
    assert!(h.agent.connection().connected);
    assert_eq!(h.ports().http.targets.len(), 1);
    assert!(h.run_until(Phase::Completed, 20));
}

#[test]
fn reset_wifi_retry_starts_a_fresh_association() {
    let mut ports = test_ports();
    ports.radio.join_succeeds = false;
    let mut h = Harness::new(test_config(), ports);

    h.advance(3);
    assert_eq!(h.ports().radio.begins.len(), 1);
    assert_eq!(h.agent.connection().wifi_retry, 2);

    h.agent.reset_wifi_retry();
    assert_eq!(h.agent.connection().wifi_retry, 0);
    assert!(!h.agent.connection().wifi_connection_in_progress);

    h.advance(1);
    assert_eq!(h.ports().radio.begins.len(), 2);
}

#[test]
fn discovered_proxy_redirects_endpoints() {
    let mut ports = test_ports();
    ports.http.respond(&registration_ok(UDID));
    ports.discovery.service = Some(DiscoveredService {
        host: "proxy.local".into(),
        port: 7443,
    });
    let mut h = Harness::new(test_config(), ports);

    assert!(h.run_until(Phase::Completed, 20));
    assert_eq!(
        h.ports().discovery.queries,
        vec![("thinx".to_string(), "tcp".to_string())]
    );
    assert_eq!(h.ports().http.targets, vec![("proxy.local".to_string(), 7443)]);
    assert_eq!(h.agent.endpoints().mqtt_host, "proxy.local");
    assert_eq!(h.agent.endpoints().mqtt_port, 1883);
}

#[test]
fn failed_checkin_does_not_block_the_lifecycle() {
    let mut ports = test_ports();
    ports.http.refuse = true;
    let mut h = Harness::new(test_config(), ports);

    assert!(h.run_until(Phase::Completed, 20));
    assert_eq!(
        h.ports().events.failures(),
        vec![Error::Transport(TransportError::ConnectFailed)]
    );
    assert!(h.agent.identity().udid.is_empty());
}

#[test]
fn silent_service_times_out() {
    let mut h = Harness::new(test_config(), test_ports());
    assert!(h.run_until(Phase::ConnectMqtt, 20));

    assert_eq!(
        h.ports().events.failures(),
        vec![Error::Transport(TransportError::Timeout)]
    );
    assert!(h.ports().clock.now >= 2_000);
}

#[test]
fn unauthorized_owner_leaves_identity_untouched() {
    let mut ports = test_ports();
    ports
        .http
        .respond(r#"{"registration":{"status":"OK","udid":"udid-9999"}} old_protocol_owner:-undefined-"#);
    let mut h = Harness::new(test_config(), ports);

    assert!(h.run_until(Phase::ConnectMqtt, 20));
    assert_eq!(h.ports().events.failures(), vec![Error::Authorization]);
    assert!(h.agent.identity().udid.is_empty());
    assert!(h.ports().storage.record().is_none());
}

#[test]
fn refused_broker_keeps_retrying_connect_mqtt() {
    let mut ports = test_ports();
    ports.http.respond(&registration_ok(UDID));
    ports.mqtt.refuse_connections(true);
    let mut h = Harness::new(test_config(), ports);

    assert!(h.run_until(Phase::ConnectMqtt, 20));
    h.advance(3);
    assert_eq!(h.agent.phase(), Phase::ConnectMqtt);
    assert_eq!(h.ports().mqtt.connect_count(), 3);

    h.ports_mut().mqtt.refuse_connections(false);
    assert!(h.run_until(Phase::Completed, 10));
}

#[test]
fn completed_reconnects_no_faster_than_the_interval() {
    let mut h = Harness::completed(test_config());
    assert_eq!(h.ports().mqtt.connect_count(), 1);

    h.ports_mut().mqtt.drop_session();
    h.advance(1);
    assert!(!h.agent.connection().mqtt_connected);

    // First attempt after a drop goes out immediately.
    h.advance(1);
    assert_eq!(h.ports().mqtt.connect_count(), 2);
    assert!(h.agent.connection().mqtt_connected);
    assert_eq!(h.ports().mqtt.subscriptions(), [DEVICE_CHANNEL.to_string()]);

    h.ports_mut().mqtt.drop_session();
    h.advance(3);
    assert_eq!(h.ports().mqtt.connect_count(), 2, "throttled");

    h.ports_mut().clock.advance(5_000);
    h.advance(1);
    assert_eq!(h.ports().mqtt.connect_count(), 3);
    assert_eq!(h.agent.phase(), Phase::Completed);
}

#[test]
fn set_status_checks_in_and_publishes() {
    let mut h = Harness::completed(test_config());
    h.ports_mut().http.respond(r#"{"registration":{"status":"OK"}}"#);

    h.agent.set_status("Ready");
    assert_eq!(h.agent.status(), "Ready");
    assert_eq!(h.ports().http.requests.len(), 2);
    assert!(h.ports().http.last_request().contains(r#""status":"Ready""#));
    assert_eq!(
        h.status_texts().last().map(String::as_str),
        Some(r#"{"status":"Ready"}"#)
    );
}

#[test]
fn set_location_is_sent_with_the_next_checkin() {
    let mut h = Harness::completed(test_config());
    h.ports_mut().http.respond(r#"{"registration":{"status":"OK"}}"#);

    h.agent.set_location(50.1, 14.4);
    let request = h.ports().http.last_request();
    assert!(request.contains(r#""lat":50.1"#));
    assert!(request.contains(r#""lon":14.4"#));
}

#[test]
fn status_offline_is_not_checked_in() {
    let mut h = Harness::new(test_config(), test_ports());
    h.agent.set_status("Booting");
    assert_eq!(h.agent.status(), "Booting");
    assert!(h.ports().http.targets.is_empty());
}

#[test]
fn publish_requires_a_session() {
    let mut h = Harness::new(test_config(), test_ports());
    assert_eq!(
        h.agent.publish("hello", false),
        Err(Error::Transport(TransportError::NotConnected))
    );

    let mut h = Harness::completed(test_config());
    h.agent.publish("hello", false).unwrap();
    h.agent.publish_status(r#"{"status":"custom"}"#).unwrap();

    let mqtt = &h.ports().mqtt;
    let device = mqtt.published_on(DEVICE_CHANNEL);
    assert_eq!(device.len(), 1);
    assert_eq!(device[0].text(), "hello");
    assert!(!device[0].retain);
    assert_eq!(mqtt.retained(STATUS_CHANNEL), Some(&br#"{"status":"custom"}"#[..]));
}

#[test]
fn explicit_checkin_dispatches_the_answer() {
    use devlink::protocol::dispatch::DispatchOutcome;

    let mut h = Harness::new(test_config(), test_ports());
    h.ports_mut().http.respond(&registration_ok("udid-4242"));
    assert_eq!(h.agent.checkin(), Ok(DispatchOutcome::Registered));
    assert_eq!(h.agent.identity().udid, "udid-4242");
}
