//! Identity persistence across agent restarts and storage backends.

use devlink::adapters::file_store::FileStore;
use devlink::error::PersistenceError;
use devlink::identity::{self, DeviceIdentity, LoadSource, PendingUpdate};
use devlink::{AgentEvent, Error, Phase};

use crate::mock_platform::*;

#[test]
fn stored_record_overrides_build_defaults() {
    let mut ports = test_ports();
    ports.storage = MockStorage::with_record(
        r#"{"owner":"owner-stored","apikey":"stored-key-42","udid":"udid-stored","alias":"porch"}"#,
    );
    let h = Harness::new(test_config(), ports);

    let id = h.agent.identity();
    assert_eq!(id.owner, "owner-stored");
    assert_eq!(id.api_key, "stored-key-42");
    assert_eq!(id.udid, "udid-stored");
    assert_eq!(id.alias, "porch");
    assert_eq!(id.commit_id, "abc123", "build constants are never persisted");
}

#[test]
fn corrupt_record_falls_back_to_defaults_as_a_whole() {
    let mut ports = test_ports();
    ports.storage = MockStorage::with_record(r#"{"owner":"half-written","udid":"udid-half""#);
    let h = Harness::new(test_config(), ports);

    assert_eq!(
        h.agent.identity(),
        &DeviceIdentity::from_config(&test_config())
    );
}

#[test]
fn erased_flash_after_record_is_ignored() {
    let mut raw = br#"{"udid":"udid-erased"}"#.to_vec();
    raw.extend_from_slice(&[0xFF; 32]);
    let mut storage = MockStorage::default();
    storage
        .entries
        .insert(format!("{}::{}", identity::NAMESPACE, identity::RECORD_KEY), raw);

    let loaded = identity::load(&storage, &DeviceIdentity::default());
    assert_eq!(loaded.source, LoadSource::Stored);
    assert_eq!(loaded.identity.udid, "udid-erased");
}

#[test]
fn registration_survives_a_restart() {
    let h = Harness::completed(test_config());
    let record = h.ports().storage.record().unwrap();

    // Same storage, fresh agent: no checkin needed to know who we are.
    let mut ports = test_ports();
    ports.storage = MockStorage::with_record(&record);
    let restarted = Harness::new(test_config(), ports);

    assert_eq!(restarted.agent.identity(), h.agent.identity());
    assert_eq!(restarted.agent.identity().udid, UDID);
}

#[test]
fn reloaded_record_saves_to_identical_bytes() {
    let h = Harness::completed(aliased_config());
    let first = h.ports().storage.record().unwrap();

    let defaults = DeviceIdentity::from_config(&test_config());
    let decoded = identity::decode(first.as_bytes(), &defaults).unwrap();
    let again = identity::encode(&decoded).unwrap();
    assert_eq!(String::from_utf8(again).unwrap(), first);
}

fn aliased_config() -> devlink::AgentConfig {
    let mut config = test_config();
    config.alias = "garage".into();
    config
}

#[test]
fn short_registration_fields_keep_current_values() {
    let mut ports = test_ports();
    ports
        .http
        .respond(r#"{"registration":{"status":"OK","alias":"x","owner":"y","udid":"abcd"}}"#);
    let mut h = Harness::new(test_config(), ports);
    assert!(h.run_until(Phase::ConnectMqtt, 20));

    let id = h.agent.identity();
    assert_eq!(id.owner, "owner-abc");
    assert!(id.alias.is_empty());
    assert!(id.udid.is_empty());
    assert!(!h.events().iter().any(|e| matches!(e, AgentEvent::Registered { .. })));
}

#[test]
fn failed_save_is_reported() {
    let mut ports = test_ports();
    ports.storage.fail_writes = true;
    ports.http.respond(&registration_ok(UDID));
    let mut h = Harness::new(test_config(), ports);
    assert!(h.run_until(Phase::ConnectMqtt, 20));

    assert_eq!(
        h.ports().events.failures(),
        vec![Error::Persistence(PersistenceError::Io)]
    );
    assert!(h.ports().storage.record().is_none());
}

#[test]
fn file_store_keeps_the_identity() {
    let root = std::env::temp_dir().join(format!("devlink-identity-{}", std::process::id()));
    let mut store = FileStore::new(root.clone());

    let identity = DeviceIdentity {
        owner: "owner-abc".into(),
        api_key: "test-api-key-0001".into(),
        udid: UDID.into(),
        alias: "kitchen".into(),
        pending_update: Some(PendingUpdate {
            url: "http://fw.test/fw.bin".into(),
            requires_confirmation: true,
        }),
        ..DeviceIdentity::default()
    };
    identity::save(&mut store, &identity).unwrap();

    let loaded = identity::load(&store, &DeviceIdentity::default());
    assert_eq!(loaded.source, LoadSource::Stored);
    assert_eq!(loaded.identity, identity);

    let _ = std::fs::remove_dir_all(&root);
}
