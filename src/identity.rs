//! Persisted device identity.
//!
//! The record is a single JSON object of at most [`MAX_RECORD_LEN`] bytes,
//! stored under one key of a [`StoragePort`]:
//!
//! ```text
//! {"owner":"…","apikey":"…","udid":"…","alias":"…","update":"…","confirm":true}
//! ```
//!
//! Empty fields are omitted and the field order is fixed, so loading a
//! record this module wrote and saving it again reproduces the same bytes.
//! A record that is absent, truncated or otherwise malformed is ignored as a
//! whole: [`load`] then returns the build-time defaults, never a mix.

use core::fmt::Write as _;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};
use crate::config::AgentConfig;
use crate::error::{PersistenceError, Result};

/// Storage namespace holding the identity record.
pub const NAMESPACE: &str = "devlink";
/// Key of the identity record inside [`NAMESPACE`].
pub const RECORD_KEY: &str = "identity";
/// Fixed upper bound of the persisted record.
pub const MAX_RECORD_LEN: usize = 512;

const MIN_UDID_LEN: usize = 5;
const MIN_API_KEY_LEN: usize = 5;
const MIN_OWNER_LEN: usize = 5;

/// Uppercase hex rendering of the station MAC, e.g. `DEADBEEFCAFE`.
pub type HardwareId = heapless::String<16>;

/// Derive the hardware id reported in every checkin.
pub fn hardware_id(mac: &[u8; 6]) -> HardwareId {
    let mut id = HardwareId::new();
    for byte in mac {
        let _ = write!(id, "{byte:02X}");
    }
    id
}

/// An update the service announced but that has not landed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    /// Direct image URL or one-time-token URL.
    pub url: String,
    /// `true` when the user must confirm before flashing.
    pub requires_confirmation: bool,
}

/// Who this device is, as far as the management service is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub owner: String,
    pub api_key: String,
    /// Assigned by the service on first successful registration.
    pub udid: String,
    pub alias: String,
    pub pending_update: Option<PendingUpdate>,
    /// Running firmware, from build constants. Not persisted.
    pub firmware_version: String,
    /// Running commit, from build constants. Not persisted.
    pub commit_id: String,
}

impl DeviceIdentity {
    /// Identity made only of build-time constants.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            owner: config.owner.clone(),
            api_key: config.api_key.clone(),
            udid: config.udid.clone(),
            alias: config.alias.clone(),
            pending_update: None,
            firmware_version: config.firmware_version.clone(),
            commit_id: config.commit_id.clone(),
        }
    }

    pub fn has_udid(&self) -> bool {
        self.udid.len() >= MIN_UDID_LEN
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.len() >= MIN_API_KEY_LEN
    }

    /// Take an API key and owner handed over at setup time. Values under
    /// five characters are ignored. Returns whether anything changed.
    pub fn provision(&mut self, api_key: &str, owner: &str) -> bool {
        let mut changed = false;
        if api_key.len() >= MIN_API_KEY_LEN && self.api_key != api_key {
            self.api_key = api_key.to_string();
            changed = true;
        }
        if owner.len() >= MIN_OWNER_LEN && self.owner != owner {
            self.owner = owner.to_string();
            changed = true;
        }
        changed
    }

    /// Whether `commit` or `version` names the firmware that is running now.
    pub fn is_running(&self, commit: Option<&str>, version: Option<&str>) -> bool {
        let commit_match = matches!(commit, Some(c) if !c.is_empty() && c == self.commit_id);
        let version_match =
            matches!(version, Some(v) if !v.is_empty() && v == self.firmware_version);
        commit_match || version_match
    }
}

/// Where [`load`] got its identity from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Stored,
    Defaults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedIdentity {
    pub identity: DeviceIdentity,
    pub source: LoadSource,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// On-storage shape. Field order here is the byte order on flash.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredRecord {
    #[serde(skip_serializing_if = "String::is_empty")]
    owner: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    apikey: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    udid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    alias: String,
    #[serde(alias = "ott", skip_serializing_if = "String::is_empty")]
    update: String,
    #[serde(skip_serializing_if = "is_false")]
    confirm: bool,
}

impl From<&DeviceIdentity> for StoredRecord {
    fn from(id: &DeviceIdentity) -> Self {
        let (update, confirm) = match &id.pending_update {
            Some(p) => (p.url.clone(), p.requires_confirmation),
            None => (String::new(), false),
        };
        Self {
            owner: id.owner.clone(),
            apikey: id.api_key.clone(),
            udid: id.udid.clone(),
            alias: id.alias.clone(),
            update,
            confirm,
        }
    }
}

/// Check structural well-formedness of a raw record.
///
/// The record ends at the first NUL or erased-flash (`0xFF`) byte, must
/// start with `{`, and must close its outermost brace within that span.
/// Braces inside string literals do not count. Returns the object bytes.
pub fn validate_record(raw: &[u8]) -> core::result::Result<&[u8], PersistenceError> {
    let end = raw
        .iter()
        .position(|&b| b == 0x00 || b == 0xFF)
        .unwrap_or(raw.len());
    let raw = &raw[..end];
    if raw.first() != Some(&b'{') {
        return Err(PersistenceError::Corrupt);
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in raw.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&raw[..=i]);
                }
            }
            _ => {}
        }
    }
    Err(PersistenceError::Corrupt)
}

/// Serialize `identity` into its persisted form.
pub fn encode(identity: &DeviceIdentity) -> core::result::Result<Vec<u8>, PersistenceError> {
    let bytes = serde_json::to_vec(&StoredRecord::from(identity))
        .map_err(|_| PersistenceError::Corrupt)?;
    if bytes.len() > MAX_RECORD_LEN {
        return Err(PersistenceError::TooLarge);
    }
    Ok(bytes)
}

/// Parse a raw record and lay it over `defaults`.
pub fn decode(
    raw: &[u8],
    defaults: &DeviceIdentity,
) -> core::result::Result<DeviceIdentity, PersistenceError> {
    let object = validate_record(raw)?;
    let record: StoredRecord =
        serde_json::from_slice(object).map_err(|_| PersistenceError::Corrupt)?;

    let mut identity = defaults.clone();
    let adopt = |field: &mut String, value: String| {
        if !value.is_empty() {
            *field = value;
        }
    };
    adopt(&mut identity.owner, record.owner);
    adopt(&mut identity.api_key, record.apikey);
    adopt(&mut identity.udid, record.udid);
    adopt(&mut identity.alias, record.alias);
    if !record.update.is_empty() {
        identity.pending_update = Some(PendingUpdate {
            url: record.update,
            requires_confirmation: record.confirm,
        });
    }
    Ok(identity)
}

/// Read the persisted identity, falling back to `defaults` as a whole.
pub fn load<S: StoragePort>(storage: &S, defaults: &DeviceIdentity) -> LoadedIdentity {
    let mut buf = [0u8; MAX_RECORD_LEN];
    let fallback = || LoadedIdentity {
        identity: defaults.clone(),
        source: LoadSource::Defaults,
    };

    let len = match storage.read(NAMESPACE, RECORD_KEY, &mut buf) {
        Ok(len) => len,
        Err(StorageError::NotFound) => {
            info!("Identity: no stored record, using build defaults");
            return fallback();
        }
        Err(e) => {
            warn!("Identity: read failed ({}), using build defaults", e);
            return fallback();
        }
    };

    match decode(&buf[..len], defaults) {
        Ok(identity) => {
            info!(
                "Identity: restored (udid={}, owner set={}, pending update={})",
                if identity.udid.is_empty() { "-" } else { identity.udid.as_str() },
                !identity.owner.is_empty(),
                identity.pending_update.is_some()
            );
            LoadedIdentity {
                identity,
                source: LoadSource::Stored,
            }
        }
        Err(e) => {
            warn!("Identity: stored record rejected ({}), using build defaults", e);
            fallback()
        }
    }
}

/// Persist `identity` in one atomic write.
pub fn save<S: StoragePort>(storage: &mut S, identity: &DeviceIdentity) -> Result<()> {
    let bytes = encode(identity)?;
    storage
        .write(NAMESPACE, RECORD_KEY, &bytes)
        .map_err(PersistenceError::from)?;
    info!("Identity: saved ({} bytes)", bytes.len());
    Ok(())
}
