//! Shared validation helpers for the adapter layer.

use crate::app::ports::RadioError;

/// Returns `true` if every byte of `s` is in the printable ASCII range
/// `0x20..=0x7E` (space through tilde, inclusive).
pub(super) fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// SSIDs are 1-32 printable ASCII bytes.
pub(super) fn validate_ssid(ssid: &str) -> Result<(), RadioError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(RadioError::InvalidSsid);
    }
    Ok(())
}

/// Empty for an open network, otherwise 8-64 bytes (WPA2).
pub(super) fn validate_password(password: &str) -> Result<(), RadioError> {
    if password.is_empty() || (8..=64).contains(&password.len()) {
        Ok(())
    } else {
        Err(RadioError::InvalidPassword)
    }
}

/// `host:port` split, tolerating a bare host.
pub(super) fn split_host_port(authority: &str, default_port: u16) -> (&str, u16) {
    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(p) => (host, p),
            Err(_) => (authority, default_port),
        },
        None => (authority, default_port),
    }
}
