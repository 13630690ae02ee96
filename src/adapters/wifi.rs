//! WiFi radio adapter.
//!
//! Implements [`RadioPort`]. `begin` only starts an association; the
//! lifecycle polls `is_connected` on later iterations.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::EspWifi` in station or
//!   access-point mode.
//! - **all other targets**: a simulated radio that associates after a
//!   configurable number of polls, for host-side runs and tests.

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

use crate::app::ports::{RadioError, RadioMode, RadioPort};

use super::utils::{validate_password, validate_ssid};

#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};

#[cfg(not(target_os = "espidf"))]
use core::cell::Cell;

#[cfg(target_os = "espidf")]
fn auth_for(password: &str) -> bool {
    !password.is_empty()
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF adapter
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct WifiAdapter {
    wifi: EspWifi<'static>,
    mode: RadioMode,
}

#[cfg(target_os = "espidf")]
impl WifiAdapter {
    /// Wrap a constructed `EspWifi`. Nothing is started until `begin`.
    pub fn new(wifi: EspWifi<'static>) -> Self {
        Self {
            wifi,
            mode: RadioMode::Station,
        }
    }

    fn client_config(ssid: &str, password: &str) -> Result<ClientConfiguration, RadioError> {
        Ok(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| RadioError::InvalidSsid)?,
            password: password.try_into().map_err(|_| RadioError::InvalidPassword)?,
            auth_method: if auth_for(password) {
                AuthMethod::WPA2Personal
            } else {
                AuthMethod::None
            },
            ..Default::default()
        })
    }

    /// Station settings the driver already holds, if they name a network.
    fn stored_client(&self) -> Option<ClientConfiguration> {
        match self.wifi.get_configuration() {
            Ok(Configuration::Client(c)) | Ok(Configuration::Mixed(c, _)) if !c.ssid.is_empty() => {
                Some(c)
            }
            _ => None,
        }
    }
}

#[cfg(target_os = "espidf")]
impl RadioPort for WifiAdapter {
    fn is_connected(&self) -> bool {
        self.mode == RadioMode::Station
            && self.wifi.is_connected().unwrap_or(false)
            && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn mode(&self) -> RadioMode {
        self.mode
    }

    fn set_mode(&mut self, mode: RadioMode) {
        self.mode = mode;
    }

    fn begin(&mut self, credentials: Option<(&str, &str)>) -> Result<(), RadioError> {
        let client = match credentials {
            Some((ssid, password)) => {
                validate_ssid(ssid)?;
                validate_password(password)?;
                Self::client_config(ssid, password)?
            }
            None => self.stored_client().ok_or(RadioError::NoCredentials)?,
        };
        info!("WiFi: station join '{}'", client.ssid);

        self.wifi
            .set_configuration(&Configuration::Client(client))
            .map_err(|e| {
                warn!("WiFi: set_configuration failed: {}", e);
                RadioError::DriverFailed
            })?;
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi.start().map_err(|_| RadioError::DriverFailed)?;
        }
        self.wifi.connect().map_err(|e| {
            warn!("WiFi: connect failed: {}", e);
            RadioError::DriverFailed
        })?;
        self.mode = RadioMode::Station;
        Ok(())
    }

    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), RadioError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        let ap = AccessPointConfiguration {
            ssid: ssid.try_into().map_err(|_| RadioError::InvalidSsid)?,
            password: password.try_into().map_err(|_| RadioError::InvalidPassword)?,
            auth_method: if auth_for(password) {
                AuthMethod::WPA2Personal
            } else {
                AuthMethod::None
            },
            ..Default::default()
        };
        let _ = self.wifi.disconnect();
        let _ = self.wifi.stop();
        self.wifi
            .set_configuration(&Configuration::AccessPoint(ap))
            .map_err(|_| RadioError::DriverFailed)?;
        self.wifi.start().map_err(|_| RadioError::DriverFailed)?;
        self.mode = RadioMode::AccessPoint;
        info!("WiFi: access point '{}' up", ssid);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi: disconnect failed: {}", e);
        }
    }

    fn mac_address(&self) -> [u8; 6] {
        self.wifi.sta_netif().get_mac().unwrap_or_else(|_| super::device_id::read_mac())
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation adapter
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub struct WifiAdapter {
    mode: RadioMode,
    ssid: heapless::String<32>,
    associating: bool,
    /// Polls of `is_connected` left before the simulated link comes up.
    /// `None` never associates.
    associate_after: Option<u32>,
    polls: Cell<u32>,
    ap_ssid: heapless::String<32>,
}

#[cfg(not(target_os = "espidf"))]
impl WifiAdapter {
    /// A radio that associates on the second poll after `begin`.
    pub fn new() -> Self {
        Self::with_latency(Some(1))
    }

    /// `None` models a network that never answers.
    pub fn with_latency(associate_after: Option<u32>) -> Self {
        Self {
            mode: RadioMode::Station,
            ssid: heapless::String::new(),
            associating: false,
            associate_after,
            polls: Cell::new(0),
            ap_ssid: heapless::String::new(),
        }
    }

    /// Credentials the radio was last asked to join.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn access_point_ssid(&self) -> Option<&str> {
        (self.mode == RadioMode::AccessPoint).then_some(self.ap_ssid.as_str())
    }

    fn store(&mut self, ssid: &str, password: &str) -> Result<(), RadioError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.ssid.clear();
        self.ssid.push_str(ssid).map_err(|_| RadioError::InvalidSsid)
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl RadioPort for WifiAdapter {
    fn is_connected(&self) -> bool {
        if !self.associating || self.mode != RadioMode::Station {
            return false;
        }
        let Some(after) = self.associate_after else {
            return false;
        };
        let polls = self.polls.get();
        if polls >= after {
            return true;
        }
        self.polls.set(polls + 1);
        false
    }

    fn mode(&self) -> RadioMode {
        self.mode
    }

    fn set_mode(&mut self, mode: RadioMode) {
        self.mode = mode;
    }

    fn begin(&mut self, credentials: Option<(&str, &str)>) -> Result<(), RadioError> {
        match credentials {
            Some((ssid, password)) => self.store(ssid, password)?,
            None if self.ssid.is_empty() => return Err(RadioError::NoCredentials),
            None => {}
        }
        info!("WiFi(sim): joining '{}'", self.ssid);
        self.mode = RadioMode::Station;
        self.associating = true;
        self.polls.set(0);
        Ok(())
    }

    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), RadioError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.ap_ssid.clear();
        self.ap_ssid.push_str(ssid).map_err(|_| RadioError::InvalidSsid)?;
        self.associating = false;
        self.mode = RadioMode::AccessPoint;
        info!("WiFi(sim): access point '{}' up", ssid);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.associating = false;
        info!("WiFi(sim): disconnected");
    }

    fn mac_address(&self) -> [u8; 6] {
        super::device_id::read_mac()
    }
}
