//! Station MAC and the names derived from it.
//!
//! The factory MAC is burned into eFuse, so everything derived here is
//! stable across reboots and reflashes:
//! - the hardware id sent in every checkin and used as MQTT client id
//!   (see [`crate::identity::hardware_id`])
//! - the mDNS hostname, `devlink-xxyyzz`

use core::fmt::Write as _;

pub type MacAddress = [u8; 6];

/// Station interface MAC. Falls back to all zeroes if the read fails,
/// which only happens on a blank eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    use esp_idf_svc::sys::{ESP_OK, esp_mac_type_t_ESP_MAC_WIFI_STA, esp_read_mac};

    let mut station = MacAddress::default();
    // SAFETY: esp_read_mac writes exactly six bytes for station MACs.
    let rc = unsafe { esp_read_mac(station.as_mut_ptr(), esp_mac_type_t_ESP_MAC_WIFI_STA) };
    if rc != ESP_OK as i32 {
        log::warn!("esp_read_mac failed ({rc}), using zero MAC");
    }
    station
}

#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// `devlink-` plus the NIC-specific half of the MAC, lowercase.
pub fn hostname(mac: &MacAddress) -> heapless::String<24> {
    let mut out = heapless::String::new();
    let _ = out.push_str("devlink-");
    for byte in &mac[3..] {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
