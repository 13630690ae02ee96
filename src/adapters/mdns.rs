//! mDNS service discovery adapter.
//!
//! Implements [`ServiceDiscovery`]: looks for a local proxy advertising the
//! registration service (`_thinx._tcp` by default). The responder starts
//! lazily on the first query, under the device hostname, because it needs
//! an IP address.
//!
//! On ESP-IDF this drives `esp_idf_svc::mdns::EspMdns`. On simulation
//! targets the adapter answers from a table of announced services.

use log::info;

use crate::app::ports::{DiscoveredService, ServiceDiscovery};

#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(target_os = "espidf")]
const QUERY_TIMEOUT_MS: u64 = 3_000;
#[cfg(target_os = "espidf")]
const MAX_RESULTS: usize = 4;

/// `thinx` → `_thinx`; already prefixed names pass through.
fn service_label(name: &str) -> String {
    if name.starts_with('_') {
        name.to_owned()
    } else {
        format!("_{name}")
    }
}

pub struct MdnsAdapter {
    hostname: heapless::String<24>,
    #[cfg(target_os = "espidf")]
    mdns: Option<esp_idf_svc::mdns::EspMdns>,
    #[cfg(not(target_os = "espidf"))]
    announced: Vec<(String, String, DiscoveredService)>,
    #[cfg(not(target_os = "espidf"))]
    queries: usize,
}

impl MdnsAdapter {
    pub fn new(hostname: heapless::String<24>) -> Self {
        Self {
            hostname,
            #[cfg(target_os = "espidf")]
            mdns: None,
            #[cfg(not(target_os = "espidf"))]
            announced: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            queries: 0,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn responder(&mut self) -> Option<&mut esp_idf_svc::mdns::EspMdns> {
        if self.mdns.is_none() {
            match esp_idf_svc::mdns::EspMdns::take() {
                Ok(mut mdns) => {
                    if let Err(e) = mdns.set_hostname(self.hostname.as_str()) {
                        warn!("mDNS: hostname not set: {}", e);
                    }
                    info!("mDNS: responder up as {}.local", self.hostname);
                    self.mdns = Some(mdns);
                }
                Err(e) => {
                    warn!("mDNS: init failed: {}", e);
                    return None;
                }
            }
        }
        self.mdns.as_mut()
    }
}

#[cfg(target_os = "espidf")]
impl ServiceDiscovery for MdnsAdapter {
    fn query(&mut self, service: &str, proto: &str) -> Option<DiscoveredService> {
        use esp_idf_svc::mdns::QueryResult;

        let service = service_label(service);
        let proto = service_label(proto);
        let mdns = self.responder()?;

        let mut results: [QueryResult; MAX_RESULTS] = Default::default();
        let found = match mdns.query_ptr(
            &service,
            &proto,
            core::time::Duration::from_millis(QUERY_TIMEOUT_MS),
            MAX_RESULTS,
            &mut results,
        ) {
            Ok(n) => n,
            Err(e) => {
                warn!("mDNS: query {}.{} failed: {}", service, proto, e);
                return None;
            }
        };

        let first = results[..found.min(MAX_RESULTS)]
            .iter()
            .find(|r| r.hostname.as_deref().is_some_and(|h| !h.is_empty()))?;
        let host = first.hostname.clone().unwrap_or_default();
        info!(
            "mDNS: {}.{} answered by {} ({:?}) port {}",
            service, proto, host, first.addr.first(), first.port
        );
        Some(DiscoveredService {
            host,
            port: first.port,
        })
    }
}

#[cfg(not(target_os = "espidf"))]
impl MdnsAdapter {
    /// Make `service`/`proto` answer with `found` on later queries.
    pub fn announce(&mut self, service: &str, proto: &str, found: DiscoveredService) {
        self.announced
            .push((service_label(service), service_label(proto), found));
    }

    /// Queries answered so far, hit or miss.
    pub fn query_count(&self) -> usize {
        self.queries
    }
}

#[cfg(not(target_os = "espidf"))]
impl ServiceDiscovery for MdnsAdapter {
    fn query(&mut self, service: &str, proto: &str) -> Option<DiscoveredService> {
        self.queries += 1;
        let (service, proto) = (service_label(service), service_label(proto));
        let found = self
            .announced
            .iter()
            .find(|(s, p, _)| *s == service && *p == proto)
            .map(|(_, _, found)| found.clone());
        info!(
            "mDNS(sim): {}.{} from {}.local -> {:?}",
            service, proto, self.hostname, found
        );
        found
    }
}
