//! Reachability probing and local network scanning.
//!
//! A probe is a single bounded-time `GET`; it answers "is something there
//! that speaks our status protocol" and nothing more. Errors are swallowed:
//! a host that is down and a host that runs the wrong service both come back
//! as `false`.

use std::net::Ipv4Addr;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, trace};

use crate::address::DeviceAddress;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Hosts probed concurrently per scan batch.
pub const SCAN_BATCH_SIZE: usize = 16;

/// Port/path pairs a scarecrow board answers on.
pub const WELL_KNOWN_ENDPOINTS: &[(u16, &str)] = &[(80, "/status"), (80, "/"), (8080, "/status")];

/// Bounded-time reachability checker.
#[derive(Debug, Clone)]
pub struct DeviceProbe {
    http: reqwest::Client,
    endpoints: Vec<(u16, String)>,
}

impl DeviceProbe {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?))
    }

    /// Create a probe with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            endpoints: WELL_KNOWN_ENDPOINTS
                .iter()
                .map(|(port, path)| (*port, (*path).to_owned()))
                .collect(),
        }
    }

    /// Replace the endpoint set tried per host during a scan.
    pub fn with_endpoints(mut self, endpoints: Vec<(u16, String)>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// `GET` the address within `timeout`; `true` only on a 2xx.
    pub async fn probe(&self, address: &DeviceAddress, timeout: Duration) -> bool {
        let url = match address.http_url() {
            Ok(url) => url,
            Err(e) => {
                debug!(%address, error = %e, "probe skipped: bad address");
                return false;
            }
        };

        match tokio::time::timeout(timeout, self.http.get(url).send()).await {
            Ok(Ok(resp)) => {
                let ok = resp.status().is_success();
                trace!(%address, status = resp.status().as_u16(), "probe answered");
                ok
            }
            Ok(Err(e)) => {
                trace!(%address, error = %e, "probe failed");
                false
            }
            Err(_) => {
                trace!(%address, timeout_ms = timeout.as_millis(), "probe timed out");
                false
            }
        }
    }

    /// Probe `base.start ..= base.end` in batches of [`SCAN_BATCH_SIZE`].
    ///
    /// Only the first three octets of `base` are used. `on_progress` receives
    /// the completed fraction (0.0..=1.0) after each batch. Returns the first
    /// matching endpoint of every host that answered.
    pub async fn scan_range<F>(
        &self,
        base: Ipv4Addr,
        start: u8,
        end: u8,
        timeout: Duration,
        mut on_progress: F,
    ) -> Vec<DeviceAddress>
    where
        F: FnMut(f32) + Send,
    {
        if start > end {
            on_progress(1.0);
            return Vec::new();
        }

        let [a, b, c, _] = base.octets();
        let hosts: Vec<Ipv4Addr> = (start..=end).map(|h| Ipv4Addr::new(a, b, c, h)).collect();
        let total = f32::from(u16::from(end - start) + 1);
        let mut completed: u16 = 0;
        let mut found = Vec::new();

        debug!(%base, start, end, "scanning address range");

        for batch in hosts.chunks(SCAN_BATCH_SIZE) {
            let results = join_all(batch.iter().map(|host| self.probe_host(*host, timeout))).await;
            found.extend(results.into_iter().flatten());

            completed += u16::try_from(batch.len()).unwrap_or(u16::MAX);
            on_progress((f32::from(completed) / total).min(1.0));
        }

        debug!(found = found.len(), "scan finished");
        found
    }

    async fn probe_host(&self, host: Ipv4Addr, timeout: Duration) -> Option<DeviceAddress> {
        for (port, path) in &self.endpoints {
            let address = DeviceAddress::new(host.to_string(), *port, path.clone());
            if self.probe(&address, timeout).await {
                return Some(address);
            }
        }
        None
    }
}
