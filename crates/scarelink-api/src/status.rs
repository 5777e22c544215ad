// Camera board HTTP client
//
// The camera board serves its sensor readings at a status path and accepts
// setting changes through `/control?var=<name>&val=<int>`. Both are plain
// request/response calls; polling cadence lives in `scarelink-core`.

use tracing::{debug, trace};

use crate::address::DeviceAddress;
use crate::error::Error;
use crate::telemetry::{CameraControl, TelemetryPayload, parse_telemetry};
use crate::transport::TransportConfig;

const CONTROL_PATH: &str = "/control";

/// HTTP client for one camera board.
#[derive(Debug, Clone)]
pub struct StatusClient {
    http: reqwest::Client,
    address: DeviceAddress,
}

impl StatusClient {
    /// Build a client for `address` (whose `path` is the status path).
    pub fn new(address: DeviceAddress, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            address,
        })
    }

    /// Create a status client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, address: DeviceAddress) -> Self {
        Self { http, address }
    }

    /// The status endpoint this client polls.
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// `GET` the status path and decode the body.
    ///
    /// Any non-2xx status or a body that fails to decode is an error.
    pub async fn fetch_status(&self) -> Result<TelemetryPayload, Error> {
        let url = self.address.http_url()?;
        trace!(%url, "polling status");

        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.text().await?;
        parse_telemetry(&body)
    }

    /// Apply one camera setting.
    pub async fn control(&self, control: CameraControl) -> Result<(), Error> {
        let mut url = self.address.http_base()?.join(CONTROL_PATH)?;
        url.query_pairs_mut()
            .append_pair("var", control.var.as_ref())
            .append_pair("val", &control.value.to_string());
        debug!(var = %control.var, value = control.value, "camera control");

        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }
}
