use async_trait::async_trait;
use common::domain::{DeviceDirectory, DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDirectoryConfig {
    /// Full URL of the device listing, e.g. `https://host/api/v1/iotendpoints`
    pub url: String,
    pub username: String,
    pub password: String,
    pub request_timeout_secs: u64,
}

impl Default for DeviceDirectoryConfig {
    fn default() -> Self {
        Self {
            url: "https://iot.cmeri.res.in:8000/api/v1/iotendpoints".to_string(),
            username: "admin".to_string(),
            password: "password".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Device directory reached over HTTPS with Basic authentication
pub struct HttpDeviceDirectory {
    client: reqwest::Client,
    config: DeviceDirectoryConfig,
}

impl HttpDeviceDirectory {
    pub fn new(config: DeviceDirectoryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("iot-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DeviceDirectory for HttpDeviceDirectory {
    #[instrument(skip(self), fields(url = %self.config.url))]
    async fn fetch_device_codes(&self) -> DomainResult<Vec<String>> {
        let response = self
            .client
            .get(&self.config.url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| DomainError::DirectoryFetchError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::DirectoryFetchError(format!(
                "directory returned HTTP {}",
                status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DomainError::DirectoryFetchError(e.to_string()))?;

        parse_device_codes(&body)
    }
}

/// Extract the `device_code` of every entry in a directory listing.
///
/// The listing must be a JSON array. Entries without a string
/// `device_code` are skipped; everything else about an entry is ignored.
pub fn parse_device_codes(body: &[u8]) -> DomainResult<Vec<String>> {
    let entries: Vec<serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| DomainError::DirectoryDecodeError(e.to_string()))?;

    let total = entries.len();
    let codes: Vec<String> = entries
        .into_iter()
        .filter_map(|entry| {
            entry
                .get("device_code")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .collect();

    if codes.len() < total {
        debug!(
            skipped = total - codes.len(),
            "directory entries without a device_code were skipped"
        );
    }

    Ok(codes)
}
