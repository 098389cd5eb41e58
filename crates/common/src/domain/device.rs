use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// Remote directory of record for registered devices
///
/// Implementations should:
/// - Authenticate against the directory service
/// - Return every device code currently registered
/// - Return an error (never a partial list) if the response is unusable
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Fetch the full list of registered device codes
    async fn fetch_device_codes(&self) -> DomainResult<Vec<String>>;
}

/// Read side of the device allow-list, consulted once per inbound message
///
/// Implementations must answer from memory without blocking on network I/O.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait DeviceAuthorizer: Send + Sync {
    fn is_authorized(&self, device_code: &str) -> bool;
}
