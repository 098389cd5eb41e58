use chrono::{DateTime, Utc};
use common::domain::{DeviceAuthorizer, DeviceDirectory, DomainError, DomainResult};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Immutable point-in-time copy of the registered device codes
#[derive(Debug, Clone, Default)]
pub struct AuthorizedDeviceSet {
    device_codes: HashSet<String>,
    fetched_at: Option<DateTime<Utc>>,
}

impl AuthorizedDeviceSet {
    pub fn new(device_codes: impl IntoIterator<Item = String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            device_codes: device_codes.into_iter().collect(),
            fetched_at: Some(fetched_at),
        }
    }

    pub fn contains(&self, device_code: &str) -> bool {
        self.device_codes.contains(device_code)
    }

    pub fn len(&self) -> usize {
        self.device_codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.device_codes.is_empty()
    }

    /// `None` until the first successful refresh
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// Whole seconds between the fetch and `now`
    pub fn age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.fetched_at.map(|at| (now - at).num_seconds())
    }
}

/// In-memory allow-list of device codes backed by the remote directory.
///
/// Readers always see one whole snapshot: a refresh builds the next set off
/// to the side and publishes it by swapping a single `Arc`. Refreshes are
/// serialized; a caller arriving while one is in flight waits for it and
/// then fetches again.
pub struct DeviceRegistryCache {
    directory: Arc<dyn DeviceDirectory>,
    snapshot: RwLock<Arc<AuthorizedDeviceSet>>,
    refresh_guard: Mutex<()>,
    fetch_timeout: Duration,
}

impl DeviceRegistryCache {
    /// Starts with an empty snapshot, so every device is rejected until the
    /// first successful refresh.
    pub fn new(directory: Arc<dyn DeviceDirectory>, fetch_timeout: Duration) -> Self {
        Self {
            directory,
            snapshot: RwLock::new(Arc::new(AuthorizedDeviceSet::default())),
            refresh_guard: Mutex::new(()),
            fetch_timeout,
        }
    }

    pub fn snapshot(&self) -> Arc<AuthorizedDeviceSet> {
        Arc::clone(&self.snapshot.read())
    }

    /// Fetch the directory and replace the snapshot.
    ///
    /// On any failure the error is logged, the current snapshot stays in
    /// force, and the error is returned for the caller to decide on.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> DomainResult<usize> {
        let _in_flight = self.refresh_guard.lock().await;

        let fetched =
            tokio::time::timeout(self.fetch_timeout, self.directory.fetch_device_codes()).await;

        let device_codes = match fetched {
            Ok(Ok(codes)) => codes,
            Ok(Err(e)) => {
                self.log_fetch_failure(&e);
                return Err(e);
            }
            Err(_) => {
                let e = DomainError::DirectoryFetchError(format!(
                    "timed out after {:?}",
                    self.fetch_timeout
                ));
                self.log_fetch_failure(&e);
                return Err(e);
            }
        };

        let next = Arc::new(AuthorizedDeviceSet::new(device_codes, Utc::now()));
        let device_count = next.len();
        let previous = std::mem::replace(&mut *self.snapshot.write(), next);

        info!(
            device_count,
            previous_device_count = previous.len(),
            previous_fetched_at = ?previous.fetched_at(),
            "device codes fetched and updated"
        );
        if device_count == 0 {
            warn!("directory returned no devices, all messages will be rejected until the next refresh");
        }

        Ok(device_count)
    }

    fn log_fetch_failure(&self, e: &DomainError) {
        let current = self.snapshot();
        error!(
            error = %e,
            device_count = current.len(),
            last_success = ?current.fetched_at(),
            snapshot_age_secs = ?current.age_secs(Utc::now()),
            "failed to fetch device codes, keeping previous registry"
        );
    }
}

impl DeviceAuthorizer for DeviceRegistryCache {
    fn is_authorized(&self, device_code: &str) -> bool {
        let authorized = self.snapshot.read().contains(device_code);
        if !authorized {
            debug!(device_code, "device code not in registry");
        }
        authorized
    }
}
