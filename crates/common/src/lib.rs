pub mod domain;
pub mod mongo;
pub mod telemetry;
pub mod tls;

pub use domain::*;
pub use mongo::*;
pub use tls::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeviceAuthorizer;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeviceDirectory;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDocumentSink;
