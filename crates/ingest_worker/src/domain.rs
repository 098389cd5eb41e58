mod device_registry_cache;
mod ingestion_service;
mod registry_refresher;

pub use device_registry_cache::*;
pub use ingestion_service::*;
pub use registry_refresher::*;
