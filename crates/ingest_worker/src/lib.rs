mod domain;
mod http;
mod ingest_worker;
mod mqtt;

pub use domain::*;
pub use http::*;
pub use ingest_worker::*;
pub use mqtt::*;
