use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// MongoDB connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
    pub app_name: String,
    pub tls_enabled: bool,
    /// Accept server certificates that fail verification
    pub allow_invalid_certificates: bool,
    /// Combined client certificate + key PEM used for mutual TLS
    pub client_pem_path: Option<PathBuf>,
    pub ca_file_path: Option<PathBuf>,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 27017,
            app_name: "iot-bridge".to_string(),
            tls_enabled: true,
            allow_invalid_certificates: false,
            client_pem_path: None,
            ca_file_path: None,
            min_pool_size: 2,
            max_pool_size: 10,
        }
    }
}

impl MongoConfig {
    pub fn connection_uri(&self) -> String {
        format!("mongodb://{}:{}/", self.host, self.port)
    }
}
