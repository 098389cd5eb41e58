use common::mongo::MongoConfig;
use common::telemetry::TelemetryConfig;
use common::{CredentialPaths, StorageTlsMaterial};
use config::{Config, ConfigError, Environment};
use ingest_worker::{
    BusSubscriberConfig, DeviceDirectoryConfig, IngestionServiceConfig, DEFAULT_METERING_DATABASE,
    DEFAULT_RAW_DATABASE,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration, read from unprefixed environment variables
/// (`MQTT_HOSTNAME`, `MONGODB_PORT`, `DEBUG`, ...)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Forces debug logging regardless of `log_level`
    #[serde(default)]
    pub debug: bool,

    /// Directory for the JSON log file
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_log_file_name")]
    pub log_file_name: String,

    // MQTT configuration
    /// Topic filter to subscribe to
    #[serde(default = "default_mqtt_namespace")]
    pub mqtt_namespace: String,

    #[serde(default = "default_mqtt_hostname")]
    pub mqtt_hostname: String,

    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default = "default_true")]
    pub mqtt_tls_enabled: bool,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    /// Pause between reconnect attempts in seconds
    #[serde(default = "default_mqtt_reconnect_delay_secs")]
    pub mqtt_reconnect_delay_secs: u64,

    /// Capacity of the MQTT client request channel
    #[serde(default = "default_mqtt_channel_capacity")]
    pub mqtt_channel_capacity: usize,

    // MongoDB configuration
    #[serde(default = "default_mongodb_hostname")]
    pub mongodb_hostname: String,

    #[serde(default = "default_mongodb_port")]
    pub mongodb_port: u16,

    #[serde(default = "default_true")]
    pub mongodb_tls_enabled: bool,

    /// Accept MongoDB server certificates that fail verification
    #[serde(default = "default_true")]
    pub mongodb_allow_invalid_certificates: bool,

    #[serde(default = "default_mongodb_min_pool_size")]
    pub mongodb_min_pool_size: u32,

    #[serde(default = "default_mongodb_max_pool_size")]
    pub mongodb_max_pool_size: u32,

    /// Database receiving decoded payloads
    #[serde(default = "default_mongodb_raw_database")]
    pub mongodb_raw_database: String,

    /// Database receiving size metering records
    #[serde(default = "default_mongodb_metering_database")]
    pub mongodb_metering_database: String,

    // TLS material
    /// Directory holding the certificate files below
    #[serde(default = "default_cert_dir")]
    pub cert_dir: String,

    #[serde(default = "default_mqtt_client_key_file")]
    pub mqtt_client_key_file: String,

    #[serde(default = "default_mqtt_client_cert_file")]
    pub mqtt_client_cert_file: String,

    #[serde(default = "default_ca_file")]
    pub mqtt_ca_file: String,

    /// Combined client certificate and key for MongoDB
    #[serde(default = "default_mongodb_client_pem_file")]
    pub mongodb_client_pem_file: String,

    #[serde(default = "default_ca_file")]
    pub mongodb_ca_file: String,

    // Device directory configuration
    #[serde(default = "default_directory_url")]
    pub directory_url: String,

    #[serde(default = "default_directory_username")]
    pub directory_username: String,

    #[serde(default = "default_directory_password")]
    pub directory_password: String,

    /// Device registry refresh interval in seconds
    #[serde(default = "default_directory_refresh_interval_secs")]
    pub directory_refresh_interval_secs: u64,

    /// Upper bound on one directory fetch in seconds
    #[serde(default = "default_directory_timeout_secs")]
    pub directory_timeout_secs: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Bound on draining in-flight messages and running closers in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default)]
    pub otel_enabled: bool,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file_name() -> String {
    "logfile.log".to_string()
}

// MQTT defaults
fn default_mqtt_namespace() -> String {
    "#".to_string()
}

fn default_mqtt_hostname() -> String {
    "server2.cmeriiot.internal".to_string()
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_mqtt_client_id() -> String {
    "CSIR-CMERI_Data_Saver1".to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_mqtt_reconnect_delay_secs() -> u64 {
    5
}

fn default_mqtt_channel_capacity() -> usize {
    100
}

// MongoDB defaults
fn default_mongodb_hostname() -> String {
    "server1.cmeriiot.internal".to_string()
}

fn default_mongodb_port() -> u16 {
    27017
}

fn default_mongodb_min_pool_size() -> u32 {
    2
}

fn default_mongodb_max_pool_size() -> u32 {
    10
}

fn default_mongodb_raw_database() -> String {
    DEFAULT_RAW_DATABASE.to_string()
}

fn default_mongodb_metering_database() -> String {
    DEFAULT_METERING_DATABASE.to_string()
}

// Certificate defaults
fn default_cert_dir() -> String {
    "./cert".to_string()
}

fn default_mqtt_client_key_file() -> String {
    "server.key".to_string()
}

fn default_mqtt_client_cert_file() -> String {
    "server.crt".to_string()
}

fn default_ca_file() -> String {
    "my-ca.crt".to_string()
}

fn default_mongodb_client_pem_file() -> String {
    "mongodb12.pem".to_string()
}

// Directory defaults
fn default_directory_url() -> String {
    "https://iot.cmeri.res.in:8000/api/v1/iotendpoints".to_string()
}

fn default_directory_username() -> String {
    "admin".to_string()
}

fn default_directory_password() -> String {
    "password".to_string()
}

fn default_directory_refresh_interval_secs() -> u64 {
    30 * 60
}

fn default_directory_timeout_secs() -> u64 {
    30
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "iot-bridge".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::default())
            .build()?
            .try_deserialize()
    }

    /// `debug` wins over `log_level`
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.effective_log_level().to_string(),
            log_dir: (!self.log_dir.is_empty()).then(|| PathBuf::from(&self.log_dir)),
            log_file_name: self.log_file_name.clone(),
        }
    }

    pub fn credential_paths(&self) -> CredentialPaths {
        CredentialPaths::in_dir(
            &self.cert_dir,
            &self.mqtt_client_key_file,
            &self.mqtt_client_cert_file,
            &self.mqtt_ca_file,
            &self.mongodb_client_pem_file,
            &self.mongodb_ca_file,
        )
    }

    /// Only files that were actually found are handed to the driver
    pub fn mongo_config(&self, tls: &StorageTlsMaterial) -> MongoConfig {
        MongoConfig {
            host: self.mongodb_hostname.clone(),
            port: self.mongodb_port,
            app_name: self.otel_service_name.clone(),
            tls_enabled: self.mongodb_tls_enabled,
            allow_invalid_certificates: self.mongodb_allow_invalid_certificates,
            client_pem_path: tls.client_pem.as_ref().map(|f| f.path.clone()),
            ca_file_path: tls.ca_cert.as_ref().map(|f| f.path.clone()),
            min_pool_size: self.mongodb_min_pool_size,
            max_pool_size: self.mongodb_max_pool_size,
        }
    }

    pub fn bus_config(&self) -> BusSubscriberConfig {
        BusSubscriberConfig {
            host: self.mqtt_hostname.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            topic_filter: self.mqtt_namespace.clone(),
            tls_enabled: self.mqtt_tls_enabled,
            keep_alive_secs: self.mqtt_keep_alive_secs,
            reconnect_delay_secs: self.mqtt_reconnect_delay_secs,
            channel_capacity: self.mqtt_channel_capacity,
            drain_timeout_secs: self.shutdown_timeout_secs,
        }
    }

    pub fn ingestion_config(&self) -> IngestionServiceConfig {
        IngestionServiceConfig {
            raw_database: self.mongodb_raw_database.clone(),
            metering_database: self.mongodb_metering_database.clone(),
        }
    }

    pub fn directory_config(&self) -> DeviceDirectoryConfig {
        DeviceDirectoryConfig {
            url: self.directory_url.clone(),
            username: self.directory_username.clone(),
            password: self.directory_password.clone(),
            request_timeout_secs: self.directory_timeout_secs,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.directory_refresh_interval_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
