use common::BusTlsMaterial;
use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSubscriberConfig {
    pub host: String,
    pub port: u16,
    /// Fixed per deployment; two bridges sharing an id will kick each other off
    pub client_id: String,
    /// Single topic filter, wildcards allowed
    pub topic_filter: String,
    pub tls_enabled: bool,
    pub keep_alive_secs: u64,
    /// Pause between polls after a connection error (default: 5 seconds)
    pub reconnect_delay_secs: u64,
    /// Capacity of the client request channel
    pub channel_capacity: usize,
    /// Upper bound on waiting for in-flight handlers at shutdown
    pub drain_timeout_secs: u64,
}

impl Default for BusSubscriberConfig {
    fn default() -> Self {
        Self {
            host: "server2.cmeriiot.internal".to_string(),
            port: 8883,
            client_id: "CSIR-CMERI_Data_Saver1".to_string(),
            topic_filter: "#".to_string(),
            tls_enabled: true,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
            channel_capacity: 100,
            drain_timeout_secs: 10,
        }
    }
}

impl BusSubscriberConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Build the client options for the bus connection.
///
/// Acks are manual so a QoS 2 message is only acknowledged after the
/// pipeline has handled it. With TLS enabled the server is verified against
/// the configured CA, or the platform roots when no CA file was found.
pub fn build_mqtt_options(config: &BusSubscriberConfig, tls: &BusTlsMaterial) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive());
    options.set_clean_session(true);
    options.set_manual_acks(true);

    if !config.tls_enabled {
        warn!(host = %config.host, port = config.port, "bus TLS disabled, connecting in plain text");
        return options;
    }

    let client_auth = tls.client_auth();
    if client_auth.is_none() {
        warn!("bus client certificate or key missing, connecting without client authentication");
    }

    let tls_config = match &tls.ca_cert {
        Some(ca) => {
            debug!(path = %ca.path.display(), "verifying bus server against configured CA");
            TlsConfiguration::Simple {
                ca: ca.contents.clone(),
                alpn: None,
                client_auth,
            }
        }
        None => {
            warn!("bus CA certificate missing, verifying bus server against platform roots");
            TlsConfiguration::default()
        }
    };

    options.set_transport(Transport::tls_with_config(tls_config));
    options
}
