use crate::domain::{IngestOutcome, IngestionService};
use crate::mqtt::{build_mqtt_options, BusSubscriberConfig};
use common::domain::IngestEvent;
use common::BusTlsMaterial;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

/// Long-lived subscriber feeding bus messages into the ingestion pipeline
pub struct BusSubscriber {
    config: BusSubscriberConfig,
    client: AsyncClient,
    eventloop: EventLoop,
    service: Arc<IngestionService>,
}

impl BusSubscriber {
    /// Creates the client; nothing touches the network until `run` polls.
    pub fn new(
        config: BusSubscriberConfig,
        tls: &BusTlsMaterial,
        service: Arc<IngestionService>,
    ) -> Self {
        let options = build_mqtt_options(&config, tls);
        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);
        Self {
            config,
            client,
            eventloop,
            service,
        }
    }

    /// Poll the bus until cancelled.
    ///
    /// Each publish is handled on its own task and acknowledged once the
    /// pipeline is done with it. Connection errors never end the loop: the
    /// next poll reconnects and the ConnAck handler resubscribes.
    #[instrument(
        name = "mqtt_subscriber",
        skip_all,
        fields(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            topic_filter = %self.config.topic_filter,
        )
    )]
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        let Self {
            config,
            client,
            mut eventloop,
            service,
        } = self;

        info!("starting MQTT subscriber");

        let handlers = TaskTracker::new();
        let mut failed_attempts: u32 = 0;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("shutdown signal received");
                    break;
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            // receipt time is taken here, not when the task gets scheduled
                            let event = IngestEvent::new(publish.topic.clone(), publish.payload.to_vec());
                            let service = Arc::clone(&service);
                            let client = client.clone();
                            handlers.spawn(async move {
                                handle_mqtt_message(service, event).await;
                                if let Err(e) = client.ack(&publish).await {
                                    warn!(topic = %publish.topic, error = %e, "failed to send message acknowledgement");
                                }
                            });
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("connected to MQTT broker");
                            failed_attempts = 0;
                            // clean session: the subscription does not survive a reconnect
                            if let Err(e) = client.try_subscribe(config.topic_filter.as_str(), QoS::ExactlyOnce) {
                                error!(error = %e, "failed to queue subscription");
                            }
                        }
                        Ok(Event::Incoming(Packet::SubAck(suback))) => {
                            info!(return_codes = ?suback.return_codes, "subscription acknowledged");
                        }
                        Ok(Event::Incoming(Packet::PingResp)) => {
                            // connection is healthy
                        }
                        Ok(_) => {}
                        Err(e) => {
                            failed_attempts += 1;
                            warn!(
                                error = %e,
                                attempt = failed_attempts,
                                retry_in_secs = config.reconnect_delay_secs,
                                "MQTT connection error, reconnecting"
                            );
                            tokio::select! {
                                _ = ctx.cancelled() => break,
                                _ = tokio::time::sleep(config.reconnect_delay()) => {}
                            }
                        }
                    }
                }
            }
        }

        drain(&config, &client, &mut eventloop, handlers).await;

        info!("MQTT subscriber stopped");
        Ok(())
    }
}

/// Let in-flight handlers finish, then disconnect.
///
/// The event loop keeps being polled meanwhile so queued acknowledgements
/// reach the broker. Messages arriving during the drain are not handled.
async fn drain(
    config: &BusSubscriberConfig,
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    handlers: TaskTracker,
) {
    handlers.close();
    info!(in_flight = handlers.len(), "draining in-flight messages");

    let wait = handlers.wait();
    tokio::pin!(wait);
    let deadline = tokio::time::sleep(config.drain_timeout());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut wait => {
                debug!("all in-flight messages handled");
                break;
            }
            _ = &mut deadline => {
                warn!(
                    in_flight = handlers.len(),
                    timeout_secs = config.drain_timeout_secs,
                    "drain timed out, abandoning in-flight messages"
                );
                break;
            }
            event = eventloop.poll() => {
                if let Err(e) = event {
                    debug!(error = %e, "MQTT error while draining");
                    // avoid spinning on a dead connection
                    tokio::select! {
                        _ = &mut wait => break,
                        _ = &mut deadline => {
                            warn!(
                                in_flight = handlers.len(),
                                timeout_secs = config.drain_timeout_secs,
                                "drain timed out, abandoning in-flight messages"
                            );
                            break;
                        }
                        _ = tokio::time::sleep(config.reconnect_delay()) => {}
                    }
                }
            }
        }
    }

    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "failed to queue disconnect");
        return;
    }
    // flush the disconnect packet
    let _ = tokio::time::timeout(config.reconnect_delay(), async {
        while let Ok(event) = eventloop.poll().await {
            if matches!(event, Event::Outgoing(rumqttc::Outgoing::Disconnect)) {
                break;
            }
        }
    })
    .await;
}

/// Handle one inbound publish.
///
/// Each message is its own trace root, not nested under the subscriber span.
pub(crate) async fn handle_mqtt_message(
    service: Arc<IngestionService>,
    event: IngestEvent,
) -> IngestOutcome {
    let span = info_span!(
        parent: Span::none(),
        "mqtt_message",
        topic = %event.topic,
        payload_size = event.payload.len(),
        outcome = tracing::field::Empty,
    );

    async move {
        let outcome = service.handle(event).await;
        Span::current().record("outcome", tracing::field::debug(&outcome));
        outcome
    }
    .instrument(span)
    .await
}
