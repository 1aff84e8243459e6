//! MQTT subscriber for TTN uplink messages
//!
//! Alternative to the webhook: subscribes to the network server's
//! `v3/{app}/devices/{device}/up` topics and feeds every message through the
//! same pipeline. Each message is processed on its own task so the event loop
//! keeps polling while lookups run.

use crate::infra::config::Config;
use crate::io::http::payload_kind;
use crate::io::webhook::TtnUplink;
use crate::services::pipeline::{IngestStatus, IngestionPipeline};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Parse and process one message body
pub async fn handle_message(pipeline: &IngestionPipeline, topic: &str, body: &[u8]) {
    let uplink = match TtnUplink::from_slice(body) {
        Ok(uplink) => uplink,
        Err(e) => {
            pipeline.metrics().record_rejected();
            warn!(topic = %topic, error = %e, "mqtt_invalid_json");
            return;
        }
    };

    let observation = uplink.into_observation();
    let device_id = observation.device_id.clone();
    debug!(
        device_id = %device_id,
        topic = %topic,
        payload = payload_kind(observation.payload.as_ref()),
        source = "mqtt",
        "uplink_received"
    );

    match pipeline.process(observation).await {
        Ok(outcome) if outcome.status == IngestStatus::Success => {
            debug!(device_id = %device_id, history_size = outcome.history_size, "mqtt_uplink_processed");
        }
        Ok(_) => {}
        Err(e) => error!(device_id = %device_id, error = %e, "uplink_processing_failed"),
    }
}

/// Connect, subscribe and process uplinks until shutdown
pub async fn start_mqtt_client(
    config: &Config,
    pipeline: IngestionPipeline,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions =
        MqttOptions::new(config.mqtt_client_id(), config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    // TTN uplinks carry base64 payloads plus metadata; well above the 10 KiB default
    mqttoptions.set_max_packet_size(256 * 1024, 256 * 1024);

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let topic = config.mqtt_topic().to_string();
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

    info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_client_starting");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    let _ = client.try_disconnect();
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let pipeline = pipeline.clone();
                        tokio::spawn(async move {
                            handle_message(&pipeline, &publish.topic, &publish.payload).await;
                        });
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean session: subscriptions do not survive a reconnect
                        match client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            Ok(()) => info!(topic = %topic, "mqtt_subscribed"),
                            Err(e) => error!(topic = %topic, error = %e, "mqtt_subscribe_failed"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
