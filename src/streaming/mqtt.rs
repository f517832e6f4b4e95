// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! MQTT publisher for appliance updates and events

use anyhow::{anyhow, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::StreamingConfig;

/// Publish-only MQTT client
pub struct MqttClient {
    client: AsyncClient,
    broker: String,
    port: u16,
    connected: RwLock<bool>,
}

impl MqttClient {
    pub async fn new(config: &StreamingConfig) -> Result<Self> {
        let mut options = MqttOptions::new(&config.mqtt_client_id, &config.mqtt_broker, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT error: {:?}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            broker: config.mqtt_broker.clone(),
            port: config.mqtt_port,
            connected: RwLock::new(false),
        })
    }

    pub async fn connect(&self) -> Result<()> {
        // The eventloop task owns the actual connection lifecycle
        *self.connected.write().await = true;
        info!("MQTT client initialized for {}:{}", self.broker, self.port);
        Ok(())
    }

    pub async fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<()> {
        let json = serde_json::to_vec(payload)?;

        self.client
            .publish(topic, QoS::AtLeastOnce, false, json)
            .await
            .map_err(|e| anyhow!("MQTT publish failed: {}", e))?;

        debug!("Published to {}", topic);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| anyhow!("MQTT disconnect failed: {}", e))?;

        *self.connected.write().await = false;
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }
}
