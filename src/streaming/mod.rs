//! Streaming module - WebSocket, MQTT, and data export

mod mqtt;
mod websocket;
mod export;

pub use mqtt::*;
pub use websocket::*;
pub use export::*;

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::core::{EventBus, Monitor};
use crate::db::Database;

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Enable WebSocket server
    pub websocket_enabled: bool,
    pub websocket_port: u16,
    pub websocket_max_clients: usize,

    /// API key required on state-changing commands
    pub api_key: String,

    /// Per-client command budget per minute
    pub max_requests_per_minute: usize,

    /// Enable MQTT publishing
    pub mqtt_enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_use_tls: bool,

    /// Enable data export
    pub export_enabled: bool,
    pub export_format: ExportFormat,
    pub export_path: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            websocket_enabled: true,
            websocket_port: 5050,
            websocket_max_clients: 32,
            api_key: "wattscope-local-key".to_string(),
            max_requests_per_minute: 60,

            mqtt_enabled: false,
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: "wattscope".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_use_tls: false,

            export_enabled: true,
            export_format: ExportFormat::Json,
            export_path: "./data".to_string(),
        }
    }
}

/// Export format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Streaming manager: owns the outward-facing surfaces and forwards bus
/// traffic to them.
pub struct StreamingManager {
    config: StreamingConfig,
    mqtt_client: Option<Arc<MqttClient>>,
    websocket_server: Option<WebSocketServer>,
    exporter: Option<Arc<DataExporter>>,
    bus: Arc<EventBus>,
}

impl StreamingManager {
    pub async fn new(
        config: StreamingConfig,
        monitor: Arc<Monitor>,
        db: Arc<Database>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let mqtt_client = if config.mqtt_enabled {
            Some(Arc::new(MqttClient::new(&config).await?))
        } else {
            None
        };

        let websocket_server = if config.websocket_enabled {
            Some(WebSocketServer::new(&config, monitor, db, bus.clone()))
        } else {
            None
        };

        let exporter = if config.export_enabled {
            Some(Arc::new(DataExporter::new(&config.export_path, config.export_format)?))
        } else {
            None
        };

        Ok(Self {
            config,
            mqtt_client,
            websocket_server,
            exporter,
            bus,
        })
    }

    pub async fn start(&mut self, shutdown: broadcast::Sender<()>) -> Result<()> {
        if let Some(ref mqtt) = self.mqtt_client {
            mqtt.connect().await?;
        }

        if let Some(ref ws) = self.websocket_server {
            ws.start(shutdown.subscribe()).await?;
        }

        self.spawn_forwarder(shutdown.subscribe());
        info!("Streaming manager started");
        Ok(())
    }

    /// Drains the bus into the exporter and MQTT. Lagged receivers drop
    /// messages rather than backpressure the pipeline.
    fn spawn_forwarder(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut samples = self.bus.subscribe_samples();
        let mut events = self.bus.subscribe_events();
        let exporter = self.exporter.clone();
        let mqtt = self.mqtt_client.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    sample = samples.recv() => {
                        let sample = match sample {
                            Ok(sample) => sample,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        };
                        if let Some(ref exporter) = exporter {
                            if let Err(e) = exporter.export_sample(&sample) {
                                warn!("Sample export failed: {}", e);
                            }
                        }
                        if let Some(ref mqtt) = mqtt {
                            if let Err(e) = mqtt.publish("wattscope/samples", &sample).await {
                                warn!("MQTT sample publish failed: {}", e);
                            }
                        }
                    }
                    event = events.recv() => {
                        let (event_id, event, matched) = match event {
                            Ok(event) => event,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        };
                        if let Some(ref exporter) = exporter {
                            if let Err(e) = exporter.export_event(event_id, &event, matched.as_ref()) {
                                warn!("Event export failed: {}", e);
                            }
                        }
                        if let Some(ref mqtt) = mqtt {
                            let payload = serde_json::json!({
                                "id": event_id,
                                "event": event,
                                "appliance": matched.as_ref().map(|m| m.appliance_name.clone()),
                            });
                            if let Err(e) = mqtt.publish("wattscope/events", &payload).await {
                                warn!("MQTT event publish failed: {}", e);
                            }
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }
}
