// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! WebSocket server for sample ingestion and real-time streaming

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::core::{EventBus, Monitor, Notification, Topic};
use crate::db::Database;
use crate::meter::Sample;

use super::StreamingConfig;

/// WebSocket server
pub struct WebSocketServer {
    port: u16,
    max_clients: usize,
    ctx: Arc<ServerContext>,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
}

struct ServerContext {
    monitor: Arc<Monitor>,
    db: Arc<Database>,
    bus: Arc<EventBus>,
    api_key: String,
    max_requests_per_minute: usize,
}

struct ClientHandle {
    addr: SocketAddr,
    subscriptions: Vec<String>,
}

/// Sliding-window command budget for one client.
struct RateLimiter {
    max_per_minute: usize,
    hits: VecDeque<Instant>,
}

impl RateLimiter {
    fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            hits: VecDeque::new(),
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        while let Some(&front) = self.hits.front() {
            if now.duration_since(front) > Duration::from_secs(60) {
                self.hits.pop_front();
            } else {
                break;
            }
        }

        if self.hits.len() >= self.max_per_minute {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}

/// Reading as posted by meter firmware; timestamp defaults to arrival time.
#[derive(Debug, Deserialize)]
struct IncomingSample {
    power: f64,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    voltage: Option<f64>,
    #[serde(default)]
    current: Option<f64>,
    #[serde(default)]
    energy: Option<f64>,
    #[serde(default)]
    frequency: Option<f64>,
    #[serde(default)]
    power_factor: Option<f64>,
    #[serde(default)]
    rssi: Option<i32>,
    #[serde(default)]
    heap: Option<i64>,
}

impl From<IncomingSample> for Sample {
    fn from(incoming: IncomingSample) -> Self {
        Sample {
            timestamp: incoming.timestamp.unwrap_or_else(Utc::now),
            power: incoming.power,
            voltage: incoming.voltage,
            current: incoming.current,
            energy: incoming.energy,
            frequency: incoming.frequency,
            power_factor: incoming.power_factor,
            rssi: incoming.rssi,
            heap: incoming.heap,
        }
    }
}

impl WebSocketServer {
    pub fn new(
        config: &StreamingConfig,
        monitor: Arc<Monitor>,
        db: Arc<Database>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            port: config.websocket_port,
            max_clients: config.websocket_max_clients,
            ctx: Arc::new(ServerContext {
                monitor,
                db,
                bus,
                api_key: config.api_key.clone(),
                max_requests_per_minute: config.max_requests_per_minute,
            }),
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;

        info!("WebSocket server listening on ws://{}", addr);

        let clients = self.clients.clone();
        let max_clients = self.max_clients;
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                let client_count = clients.read().await.len();
                                if client_count >= max_clients {
                                    warn!("Max clients reached, rejecting connection from {}", addr);
                                    continue;
                                }

                                tokio::spawn(handle_connection(stream, addr, clients.clone(), ctx.clone()));
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("WebSocket server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

fn topic_name(topic: Topic) -> &'static str {
    match topic {
        Topic::DataUpdate => "data_update",
        Topic::ApplianceUpdate => "appliance_update",
        Topic::ApplianceList => "appliance_list",
        Topic::UnidentifiedEvent => "unidentified_event",
        Topic::ApplianceLabeled => "appliance_labeled",
    }
}

fn error_response(message: &str) -> serde_json::Value {
    serde_json::json!({"type": "error", "status": "error", "message": message})
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    ctx: Arc<ServerContext>,
) {
    let client_id = uuid::Uuid::new_v4().to_string();

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    info!("New WebSocket connection from {} (id: {})", addr, client_id);

    {
        let mut clients = clients.write().await;
        clients.insert(client_id.clone(), ClientHandle {
            addr,
            subscriptions: vec!["*".to_string()],
        });
    }

    let mut notifications = ctx.bus.subscribe_notifications();
    let mut limiter = RateLimiter::new(ctx.max_requests_per_minute);
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = serde_json::json!({
        "type": "welcome",
        "client_id": client_id,
        "server": "WattScope",
        "version": env!("CARGO_PKG_VERSION"),
    });

    if let Err(e) = ws_sender.send(Message::Text(welcome.to_string().into())).await {
        warn!("Failed to send welcome: {}", e);
    }

    loop {
        tokio::select! {
            // Incoming commands from client
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from {}: {}", addr, text);

                        let response = match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(cmd) => handle_command(&cmd, &client_id, &clients, &ctx, &mut limiter).await,
                            Err(_) => Some(error_response("invalid JSON")),
                        };

                        if let Some(response) = response {
                            if let Err(e) = ws_sender.send(Message::Text(response.to_string().into())).await {
                                warn!("Failed to send to {}: {}", addr, e);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by client {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            // Outgoing broadcasts
            notification = notifications.recv() => {
                match notification {
                    Ok(notification) => {
                        if !is_subscribed(&clients, &client_id, &notification).await {
                            continue;
                        }

                        let wrapper = serde_json::json!({
                            "type": topic_name(notification.topic),
                            "timestamp": notification.timestamp,
                            "data": notification.payload,
                        });
                        if let Err(e) = ws_sender.send(Message::Text(wrapper.to_string().into())).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    // Slow client lagged behind the broadcast buffer; skip ahead
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Client {} lagged, skipped {} notifications", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    {
        let mut clients = clients.write().await;
        clients.remove(&client_id);
    }

    info!("WebSocket client {} disconnected", addr);
}

async fn is_subscribed(
    clients: &Arc<RwLock<HashMap<String, ClientHandle>>>,
    client_id: &str,
    notification: &Notification,
) -> bool {
    let clients = clients.read().await;
    let Some(client) = clients.get(client_id) else {
        return false;
    };
    let topic = topic_name(notification.topic);
    client.subscriptions.iter().any(|s| s == "*" || s == topic)
}

/// Dispatches one client command, returning the response to send back.
async fn handle_command(
    cmd: &serde_json::Value,
    client_id: &str,
    clients: &Arc<RwLock<HashMap<String, ClientHandle>>>,
    ctx: &Arc<ServerContext>,
    limiter: &mut RateLimiter,
) -> Option<serde_json::Value> {
    let cmd_type = cmd.get("type").and_then(|v| v.as_str())?;

    match cmd_type {
        "ping" => Some(serde_json::json!({"type": "pong"})),

        "subscribe" => {
            if let Some(topic) = cmd.get("topic").and_then(|v| v.as_str()) {
                let mut clients = clients.write().await;
                if let Some(client) = clients.get_mut(client_id) {
                    client.subscriptions.push(topic.to_string());
                }
            }
            None
        }

        "unsubscribe" => {
            if let Some(topic) = cmd.get("topic").and_then(|v| v.as_str()) {
                let mut clients = clients.write().await;
                if let Some(client) = clients.get_mut(client_id) {
                    client.subscriptions.retain(|s| s != topic);
                }
            }
            None
        }

        "sample" => {
            if let Some(denied) = check_access(cmd, ctx, limiter) {
                return Some(denied);
            }

            let Some(data) = cmd.get("data") else {
                return Some(error_response("missing sample data"));
            };

            let incoming: IncomingSample = match serde_json::from_value(data.clone()) {
                Ok(incoming) => incoming,
                Err(_) => return Some(error_response("missing power data")),
            };

            match ctx.monitor.ingest_sample(incoming.into()).await {
                Ok(outcome) => Some(serde_json::json!({
                    "type": "ack",
                    "status": "success",
                    "event_id": outcome.event.as_ref().map(|e| e.id),
                    "appliance": outcome.matched.as_ref().map(|m| m.appliance_name.clone()),
                })),
                Err(e) => Some(error_response(&e.to_string())),
            }
        }

        "label" => {
            if let Some(denied) = check_access(cmd, ctx, limiter) {
                return Some(denied);
            }

            let event_id = cmd.get("event_id").and_then(|v| v.as_i64());
            let appliance_name = cmd.get("appliance_name").and_then(|v| v.as_str());
            let power_change = cmd.get("power_change").and_then(|v| v.as_f64());

            let (Some(event_id), Some(appliance_name)) = (event_id, appliance_name) else {
                return Some(error_response("missing required fields"));
            };

            match ctx.monitor.label_event(event_id, appliance_name, power_change).await {
                Ok(()) => Some(serde_json::json!({
                    "type": "ack",
                    "status": "success",
                    "message": "appliance labeled",
                })),
                Err(e) => Some(error_response(&e.to_string())),
            }
        }

        "add_appliance" => {
            if let Some(denied) = check_access(cmd, ctx, limiter) {
                return Some(denied);
            }

            let Some(name) = cmd.get("name").and_then(|v| v.as_str()) else {
                return Some(error_response("appliance name is required"));
            };
            let typical_power = cmd.get("typical_power").and_then(|v| v.as_f64()).unwrap_or(100.0);
            let duration = cmd.get("typical_duration").and_then(|v| v.as_i64()).unwrap_or(60);

            match ctx.monitor.add_appliance(name, typical_power, duration).await {
                Ok(()) => Some(serde_json::json!({"type": "ack", "status": "success"})),
                Err(e) => Some(error_response(&e.to_string())),
            }
        }

        "delete_appliance" => {
            if let Some(denied) = check_access(cmd, ctx, limiter) {
                return Some(denied);
            }

            let Some(name) = cmd.get("appliance_name").and_then(|v| v.as_str()) else {
                return Some(error_response("appliance name is required"));
            };

            match ctx.monitor.delete_appliance(name).await {
                Ok(()) => Some(serde_json::json!({"type": "ack", "status": "success"})),
                Err(e) => Some(error_response(&e.to_string())),
            }
        }

        "reset_system" => {
            if let Some(denied) = check_access(cmd, ctx, limiter) {
                return Some(denied);
            }

            if !cmd.get("confirm").and_then(|v| v.as_bool()).unwrap_or(false) {
                return Some(error_response("confirmation required"));
            }

            match ctx.monitor.reset().await {
                Ok(()) => Some(serde_json::json!({"type": "ack", "status": "success"})),
                Err(e) => Some(error_response(&e.to_string())),
            }
        }

        "request_initial_data" => {
            let appliances = ctx.db.appliance_states().unwrap_or_default();
            let unlabeled = ctx.db.unlabeled_events(24, 20).unwrap_or_default();
            let stats = ctx.db.statistics(24).ok();

            Some(serde_json::json!({
                "type": "initial_data",
                "appliances": appliances,
                "unlabeled_events": unlabeled,
                "system_stats": stats,
                "timestamp": Utc::now(),
            }))
        }

        "request_current_data" => {
            let status = ctx.monitor.current_status().await;
            Some(serde_json::json!({
                "type": "current_status",
                "current_power": status.current_power,
                "active_appliances": status.active_appliances,
                "system_status": "running",
                "timestamp": Utc::now(),
            }))
        }

        "request_system_status" => {
            let stats = ctx.db.statistics(24).ok();
            let state = ctx.monitor.system_state().await;
            Some(serde_json::json!({
                "type": "system_stats",
                "stats": stats,
                "state": state,
                "timestamp": Utc::now(),
            }))
        }

        "request_history" => {
            let limit = cmd.get("limit").and_then(|v| v.as_u64()).unwrap_or(100) as usize;
            let samples = ctx.db.recent_samples(limit.min(1000)).unwrap_or_default();
            Some(serde_json::json!({"type": "history", "samples": samples}))
        }

        "request_events" => {
            let events = ctx.db.recent_events(24, 50).unwrap_or_default();
            Some(serde_json::json!({"type": "events", "events": events}))
        }

        "request_known_appliances" => {
            use crate::db::ProfileRepository;
            let profiles = ctx.db.list().unwrap_or_default();
            Some(serde_json::json!({"type": "known_appliances", "appliances": profiles}))
        }

        "health" => {
            let recent = ctx.db.recent_sample_count(1).unwrap_or(0);
            let state = ctx.monitor.system_state().await;
            Some(serde_json::json!({
                "type": "health",
                "status": "healthy",
                "recent_readings": recent,
                "power_history_size": state.history_len,
                "active_appliances": state.active_appliances,
                "timestamp": Utc::now(),
            }))
        }

        _ => None,
    }
}

/// API key plus rate limit for state-changing commands.
fn check_access(
    cmd: &serde_json::Value,
    ctx: &Arc<ServerContext>,
    limiter: &mut RateLimiter,
) -> Option<serde_json::Value> {
    let supplied = cmd.get("api_key").and_then(|v| v.as_str()).unwrap_or("");
    if supplied != ctx.api_key {
        warn!("Invalid API key attempt");
        return Some(error_response("Invalid API key"));
    }

    if !limiter.allow() {
        warn!("Rate limit exceeded");
        return Some(error_response("Rate limit exceeded"));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_enforces_budget() {
        let mut limiter = RateLimiter::new(3);

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn incoming_sample_requires_power() {
        let ok: Result<IncomingSample, _> =
            serde_json::from_value(serde_json::json!({"power": 230.5, "voltage": 229.8}));
        assert!(ok.is_ok());

        let missing: Result<IncomingSample, _> =
            serde_json::from_value(serde_json::json!({"voltage": 229.8}));
        assert!(missing.is_err());
    }
}
