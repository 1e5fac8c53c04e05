//! Direct ARI connection: HTTP for request/response operations, a single
//! WebSocket reader task fanning events out to per-subscriber channels.
//!
//! Ground: `original_source/main.go` `createARIConnection` (direct mode)
//! and `internal/config/config.go` (URL construction). The proxy
//! (`ARI_USE_PROXY=true`) connection mode tunnels the same ARI JSON
//! payloads through a message bus and is not implemented here; this
//! client covers the direct mode, which is what every example flow in
//! this crate's test suite exercises.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use super::{BridgeId, ChannelId, GatewayClient, GatewayEvent, RecordingOptions, Subscription};
use crate::error::{EngineError, Result};

const BROADCAST_CAPACITY: usize = 1024;

pub struct AriGatewayClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    application: String,
    events: broadcast::Sender<GatewayEvent>,
}

impl AriGatewayClient {
    /// Connects the WebSocket event reader and returns a client ready for
    /// request/response calls. `ari_url`/`ws_url` come from
    /// `EngineConfig::ari_url`/`ws_url`.
    pub async fn connect(
        ari_url: String,
        ws_url: String,
        username: String,
        password: String,
        application: String,
    ) -> Result<Self> {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);

        let mut url = url::Url::parse(&ws_url)?;
        url.query_pairs_mut()
            .append_pair("app", &application)
            .append_pair("api_key", &format!("{username}:{password}"))
            .append_pair("subscribeAll", "true");

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(EngineError::WebSocket)?;

        let tx_reader = tx.clone();
        tokio::spawn(async move {
            let (_write, mut read) = ws_stream.split();
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match parse_event(&text) {
                        Ok(Some(event)) => {
                            let _ = tx_reader.send(event);
                        }
                        Ok(None) => debug!("ignoring unrecognized ARI event payload"),
                        Err(e) => warn!("failed to parse ARI event: {e}"),
                    },
                    Ok(Message::Close(_)) => {
                        warn!("ARI event websocket closed by gateway");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("ARI event websocket error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: ari_url,
            username,
            password,
            application,
            events: tx,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check_status(&self, resp: reqwest::Response) -> Result<serde_json::Value> {
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::not_found(format!("ARI resource not found: {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::gateway_transport(format!(
                "ARI request failed ({status}): {body}"
            )));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }
        let body = resp.text().await.unwrap_or_default();
        if body.is_empty() {
            Ok(serde_json::Value::Null)
        } else {
            Ok(serde_json::from_str(&body)?)
        }
    }
}

fn parse_event(text: &str) -> Result<Option<GatewayEvent>> {
    let v: serde_json::Value = serde_json::from_str(text)?;
    let kind = v.get("type").and_then(|t| t.as_str()).unwrap_or("");

    let channel_id = |v: &serde_json::Value| -> Option<ChannelId> {
        v.get("channel")
            .and_then(|c| c.get("id"))
            .and_then(|id| id.as_str())
            .map(|s| ChannelId(s.to_string()))
    };
    let bridge_id = |v: &serde_json::Value| -> Option<BridgeId> {
        v.get("bridge")
            .and_then(|b| b.get("id"))
            .and_then(|id| id.as_str())
            .map(|s| BridgeId(s.to_string()))
    };

    let event = match kind {
        "StasisStart" => {
            let args = v
                .get("args")
                .and_then(|a| a.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|e| e.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            channel_id(&v).map(|channel_id| GatewayEvent::StasisStart { channel_id, args })
        }
        "StasisEnd" => channel_id(&v).map(|channel_id| GatewayEvent::StasisEnd { channel_id }),
        "ChannelDestroyed" => {
            channel_id(&v).map(|channel_id| GatewayEvent::ChannelDestroyed { channel_id })
        }
        "ChannelDtmfReceived" => {
            let digit = v
                .get("digit")
                .and_then(|d| d.as_str())
                .and_then(|s| s.chars().next());
            match (channel_id(&v), digit) {
                (Some(channel_id), Some(digit)) => {
                    Some(GatewayEvent::ChannelDtmfReceived { channel_id, digit })
                }
                _ => None,
            }
        }
        "BridgeDestroyed" => bridge_id(&v).map(|bridge_id| GatewayEvent::BridgeDestroyed { bridge_id }),
        "ChannelEnteredBridge" => match (bridge_id(&v), channel_id(&v)) {
            (Some(bridge_id), Some(channel_id)) => {
                Some(GatewayEvent::ChannelEnteredBridge { bridge_id, channel_id })
            }
            _ => None,
        },
        "ChannelLeftBridge" => match (bridge_id(&v), channel_id(&v)) {
            (Some(bridge_id), Some(channel_id)) => {
                Some(GatewayEvent::ChannelLeftBridge { bridge_id, channel_id })
            }
            _ => None,
        },
        "PlaybackFinished" => v
            .get("playback")
            .and_then(|p| p.get("id"))
            .and_then(|id| id.as_str())
            .map(|s| GatewayEvent::PlaybackFinished {
                playback_id: s.to_string(),
            }),
        _ => None,
    };
    Ok(event)
}

fn event_entity_id(event: &GatewayEvent) -> String {
    match event {
        GatewayEvent::StasisStart { channel_id, .. } => channel_id.0.clone(),
        GatewayEvent::StasisEnd { channel_id } => channel_id.0.clone(),
        GatewayEvent::ChannelDestroyed { channel_id } => channel_id.0.clone(),
        GatewayEvent::ChannelDtmfReceived { channel_id, .. } => channel_id.0.clone(),
        GatewayEvent::BridgeDestroyed { bridge_id } => bridge_id.0.clone(),
        GatewayEvent::ChannelEnteredBridge { bridge_id, .. } => bridge_id.0.clone(),
        GatewayEvent::ChannelLeftBridge { bridge_id, .. } => bridge_id.0.clone(),
        GatewayEvent::PlaybackFinished { playback_id } => playback_id.clone(),
    }
}

#[async_trait]
impl GatewayClient for AriGatewayClient {
    async fn channel_create(&self, endpoint: &str, app_args: &[String]) -> Result<ChannelId> {
        let body = json!({
            "endpoint": endpoint,
            "app": self.application,
            "appArgs": app_args.join(","),
        });
        let resp = self
            .http
            .post(self.url("/channels/create"))
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        let v = self.check_status(resp).await?;
        let id = v
            .get("id")
            .and_then(|i| i.as_str())
            .ok_or_else(|| EngineError::gateway_transport("ARI create response missing id"))?;
        Ok(ChannelId(id.to_string()))
    }

    async fn channel_originate(
        &self,
        caller_id: &str,
        endpoint: &str,
        app_args: &[String],
        variables: &HashMap<String, String>,
    ) -> Result<ChannelId> {
        let body = json!({
            "endpoint": endpoint,
            "app": self.application,
            "appArgs": app_args.join(","),
            "callerId": caller_id,
            "variables": variables,
        });
        let resp = self
            .http
            .post(self.url("/channels"))
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        let v = self.check_status(resp).await?;
        let id = v
            .get("id")
            .and_then(|i| i.as_str())
            .ok_or_else(|| EngineError::gateway_transport("ARI originate response missing id"))?;
        Ok(ChannelId(id.to_string()))
    }

    async fn channel_answer(&self, channel: &ChannelId) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/answer", channel.0)))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn channel_hangup(&self, channel: &ChannelId) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/channels/{}", channel.0)))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn channel_start_dial(
        &self,
        channel: &ChannelId,
        caller_id: &str,
        variables: &HashMap<String, String>,
    ) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/dial", channel.0)))
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "callerId": caller_id, "variables": variables }))
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn channel_play(&self, channel: &ChannelId, media_uri: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/play", channel.0)))
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "media": media_uri }))
            .send()
            .await?;
        let v = self.check_status(resp).await?;
        let id = v
            .get("id")
            .and_then(|i| i.as_str())
            .ok_or_else(|| EngineError::gateway_transport("ARI play response missing id"))?;
        Ok(id.to_string())
    }

    async fn channel_ring(&self, channel: &ChannelId) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/ring", channel.0)))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn channel_stop_ring(&self, channel: &ChannelId) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/channels/{}/ring", channel.0)))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn channel_send_dtmf(&self, channel: &ChannelId, digits: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/dtmf", channel.0)))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("dtmf", digits)])
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn channel_record(
        &self,
        channel: &ChannelId,
        recording_id: &str,
        opts: &RecordingOptions,
    ) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/record", channel.0)))
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "name": recording_id, "format": opts.format }))
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn bridge_create(&self, bridge_id: &BridgeId) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/bridges"))
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "type": "mixing", "bridgeId": bridge_id.0 }))
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn bridge_add_channel(&self, bridge: &BridgeId, channel: &ChannelId) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/bridges/{}/addChannel", bridge.0)))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("channel", &channel.0)])
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn bridge_delete(&self, bridge: &BridgeId) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/bridges/{}", bridge.0)))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn bridge_record(
        &self,
        bridge: &BridgeId,
        recording_id: &str,
        opts: &RecordingOptions,
    ) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/bridges/{}/record", bridge.0)))
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "name": recording_id, "format": opts.format }))
            .send()
            .await?;
        self.check_status(resp).await?;
        Ok(())
    }

    async fn subscribe(&self, entity_id: &str, kinds: &[&str]) -> Result<Subscription> {
        let mut rx = self.events.subscribe();
        let (tx, out_rx) = mpsc::channel(64);
        let cancelled = Arc::new(AtomicBool::new(false));
        let entity_id = entity_id.to_string();
        let kinds: Vec<String> = kinds.iter().map(|s| s.to_string()).collect();

        let guard = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if kinds.iter().any(|k| k == event.kind())
                            && event_entity_id(&event) == entity_id
                            && tx.send(event).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription {
            rx: out_rx,
            cancelled,
            _guard: guard,
        })
    }

    async fn subscribe_stasis_start(&self) -> Result<Subscription> {
        let mut rx = self.events.subscribe();
        let (tx, out_rx) = mpsc::channel(64);
        let cancelled = Arc::new(AtomicBool::new(false));

        let guard = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event @ GatewayEvent::StasisStart { .. }) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription {
            rx: out_rx,
            cancelled,
            _guard: guard,
        })
    }
}
