//! Shared test harness: a `GatewayClient` fake usable across the
//! integration scenarios in `tests/integration_tests.rs`.
//!
//! Ground: `src/gateway/ari.rs`'s broadcast-fan-out-plus-per-subscriber-
//! filter shape is reproduced here rather than reinvented, so the fake
//! observes the same subscribe-before-trigger ordering a real ARI
//! connection would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use lineblocs_call_engine::error::Result;
use lineblocs_call_engine::gateway::{
    BridgeId, ChannelId, GatewayClient, GatewayEvent, RecordingOptions, Subscription,
};

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct DialedChannel {
    pub channel: ChannelId,
    pub caller_id: String,
    pub variables: HashMap<String, String>,
}

/// Records every operation invoked on it; tests assert against these
/// logs instead of a live gateway's side effects.
#[derive(Default)]
pub struct FakeGateway {
    events: Option<broadcast::Sender<GatewayEvent>>,
    next_id: AtomicU64,
    pub created: Mutex<Vec<ChannelId>>,
    pub dialed: Mutex<Vec<DialedChannel>>,
    pub answered: Mutex<Vec<ChannelId>>,
    pub hung_up: Mutex<Vec<ChannelId>>,
    pub played: Mutex<Vec<(ChannelId, String)>>,
    pub rang: Mutex<Vec<ChannelId>>,
    pub stopped_ringing: Mutex<Vec<ChannelId>>,
    pub sent_dtmf: Mutex<Vec<(ChannelId, String)>>,
    pub recorded: Mutex<Vec<(ChannelId, String)>>,
    pub bridges_created: Mutex<Vec<BridgeId>>,
    pub bridge_members: Mutex<Vec<(BridgeId, ChannelId)>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Arc::new(Self {
            events: Some(tx),
            ..Default::default()
        })
    }

    fn next_channel(&self) -> ChannelId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        ChannelId(format!("fake-channel-{n}"))
    }

    /// Pushes an event onto the fake bus; a no-op if nothing is
    /// subscribed yet (mirrors a real broadcast channel with 0 receivers).
    pub fn push_event(&self, event: GatewayEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
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
impl GatewayClient for FakeGateway {
    async fn channel_create(&self, _endpoint: &str, _app_args: &[String]) -> Result<ChannelId> {
        let id = self.next_channel();
        self.created.lock().push(id.clone());
        Ok(id)
    }

    async fn channel_originate(
        &self,
        caller_id: &str,
        _endpoint: &str,
        _app_args: &[String],
        variables: &HashMap<String, String>,
    ) -> Result<ChannelId> {
        let id = self.next_channel();
        self.created.lock().push(id.clone());
        self.dialed.lock().push(DialedChannel {
            channel: id.clone(),
            caller_id: caller_id.to_string(),
            variables: variables.clone(),
        });
        Ok(id)
    }

    async fn channel_start_dial(
        &self,
        channel: &ChannelId,
        caller_id: &str,
        variables: &HashMap<String, String>,
    ) -> Result<()> {
        self.dialed.lock().push(DialedChannel {
            channel: channel.clone(),
            caller_id: caller_id.to_string(),
            variables: variables.clone(),
        });
        Ok(())
    }

    async fn channel_answer(&self, channel: &ChannelId) -> Result<()> {
        self.answered.lock().push(channel.clone());
        Ok(())
    }

    async fn channel_hangup(&self, channel: &ChannelId) -> Result<()> {
        self.hung_up.lock().push(channel.clone());
        Ok(())
    }

    async fn channel_play(&self, channel: &ChannelId, media_uri: &str) -> Result<String> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let playback_id = format!("playback-{n}");
        self.played.lock().push((channel.clone(), media_uri.to_string()));
        Ok(playback_id)
    }

    async fn channel_ring(&self, channel: &ChannelId) -> Result<()> {
        self.rang.lock().push(channel.clone());
        Ok(())
    }

    async fn channel_stop_ring(&self, channel: &ChannelId) -> Result<()> {
        self.stopped_ringing.lock().push(channel.clone());
        Ok(())
    }

    async fn channel_send_dtmf(&self, channel: &ChannelId, digits: &str) -> Result<()> {
        self.sent_dtmf.lock().push((channel.clone(), digits.to_string()));
        Ok(())
    }

    async fn channel_record(
        &self,
        channel: &ChannelId,
        recording_id: &str,
        _opts: &RecordingOptions,
    ) -> Result<()> {
        self.recorded.lock().push((channel.clone(), recording_id.to_string()));
        Ok(())
    }

    async fn bridge_create(&self, bridge_id: &BridgeId) -> Result<()> {
        self.bridges_created.lock().push(bridge_id.clone());
        Ok(())
    }

    async fn bridge_add_channel(&self, bridge: &BridgeId, channel: &ChannelId) -> Result<()> {
        self.bridge_members.lock().push((bridge.clone(), channel.clone()));
        Ok(())
    }

    async fn bridge_delete(&self, _bridge: &BridgeId) -> Result<()> {
        Ok(())
    }

    async fn bridge_record(
        &self,
        _bridge: &BridgeId,
        _recording_id: &str,
        _opts: &RecordingOptions,
    ) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, entity_id: &str, kinds: &[&str]) -> Result<Subscription> {
        let tx = self.events.as_ref().expect("events channel always set by new()");
        let mut rx = tx.subscribe();
        let (out_tx, out_rx) = mpsc::channel(64);
        let entity_id = entity_id.to_string();
        let kinds: Vec<String> = kinds.iter().map(|s| s.to_string()).collect();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if kinds.iter().any(|k| k == event.kind())
                            && event_entity_id(&event) == entity_id
                            && out_tx.send(event).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::from_receiver(out_rx))
    }

    async fn subscribe_stasis_start(&self) -> Result<Subscription> {
        let tx = self.events.as_ref().expect("events channel always set by new()");
        let mut rx = tx.subscribe();
        let (out_tx, out_rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event @ GatewayEvent::StasisStart { .. }) => {
                        if out_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::from_receiver(out_rx))
    }
}

/// Polls `condition` until it holds or `timeout` elapses, returning
/// whether it held. Used instead of a fixed `sleep` so assertions on
/// background-spawned work (the dispatcher loop, the bridge/leg watchers)
/// don't race the tasks they're observing.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
