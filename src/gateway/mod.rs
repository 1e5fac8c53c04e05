//! Gateway Adapter (spec §4.A): a typed façade over the media gateway's
//! control-plane capability set. The rest of the core never talks to the
//! gateway's HTTP or WebSocket surface directly — only through
//! [`GatewayClient`], the way the teacher crate never lets its
//! orchestrator touch a SIP transport directly, only a session
//! coordinator.

mod ari;

pub use ari::AriGatewayClient;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BridgeId(pub String);

impl std::fmt::Display for BridgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events the core consumes (spec §4.A).
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    StasisStart {
        channel_id: ChannelId,
        args: Vec<String>,
    },
    StasisEnd {
        channel_id: ChannelId,
    },
    ChannelDestroyed {
        channel_id: ChannelId,
    },
    ChannelDtmfReceived {
        channel_id: ChannelId,
        digit: char,
    },
    BridgeDestroyed {
        bridge_id: BridgeId,
    },
    ChannelEnteredBridge {
        bridge_id: BridgeId,
        channel_id: ChannelId,
    },
    ChannelLeftBridge {
        bridge_id: BridgeId,
        channel_id: ChannelId,
    },
    /// Not in the distilled capability table but required by
    /// `PlaybackModel` (spec §4.E carries 25% of the component weight);
    /// ARI's real `/play` verb resolves this way. Keyed by the playback
    /// id returned from `channel_play`.
    PlaybackFinished {
        playback_id: String,
    },
}

impl GatewayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::StasisStart { .. } => "StasisStart",
            GatewayEvent::StasisEnd { .. } => "StasisEnd",
            GatewayEvent::ChannelDestroyed { .. } => "ChannelDestroyed",
            GatewayEvent::ChannelDtmfReceived { .. } => "ChannelDtmfReceived",
            GatewayEvent::BridgeDestroyed { .. } => "BridgeDestroyed",
            GatewayEvent::ChannelEnteredBridge { .. } => "ChannelEnteredBridge",
            GatewayEvent::ChannelLeftBridge { .. } => "ChannelLeftBridge",
            GatewayEvent::PlaybackFinished { .. } => "PlaybackFinished",
        }
    }
}

/// A single-producer stream of gateway events. `cancel` is idempotent:
/// calling it twice, or dropping the subscription after cancelling, has no
/// further effect (spec §4.A).
pub struct Subscription {
    pub(crate) rx: tokio::sync::mpsc::Receiver<GatewayEvent>,
    pub(crate) cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
    pub(crate) _guard: tokio::task::JoinHandle<()>,
}

impl Subscription {
    /// Builds a subscription directly from a receiver, for `GatewayClient`
    /// implementations that do not run a forwarding task of their own (a
    /// fake used in tests, for instance). The trait is the seam consumers
    /// implement against, so constructing its return type cannot be
    /// restricted to this crate's own `AriGatewayClient`.
    pub fn from_receiver(rx: tokio::sync::mpsc::Receiver<GatewayEvent>) -> Self {
        Self {
            rx,
            cancelled: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            _guard: tokio::spawn(async {}),
        }
    }

    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        if self.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            return None;
        }
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self._guard.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingOptions {
    pub format: String,
}

/// Capability set consumed by the rest of the core (spec §4.A).
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn channel_create(&self, endpoint: &str, app_args: &[String]) -> Result<ChannelId>;

    async fn channel_originate(
        &self,
        caller_id: &str,
        endpoint: &str,
        app_args: &[String],
        variables: &HashMap<String, String>,
    ) -> Result<ChannelId>;

    /// Starts dialing a channel handle previously obtained from
    /// `channel_create`, attaching `variables` (this crate's SIP custom
    /// header injection rides along as `SIPADDHEADERn` variables — see
    /// spec §6 and `supervisor::headers`).
    async fn channel_start_dial(
        &self,
        channel: &ChannelId,
        caller_id: &str,
        variables: &HashMap<String, String>,
    ) -> Result<()>;

    async fn channel_answer(&self, channel: &ChannelId) -> Result<()>;
    async fn channel_hangup(&self, channel: &ChannelId) -> Result<()>;

    /// Hangup that tolerates the channel already being gone (spec §8
    /// round-trip law: `SafeHangup` is a no-op on an absent channel).
    async fn channel_safe_hangup(&self, channel: &ChannelId) -> Result<()> {
        match self.channel_hangup(channel).await {
            Ok(()) => Ok(()),
            Err(crate::error::EngineError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Starts media playback of `media_uri` on `channel`, returning a
    /// playback id whose completion is reported via
    /// `GatewayEvent::PlaybackFinished`.
    async fn channel_play(&self, channel: &ChannelId, media_uri: &str) -> Result<String>;

    async fn channel_ring(&self, channel: &ChannelId) -> Result<()>;
    async fn channel_stop_ring(&self, channel: &ChannelId) -> Result<()>;
    async fn channel_send_dtmf(&self, channel: &ChannelId, digits: &str) -> Result<()>;
    async fn channel_record(
        &self,
        channel: &ChannelId,
        recording_id: &str,
        opts: &RecordingOptions,
    ) -> Result<()>;

    async fn bridge_create(&self, bridge_id: &BridgeId) -> Result<()>;
    async fn bridge_add_channel(&self, bridge: &BridgeId, channel: &ChannelId) -> Result<()>;
    async fn bridge_delete(&self, bridge: &BridgeId) -> Result<()>;
    async fn bridge_record(
        &self,
        bridge: &BridgeId,
        recording_id: &str,
        opts: &RecordingOptions,
    ) -> Result<()>;

    /// Subscribe to events for one channel or bridge id (matched against
    /// the id embedded in the event).
    async fn subscribe(&self, entity_id: &str, kinds: &[&str]) -> Result<Subscription>;

    /// Subscribe to the bus-wide `StasisStart` stream (spec §4.A Bus).
    async fn subscribe_stasis_start(&self) -> Result<Subscription>;
}
