//! `LineChannel`/`LineBridge` (spec §3): thin domain wrappers around a
//! gateway channel/bridge handle. The gateway itself is stateless about
//! which bridge a channel currently sits in; these two types are where
//! that relationship lives on our side.
//!
//! Ground: `original_source/types/lineChannel.go` (`LineChannel` wraps
//! `*ari.ChannelHandle` plus a back-reference to its `LineBridge`, a
//! current cell index, and the last DTMF digit seen).

use crate::gateway::{BridgeId, ChannelId};

/// Wraps one gateway channel handle (spec §3 Data Model). `bridge` is a
/// single optional field, so the invariant "a `LineChannel` belongs to at
/// most one `LineBridge`" holds structurally; `leave_bridge` clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct LineChannel {
    pub channel_id: ChannelId,
    bridge: Option<BridgeId>,
    pub current_cell_index: usize,
    pub dtmf_pressed: String,
}

impl LineChannel {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            bridge: None,
            current_cell_index: 0,
            dtmf_pressed: String::new(),
        }
    }

    pub fn bridge(&self) -> Option<&BridgeId> {
        self.bridge.as_ref()
    }

    pub fn join_bridge(&mut self, bridge_id: BridgeId) {
        self.bridge = Some(bridge_id);
    }

    /// Spec §3 invariant: leaving a bridge clears the back-reference.
    pub fn leave_bridge(&mut self) {
        self.bridge = None;
    }
}

/// Wraps one gateway bridge handle plus the channels that have been
/// added to it (spec §3 Data Model).
#[derive(Debug, Clone, Default)]
pub struct LineBridge {
    pub channels: Vec<ChannelId>,
}

impl LineBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, channel: ChannelId) {
        if !self.channels.contains(&channel) {
            self.channels.push(channel);
        }
    }

    pub fn remove_channel(&mut self, channel: &ChannelId) {
        self.channels.retain(|c| c != channel);
    }
}
