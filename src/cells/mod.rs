//! Cell Handlers (spec §4.E). One module per cell type; each exposes a
//! `run` function with the same shape: given a [`HandlerContext`], do the
//! cell's work and publish exactly one [`ManagerResponse`] on the
//! supplied one-shot sender. Double-send or no-send is the "handler
//! protocol violation" error category in spec §7 — the one-shot sender
//! type itself prevents a double send (design note: "Handler completion
//! contract").

pub mod bridge;
pub mod conference;
pub mod dial;
pub mod macro_cell;
pub mod playback;
pub mod process_input;
pub mod record_voicemail;
pub mod send_digits;
pub mod set_variables;
pub mod switch;
pub mod wait;

use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};

use crate::api_client::ApiClient;
use crate::cache::ConferenceCache;
use crate::config::EngineConfig;
use crate::gateway::{BridgeId, ChannelId, GatewayClient};
use crate::model::{CellId, Flow, Runner};

/// Shared, lock-guarded flow: many concurrent runners may read each
/// other's `event_vars` (via interpolation) and each writes only its own
/// cell's fields, but the flow's cell table itself needs one writer at a
/// time.
pub type SharedFlow = Arc<RwLock<Flow>>;

/// Everything a handler needs, materialized fresh per cell dispatch
/// (spec §4.F step 2).
pub struct HandlerContext {
    pub gateway: Arc<dyn GatewayClient>,
    pub api: Arc<ApiClient>,
    pub conference_cache: Arc<dyn ConferenceCache>,
    pub config: Arc<EngineConfig>,
    pub flow: SharedFlow,
    pub cell_id: CellId,
    pub runner: Runner,
    pub channel: ChannelId,
}

/// The message a handler publishes on completion: the channel it last
/// operated on, and the cell id it selected (`None` means terminal).
pub struct ManagerResponse {
    pub channel: ChannelId,
    pub next: Option<CellId>,
}

impl HandlerContext {
    /// Clones the cell this context was dispatched for, so a handler can
    /// read its `kind`/`data` without holding the flow lock across an
    /// `.await`.
    pub async fn cell_snapshot(&self) -> crate::model::Cell {
        self.flow
            .read()
            .await
            .cell(self.cell_id)
            .cloned()
            .expect("dispatched cell must exist in its own flow")
    }

    /// Resolves the outbound link on `port` from this handler's cell and
    /// turns it into a `ManagerResponse`, defaulting to the channel this
    /// context was given.
    pub async fn respond_via_port(&self, port: &str) -> ManagerResponse {
        let flow = self.flow.read().await;
        let next = flow.find_link(self.cell_id, port).map(|l| l.target);
        ManagerResponse {
            channel: self.channel.clone(),
            next,
        }
    }

    pub fn respond_terminal(&self) -> ManagerResponse {
        ManagerResponse {
            channel: self.channel.clone(),
            next: None,
        }
    }

    /// Writes this handler's `event_vars` back into the flow so later
    /// cells can interpolate `{{thisCell.field}}` against them (spec
    /// §3 invariant: readable only after the producing cell returns,
    /// which holds here because we write before sending the response).
    pub async fn publish_event_vars(&self, vars: Vec<(&str, String)>) {
        let mut flow = self.flow.write().await;
        if let Some(cell) = flow.cells.get_mut(&self.cell_id) {
            for (k, v) in vars {
                cell.event_vars.insert(k.to_string(), v);
            }
        }
    }

    /// Attaches a `Call` to this handler's cell (spec §3 Cell: "an
    /// optional attached `Call`"), used by `BridgeModel` so
    /// `{{cell.started}}`/`{{cell.ended}}` can read the call's own
    /// timestamps.
    pub async fn attach_call(&self, call: crate::model::Call) {
        let mut flow = self.flow.write().await;
        if let Some(cell) = flow.cells.get_mut(&self.cell_id) {
            cell.attached_call = Some(call);
        }
    }

    /// Records the channel instance this handler's cell last operated on
    /// (spec §3 Cell attribute), joining it to `bridge` when the handler
    /// placed it in one.
    pub async fn attach_channel(&self, channel_id: ChannelId, bridge: Option<BridgeId>) {
        let mut line_channel = crate::model::LineChannel::new(channel_id);
        if let Some(bridge_id) = bridge {
            line_channel.join_bridge(bridge_id);
        }
        let mut flow = self.flow.write().await;
        if let Some(cell) = flow.cells.get_mut(&self.cell_id) {
            cell.current_channel = Some(line_channel);
        }
    }
}

/// Sends `resp` on `tx`, logging (rather than panicking) if the
/// interpreter side has already gone away — the interpreter always awaits
/// exactly once per cell, so a closed receiver here means the flow was
/// cancelled mid-handler.
pub fn send_response(tx: oneshot::Sender<ManagerResponse>, resp: ManagerResponse) {
    if tx.send(resp).is_err() {
        tracing::debug!("handler response dropped: interpreter side already gone");
    }
}
