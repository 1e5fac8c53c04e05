//! Flow Interpreter (spec §4.F): walks a flow graph cell by cell,
//! threading the variable environment between cells and honoring
//! cancellation.
//!
//! Ground: `original_source/mngrs/flow.go` `startProcessingFlow` /
//! `ProcessFlow`. The Go `manRecvChannel := make(chan *ManagerResponse)`
//! one-shot per cell becomes a `tokio::sync::oneshot::channel`; the Go
//! `go startProcessingFlow(...)` spawn for `LaunchModel`'s fan-out becomes
//! one `tokio::spawn` per outbound link; the Go `defer
//! startProcessingFlow(...)` tail call on a non-terminal response becomes
//! a loop rather than recursion, so a long flow graph never grows the
//! task's stack (a Rust-specific improvement, see DESIGN.md).

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::api_client::ApiClient;
use crate::cache::ConferenceCache;
use crate::config::EngineConfig;
use crate::cells::{self, HandlerContext, ManagerResponse, SharedFlow};
use crate::gateway::{ChannelId, GatewayClient};
use crate::model::{CellId, CellKind, Runner};

/// Whether reaching a terminal cell (no outbound link) should hang up the
/// channel. Top-level flows do (spec §4.F step 7); a macro's nested
/// sub-flow does not — reaching the end of a macro simply returns control
/// to the cell after the `MacroModel` (spec §4.E MacroModel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTerminal {
    Hangup,
    Return,
}

/// Resources every handler dispatch in this flow needs; threaded through
/// rather than stashed as globals (design note: "Global mutable process
/// state").
#[derive(Clone)]
pub struct Interpreter {
    pub gateway: Arc<dyn GatewayClient>,
    pub api: Arc<ApiClient>,
    pub conference_cache: Arc<dyn ConferenceCache>,
    pub config: Arc<EngineConfig>,
}

impl Interpreter {
    pub fn new(
        gateway: Arc<dyn GatewayClient>,
        api: Arc<ApiClient>,
        conference_cache: Arc<dyn ConferenceCache>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            gateway,
            api,
            conference_cache,
            config,
        }
    }

    /// Entry point (spec §4.F `ProcessFlow`): creates a fresh runner,
    /// registers it on the flow, and spawns the core loop as a background
    /// task hanging up on terminal.
    pub fn process_flow(&self, flow: SharedFlow, channel: ChannelId, root_cell: CellId) {
        let interp = self.clone();
        tokio::spawn(async move {
            let runner = { flow.write().await.spawn_runner() };
            interp.run(flow, channel, root_cell, runner, OnTerminal::Hangup).await;
        });
    }

    /// Core per-cell procedure (spec §4.F steps 1-8), looped instead of
    /// recursed. Returns the channel last operated on.
    pub async fn run(
        &self,
        flow: SharedFlow,
        mut channel: ChannelId,
        mut cell_id: CellId,
        runner: Runner,
        on_terminal: OnTerminal,
    ) -> ChannelId {
        loop {
            if runner.is_cancelled() {
                debug!(%cell_id, "runner cancelled, stopping dispatch");
                return channel;
            }

            // Step 3: interpolate this cell's data in place before
            // dispatch. The cell is cloned out so `interpolate_cell` can
            // hold an immutable borrow of the rest of the flow (other
            // cells' `event_vars`) while writing this one cell back.
            let kind = {
                let mut flow_guard = flow.write().await;
                match flow_guard.cells.get(&cell_id).cloned() {
                    Some(mut cell) => {
                        crate::interpolation::interpolate_cell(&flow_guard, &mut cell);
                        let kind = cell.kind.clone();
                        flow_guard.cells.insert(cell_id, cell);
                        Some(kind)
                    }
                    None => None,
                }
            };

            let kind = match kind {
                Some(k) => k,
                None => {
                    warn!(%cell_id, "flow semantic error: dispatched cell does not exist");
                    return channel;
                }
            };

            if let CellKind::Launch = kind {
                let targets: Vec<CellId> = {
                    let flow_guard = flow.read().await;
                    flow_guard.outbound_links(cell_id).iter().map(|l| l.target).collect()
                };
                for target in targets {
                    let runner2 = { flow.write().await.spawn_runner() };
                    let interp = self.clone();
                    let flow2 = flow.clone();
                    let channel2 = channel.clone();
                    tokio::spawn(async move {
                        interp.run(flow2, channel2, target, runner2, on_terminal).await;
                    });
                }
                return channel;
            }

            let ctx = HandlerContext {
                gateway: self.gateway.clone(),
                api: self.api.clone(),
                conference_cache: self.conference_cache.clone(),
                config: self.config.clone(),
                flow: flow.clone(),
                cell_id,
                runner: runner.clone(),
                channel: channel.clone(),
            };

            let (tx, rx) = oneshot::channel::<ManagerResponse>();
            tokio::spawn(dispatch(kind, ctx, tx));

            let resp = match rx.await {
                Ok(resp) => resp,
                Err(_) => {
                    warn!(%cell_id, "handler protocol error: no response published");
                    return channel;
                }
            };

            match resp.next {
                None => {
                    debug!(%cell_id, "cell is terminal");
                    if on_terminal == OnTerminal::Hangup {
                        let _ = self.gateway.channel_safe_hangup(&resp.channel).await;
                    }
                    return resp.channel;
                }
                Some(next) => {
                    channel = resp.channel;
                    cell_id = next;
                }
            }
        }
    }
}

/// Dispatches to the cell-type-specific handler (spec §4.E). `Launch` is
/// handled by the caller and never reaches here.
async fn dispatch(kind: CellKind, ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    match kind {
        CellKind::Launch => unreachable!("LaunchModel has no handler, handled by Interpreter::run"),
        CellKind::Switch { .. } => cells::switch::run(ctx, respond).await,
        CellKind::Bridge { .. } => cells::bridge::run(ctx, respond).await,
        CellKind::Playback { .. } => cells::playback::run(ctx, respond).await,
        CellKind::ProcessInput { .. } => cells::process_input::run(ctx, respond).await,
        CellKind::Dial { .. } => cells::dial::run(ctx, respond).await,
        CellKind::SetVariables { .. } => cells::set_variables::run(ctx, respond).await,
        CellKind::Wait { .. } => cells::wait::run(ctx, respond).await,
        CellKind::SendDigits { .. } => cells::send_digits::run(ctx, respond).await,
        CellKind::Macro { .. } => cells::macro_cell::run(ctx, respond).await,
        CellKind::Conference { .. } => cells::conference::run(ctx, respond).await,
        CellKind::RecordVoicemail { .. } => cells::record_voicemail::run(ctx, respond).await,
    }
}
