//! `PlaybackModel` (spec §4.E): plays an audio URL, repeating `loop_count`
//! times, then takes its sole outbound link.

use tokio::sync::oneshot;
use tracing::{info, warn};

use super::{send_response, HandlerContext, ManagerResponse};
use crate::gateway::GatewayEvent;
use crate::model::CellKind;

/// Default loop count when `loop` is absent or not parseable as a
/// number (ground: `original_source/utils/utils.go` `PlaybackLoops`,
/// which falls back to a constant on any parse failure).
const DEFAULT_PLAYBACK_LOOPS: u32 = 1;

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let (url, loop_count) = match &cell.kind {
        CellKind::Playback { url, loop_count } => {
            let count = loop_count
                .as_ref()
                .and_then(|v| v.as_num())
                .map(|n| n as u32)
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_PLAYBACK_LOOPS);
            (url.clone(), count)
        }
        other => {
            warn!("playback handler dispatched for non-playback cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    for iteration in 0..loop_count {
        if ctx.runner.is_cancelled() {
            send_response(respond, ctx.respond_terminal());
            return;
        }
        info!(%url, iteration, "playing back audio");
        match play_once(&ctx, &url).await {
            Ok(()) => {}
            Err(e) => {
                warn!("playback of {url} failed: {e}");
                let resp = ctx.respond_via_port("failed").await;
                send_response(respond, resp);
                return;
            }
        }
    }

    let resp = ctx.respond_via_port("default").await;
    send_response(respond, resp);
}

async fn play_once(ctx: &HandlerContext, url: &str) -> crate::error::Result<()> {
    let playback_id = ctx.gateway.channel_play(&ctx.channel, url).await?;
    let mut sub = ctx
        .gateway
        .subscribe(&playback_id, &["PlaybackFinished"])
        .await?;
    loop {
        match sub.recv().await {
            Some(GatewayEvent::PlaybackFinished { .. }) => return Ok(()),
            Some(_) => continue,
            None => {
                return Err(crate::error::EngineError::gateway_transport(
                    "playback subscription closed before PlaybackFinished",
                ))
            }
        }
    }
}
