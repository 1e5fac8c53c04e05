//! `WaitModel` (spec §4.E): pauses for a configured duration, then takes
//! its sole outbound link. Honors cancellation mid-sleep (spec §5).

use tokio::sync::oneshot;
use tokio::time::{sleep, Duration};
use tracing::warn;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::model::CellKind;

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let duration_ms = match cell.kind {
        CellKind::Wait { duration_ms } => duration_ms,
        other => {
            warn!("wait handler dispatched for non-wait cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    tokio::select! {
        _ = sleep(Duration::from_millis(duration_ms)) => {}
        _ = wait_for_cancel(&ctx) => {
            send_response(respond, ctx.respond_terminal());
            return;
        }
    }

    let resp = ctx.respond_via_port("default").await;
    send_response(respond, resp);
}

/// Polls the runner's cancellation flag while the handler sleeps, since
/// it is not itself a suspension point that can be selected on directly.
async fn wait_for_cancel(ctx: &HandlerContext) {
    loop {
        if ctx.runner.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
