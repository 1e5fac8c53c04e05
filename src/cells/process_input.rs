//! `ProcessInputModel` (spec §4.E): subscribes to DTMF events, accumulates
//! digits until the terminator character or the configured length, and
//! writes the result to `event_vars["digits"]`.

use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tracing::warn;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::gateway::GatewayEvent;
use crate::model::CellKind;

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let (max_len, terminator, timeout_ms) = match cell.kind {
        CellKind::ProcessInput {
            max_len,
            terminator,
            timeout_ms,
        } => (max_len, terminator, timeout_ms),
        other => {
            warn!("process_input handler dispatched for non-process-input cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    let mut sub = match ctx
        .gateway
        .subscribe(&ctx.channel.0, &["ChannelDtmfReceived"])
        .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to subscribe to DTMF events: {e}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    let mut digits = String::new();
    let deadline = Duration::from_millis(timeout_ms);
    let mut matched = false;

    loop {
        if ctx.runner.is_cancelled() {
            sub.cancel();
            send_response(respond, ctx.respond_terminal());
            return;
        }
        if digits.len() >= max_len {
            matched = true;
            break;
        }
        match timeout(deadline, sub.recv()).await {
            Ok(Some(GatewayEvent::ChannelDtmfReceived { digit, .. })) => {
                if digit == terminator {
                    matched = !digits.is_empty();
                    break;
                }
                digits.push(digit);
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => break, // timed out waiting for the next digit
        }
    }
    sub.cancel();

    ctx.publish_event_vars(vec![("digits", digits)]).await;

    let port = if matched { "matched" } else { "timeout" };
    let resp = ctx.respond_via_port(port).await;
    send_response(respond, resp);
}
