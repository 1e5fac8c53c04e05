//! `SendDigitsModel` (spec §4.E): plays DTMF tones on the current channel,
//! then takes its sole outbound link.

use tokio::sync::oneshot;
use tracing::warn;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::model::CellKind;

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let digits = match &cell.kind {
        CellKind::SendDigits { digits } => digits.clone(),
        other => {
            warn!("send_digits handler dispatched for non-send-digits cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    if let Err(e) = ctx.gateway.channel_send_dtmf(&ctx.channel, &digits).await {
        warn!("failed to send DTMF digits {digits}: {e}");
        let resp = ctx.respond_via_port("failed").await;
        send_response(respond, resp);
        return;
    }

    let resp = ctx.respond_via_port("default").await;
    send_response(respond, resp);
}
