//! `DialModel` (spec §4.E): originates an outbound leg via the supervisor's
//! bridge-and-dial operation (§4.G), then chooses `answered` / `no-answer`
//! / `busy` / `failed` from the observed outcome. Writes `dial_status`,
//! `from`, `to`, `channelId` to `event_vars` (spec §4.D).
//!
//! Ground: `original_source/utils/utils.go` `DetermineCallerId` for the
//! caller-id fallback to the call's own `from` field.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::warn;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::model::CellKind;
use crate::supervisor::{self, DialOutcome, EnsureBridgeRequest};

fn outcome_port(outcome: DialOutcome) -> &'static str {
    match outcome {
        DialOutcome::Answered => "answered",
        DialOutcome::NoAnswer => "no-answer",
        DialOutcome::Busy => "busy",
        DialOutcome::Failed => "failed",
    }
}

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let (dest, caller_id_override, timeout_ms) = match &cell.kind {
        CellKind::Dial {
            dest,
            caller_id,
            timeout_ms,
        } => (dest.clone(), caller_id.clone(), *timeout_ms),
        other => {
            warn!("dial handler dispatched for non-dial cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    let (user, default_from) = {
        let flow = ctx.flow.read().await;
        let from = flow
            .root_call
            .as_ref()
            .map(|c| c.params.from.clone())
            .unwrap_or_default();
        (flow.user.clone(), from)
    };
    let caller_id = caller_id_override
        .filter(|s| !s.is_empty())
        .unwrap_or(default_from);

    let proxy_host = ctx.config.proxy_host.clone().unwrap_or_default();
    let lineblocs_key = ctx.config.lineblocs_key.clone().unwrap_or_default();

    let req = EnsureBridgeRequest::bridge(
        &user,
        &ctx.channel,
        &caller_id,
        &dest,
        "extension",
        Vec::new(),
        &proxy_host,
        &lineblocs_key,
    );
    let req = EnsureBridgeRequest {
        ring_timeout: Duration::from_millis(timeout_ms),
        ..req
    };

    let (outcome, bridge_id) = match supervisor::ensure_bridge(&ctx.gateway, &ctx.api, req).await {
        Ok(result) => result,
        Err(e) => {
            warn!("dial to {dest} failed: {e}");
            ctx.publish_event_vars(vec![
                ("dial_status", "failed".to_string()),
                ("from", caller_id.clone()),
                ("to", dest.clone()),
                ("channelId", ctx.channel.0.clone()),
            ])
            .await;
            let resp = ctx.respond_via_port("failed").await;
            send_response(respond, resp);
            return;
        }
    };

    let port = outcome_port(outcome);
    if matches!(outcome, DialOutcome::Answered) {
        ctx.attach_channel(ctx.channel.clone(), Some(bridge_id)).await;
    }
    ctx.publish_event_vars(vec![
        ("dial_status", port.to_string()),
        ("from", caller_id.clone()),
        ("to", dest.clone()),
        ("channelId", ctx.channel.0.clone()),
    ])
    .await;

    let resp = ctx.respond_via_port(port).await;
    send_response(respond, resp);
}
