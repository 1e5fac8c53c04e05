//! `BridgeModel` (spec §4.E): like `DialModel`, but also attaches the
//! resulting `Call` to the cell and reports `started`/`ended` as unix
//! seconds in `event_vars` once the call ends (spec §4.D per-cell
//! well-known vars table).

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::warn;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::model::{Call, CallParams, CallStatus, CellKind, Direction};
use crate::supervisor::{self, DialOutcome, EnsureBridgeRequest, DEFAULT_RING_TIMEOUT};

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
    let (dest, caller_id_override, call_type) = match &cell.kind {
        CellKind::Bridge {
            dest,
            caller_id,
            call_type,
        } => (dest.clone(), caller_id.clone(), call_type.clone()),
        other => {
            warn!("bridge handler dispatched for non-bridge cell {other:?}");
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
        &call_type,
        Vec::new(),
        &proxy_host,
        &lineblocs_key,
    );
    let req = EnsureBridgeRequest {
        ring_timeout: DEFAULT_RING_TIMEOUT,
        ..req
    };

    let started = Utc::now();
    let (outcome, bridge_id) = match supervisor::ensure_bridge(&ctx.gateway, &ctx.api, req).await {
        Ok(result) => result,
        Err(e) => {
            warn!("bridge to {dest} failed: {e}");
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

    let ended = Utc::now();
    let mut call = Call::new(
        0,
        ctx.channel.0.clone(),
        CallParams {
            from: caller_id.clone(),
            to: dest.clone(),
            status: CallStatus::Start,
            direction: Direction::Outbound,
            user_id: user.id,
            workspace_id: user.workspace.id,
            channel_id: ctx.channel.0.clone(),
        },
        started,
    );
    if matches!(outcome, DialOutcome::NoAnswer | DialOutcome::Busy | DialOutcome::Failed) {
        call.mark_ended(ended);
    }
    let started_unix = call.started.timestamp();
    let ended_unix = call.ended.map(|e| e.timestamp());
    ctx.attach_call(call).await;
    let bridge_id_for_channel = if matches!(outcome, DialOutcome::Answered) {
        Some(bridge_id)
    } else {
        None
    };
    ctx.attach_channel(ctx.channel.clone(), bridge_id_for_channel).await;

    let port = outcome_port(outcome);
    let mut vars = vec![
        ("dial_status", port.to_string()),
        ("from", caller_id),
        ("to", dest),
        ("channelId", ctx.channel.0.clone()),
        ("started", started_unix.to_string()),
    ];
    if let Some(ended_unix) = ended_unix {
        vars.push(("ended", ended_unix.to_string()));
    }
    ctx.publish_event_vars(vars).await;

    let resp = ctx.respond_via_port(port).await;
    send_response(respond, resp);
}
