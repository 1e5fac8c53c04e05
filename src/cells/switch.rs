//! `SwitchModel` (spec §4.E): evaluates an already-interpolated condition
//! value and routes to the outbound port matching the case, falling back
//! to `default` when no case matches.

use tokio::sync::oneshot;
use tracing::warn;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::model::CellKind;

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let (on, cases) = match &cell.kind {
        CellKind::Switch { on, cases } => (on.clone(), cases.clone()),
        other => {
            warn!("switch handler dispatched for non-switch cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    // `on` is the already-interpolated field name; `cell.data` holds its
    // resolved value post-interpolation.
    let value = cell
        .data
        .get(&on)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let port = cases
        .iter()
        .find(|(case_value, _)| case_value == &value)
        .map(|(_, port)| port.clone())
        .unwrap_or_else(|| "default".to_string());

    let resp = ctx.respond_via_port(&port).await;
    send_response(respond, resp);
}
