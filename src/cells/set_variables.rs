//! `SetVariablesModel` (spec §4.E): writes its configured values into
//! `event_vars` so later cells can interpolate them, then takes its sole
//! outbound link.

use tokio::sync::oneshot;
use tracing::warn;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::model::CellKind;

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let values = match &cell.kind {
        CellKind::SetVariables { values } => values.clone(),
        other => {
            warn!("set_variables handler dispatched for non-set-variables cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    let vars: Vec<(&str, String)> = values
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), s.to_string())))
        .collect();
    ctx.publish_event_vars(vars).await;

    let resp = ctx.respond_via_port("default").await;
    send_response(respond, resp);
}
