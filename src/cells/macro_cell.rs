//! `MacroModel` (spec §4.E): locates a named macro in the flow's macro
//! library and executes it as a nested flow sharing the same channel; on
//! return, picks the after-macro link.
//!
//! Ground: `original_source/mngrs/flow.go`'s recursive tail-call
//! structure is mirrored here at a smaller scale — invoking a macro is
//! `Interpreter::run` re-entered against a fresh `Flow` built from the
//! macro's own cell/link tables, with `OnTerminal::Return` so the
//! macro's own terminal cell does not hang up the real channel.

use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::warn;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::interpreter::{Interpreter, OnTerminal};
use crate::model::{CellKind, Flow};

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let name = match &cell.kind {
        CellKind::Macro { name } => name.clone(),
        other => {
            warn!("macro handler dispatched for non-macro cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    let nested = {
        let flow = ctx.flow.read().await;
        match flow.macros.get(&name) {
            Some(mac) => Some(Flow::new(
                format!("{}/{}", flow.id, name),
                flow.user.clone(),
                mac.root_cell,
                mac.cells.clone(),
                mac.links.clone(),
                flow.gateway.clone(),
            )),
            None => None,
        }
    };

    let mut nested = match nested {
        Some(f) => f,
        None => {
            warn!("macro {name} not found in flow's macro library");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };
    nested.root_call = { ctx.flow.read().await.root_call.clone() };
    let nested_root = nested.root_cell;
    let nested_flow = Arc::new(RwLock::new(nested));

    let interpreter = Interpreter::new(
        ctx.gateway.clone(),
        ctx.api.clone(),
        ctx.conference_cache.clone(),
        ctx.config.clone(),
    );
    let macro_runner = { nested_flow.write().await.spawn_runner() };
    let channel = interpreter
        .run(nested_flow, ctx.channel.clone(), nested_root, macro_runner, OnTerminal::Return)
        .await;

    ctx.publish_event_vars(vec![("macro_name", name)]).await;

    let flow = ctx.flow.read().await;
    let next = flow.find_link(ctx.cell_id, "default").map(|l| l.target);
    drop(flow);
    send_response(respond, ManagerResponse { channel, next });
}
