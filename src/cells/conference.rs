//! `ConferenceModel` (spec §4.E, §6): joins (or creates, on a cache miss)
//! a named conference bridge keyed `<workspaceId>_<confName>` and adds
//! the current channel to it.
//!
//! Ground: `ConferenceCache` trait and cache key in `cache.rs`; on a
//! miss this crate creates the gateway bridge first and only then writes
//! the cache entry (SPEC_FULL.md §4.E.1), so a racing second lookup
//! either finds the entry or creates (and overwrites with) another
//! bridge rather than observing a half-written entry.

use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::cache::{cache_key, ConferenceCacheEntry};
use crate::gateway::BridgeId;
use crate::model::CellKind;

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let name = match &cell.kind {
        CellKind::Conference { name } => name.clone(),
        other => {
            warn!("conference handler dispatched for non-conference cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    let workspace_id = { ctx.flow.read().await.user.workspace.id };
    let key = cache_key(workspace_id, &name);

    let bridge_id = match ctx.conference_cache.get(&key).await {
        Ok(Some(entry)) => BridgeId(entry.bridge_id),
        Ok(None) => {
            let bridge_id = BridgeId(Uuid::new_v4().to_string());
            if let Err(e) = ctx.gateway.bridge_create(&bridge_id).await {
                warn!("failed to create conference bridge for {name}: {e}");
                ctx.publish_event_vars(vec![("conference_status", "failed".to_string())])
                    .await;
                let resp = ctx.respond_via_port("failed").await;
                send_response(respond, resp);
                return;
            }
            let entry = ConferenceCacheEntry {
                id: Uuid::new_v4(),
                bridge_id: bridge_id.0.clone(),
                user_info: serde_json::Value::Null,
            };
            if let Err(e) = ctx.conference_cache.set(&key, entry).await {
                warn!("failed to cache conference entry for {name}: {e}");
            }
            bridge_id
        }
        Err(e) => {
            warn!("conference cache lookup failed for {name}: {e}");
            ctx.publish_event_vars(vec![("conference_status", "failed".to_string())])
                .await;
            let resp = ctx.respond_via_port("failed").await;
            send_response(respond, resp);
            return;
        }
    };

    if let Err(e) = ctx.gateway.bridge_add_channel(&bridge_id, &ctx.channel).await {
        warn!("failed to add channel to conference {name}: {e}");
        ctx.publish_event_vars(vec![("conference_status", "failed".to_string())])
            .await;
        let resp = ctx.respond_via_port("failed").await;
        send_response(respond, resp);
        return;
    }
    ctx.attach_channel(ctx.channel.clone(), Some(bridge_id.clone())).await;

    ctx.publish_event_vars(vec![
        ("conference_status", "joined".to_string()),
        ("conference_name", name),
        ("bridgeId", bridge_id.0),
    ])
    .await;

    let resp = ctx.respond_via_port("default").await;
    send_response(respond, resp);
}
