//! `RecordVoicemailModel` (spec §4.E): initiates a live recording on the
//! current channel; the storage id this crate mints is reported to the
//! management API, then the cell takes its sole outbound link.
//!
//! Ground: `original_source/mngrs/record_voicemail.go`
//! `RecordVoicemailManager.StartProcessing` (reads `data["trim"]`, calls
//! `helpers.NewRecording(...).InitiateRecordingForChannel`) and
//! `helpers/record.go` `Record.createAPIResource`/
//! `InitiateRecordingForChannel` (mints a UUID storage id client-side,
//! posts it to `/recording/createRecording` before ever touching the
//! gateway, then starts the live recording keyed by that same id).

use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use super::{send_response, HandlerContext, ManagerResponse};
use crate::gateway::RecordingOptions;
use crate::model::CellKind;

pub async fn run(ctx: HandlerContext, respond: oneshot::Sender<ManagerResponse>) {
    let cell = ctx.cell_snapshot().await;
    let trim = match &cell.kind {
        CellKind::RecordVoicemail { trim } => *trim,
        other => {
            warn!("record_voicemail handler dispatched for non-record-voicemail cell {other:?}");
            send_response(respond, ctx.respond_terminal());
            return;
        }
    };

    let (user_id, workspace_id, call_id) = {
        let flow = ctx.flow.read().await;
        (
            flow.user.id,
            flow.user.workspace.id,
            flow.root_call.as_ref().map(|c| c.call_id),
        )
    };

    // Storage id is minted client-side, matching the Go original: the
    // recording is registered with the management API under this id
    // before the gateway recording is ever started.
    let storage_id = Uuid::new_v4().to_string();
    if let Err(e) = ctx
        .api
        .create_recording(user_id, call_id, &storage_id, "voicemail", workspace_id, trim)
        .await
    {
        warn!("failed to register voicemail recording: {e}");
        ctx.publish_event_vars(vec![("recording_status", "failed".to_string())]).await;
        let resp = ctx.respond_via_port("failed").await;
        send_response(respond, resp);
        return;
    }

    let opts = RecordingOptions {
        format: "wav".to_string(),
    };
    if let Err(e) = ctx.gateway.channel_record(&ctx.channel, &storage_id, &opts).await {
        warn!("failed to start voicemail recording on channel: {e}");
        ctx.publish_event_vars(vec![("recording_status", "failed".to_string())]).await;
        let resp = ctx.respond_via_port("failed").await;
        send_response(respond, resp);
        return;
    }

    ctx.attach_channel(ctx.channel.clone(), None).await;
    ctx.publish_event_vars(vec![
        ("recording_status", "started".to_string()),
        ("storageId", storage_id),
    ])
    .await;

    let resp = ctx.respond_via_port("default").await;
    send_response(respond, resp);
}
