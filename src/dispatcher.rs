//! Stasis Dispatcher (spec §4.H): the main loop that subscribes to the
//! gateway's bus-wide `StasisStart` stream and classifies each event by
//! `args[0]` into one of the entry paths in spec.md's dispatcher table.
//!
//! Ground: `original_source/main.go` `main`'s subscribe-loop and
//! `startExecution`'s `switch action`; `processIncomingCall`'s three
//! concurrent listeners (DTMF, channel lifecycle, flow interpreter) are
//! reproduced as three `tokio::spawn`s from `handle_incoming_call`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api_client::ApiClient;
use crate::cache::ConferenceCache;
use crate::cells::SharedFlow;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::flow_builder;
use crate::gateway::{ChannelId, GatewayClient, GatewayEvent};
use crate::interpreter::Interpreter;
use crate::model::{CallParams, CallStatus, Direction, User};
use crate::supervisor::{self, EnsureBridgeRequest};

pub struct Dispatcher {
    gateway: Arc<dyn GatewayClient>,
    api: Arc<ApiClient>,
    conference_cache: Arc<dyn ConferenceCache>,
    config: Arc<EngineConfig>,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn GatewayClient>,
        api: Arc<ApiClient>,
        conference_cache: Arc<dyn ConferenceCache>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            gateway,
            api,
            conference_cache,
            config,
        }
    }

    fn interpreter(&self) -> Interpreter {
        Interpreter::new(
            self.gateway.clone(),
            self.api.clone(),
            self.conference_cache.clone(),
            self.config.clone(),
        )
    }

    /// Main loop (spec §4.H): runs until the bus subscription closes or
    /// cancellation is observed, spawning one dispatch task per
    /// `StasisStart` (mirroring the Go original's `go startExecution(...)`
    /// per event).
    pub async fn run(&self, shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
        let mut sub = self.gateway.subscribe_stasis_start().await?;
        info!("listening for new calls");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                event = sub.recv() => {
                    match event {
                        Some(GatewayEvent::StasisStart { channel_id, args }) => {
                            let dispatcher = self.clone_shared();
                            tokio::spawn(async move {
                                dispatcher.dispatch(channel_id, args).await;
                            });
                        }
                        Some(_) => continue,
                        None => {
                            warn!("StasisStart subscription closed, exiting dispatcher loop");
                            return Ok(());
                        }
                    }
                }
                _ = &mut shutdown => {
                    debug!("dispatcher received shutdown signal");
                    sub.cancel();
                    return Ok(());
                }
            }
        }
    }

    fn clone_shared(&self) -> Arc<Self> {
        Arc::new(Self {
            gateway: self.gateway.clone(),
            api: self.api.clone(),
            conference_cache: self.conference_cache.clone(),
            config: self.config.clone(),
        })
    }

    /// Classifies one `StasisStart` by `args[0]` (spec §4.H table).
    async fn dispatch(self: Arc<Self>, channel: ChannelId, args: Vec<String>) {
        let action = args.first().cloned().unwrap_or_default();
        debug!(%channel, action = %action, "received stasis start action");

        match action.as_str() {
            "h" | "DID_DIAL" | "DID_DIAL_2" => {
                debug!(%channel, action = %action, "re-entry action, not processing");
            }
            "INCOMING_CALL" => {
                let exten = args.get(1).cloned().unwrap_or_default();
                let caller_id = args.get(2).cloned().unwrap_or_default();
                self.handle_incoming_call(channel, exten, caller_id).await;
            }
            "INCOMING_SIP_TRUNK" => {
                let exten = args.get(1).cloned().unwrap_or_default();
                let caller_id = args.get(2).cloned().unwrap_or_default();
                let trunk_addr = args.get(3).cloned().unwrap_or_default();
                self.handle_incoming_sip_trunk(channel, exten, caller_id, trunk_addr).await;
            }
            "OUTGOING_PROXY_ENDPOINT" => {
                let exten = args.get(1).cloned().unwrap_or_default();
                let caller_id = args.get(2).cloned().unwrap_or_default();
                let domain = args.get(3).cloned().unwrap_or_default();
                self.handle_outgoing_proxy(channel, exten, caller_id, domain, "extension").await;
            }
            "OUTGOING_PROXY" => {
                let exten = args.get(1).cloned().unwrap_or_default();
                let caller_id = args.get(2).cloned().unwrap_or_default();
                let domain = args.get(3).cloned().unwrap_or_default();
                self.handle_outgoing_proxy(channel, exten, caller_id, domain, "pstn").await;
            }
            "OUTGOING_TRUNK_CALL" => {
                let exten = args.get(1).cloned().unwrap_or_default();
                let caller_id = args.get(2).cloned().unwrap_or_default();
                let trunk_source_ip = args.get(3).cloned().unwrap_or_default();
                self.handle_outgoing_trunk_call(channel, exten, caller_id, trunk_source_ip).await;
            }
            "OUTGOING_PROXY_MEDIA" => {
                debug!(%channel, "media-service hop, no-op");
            }
            other => {
                info!(%channel, action = %other, "unknown call type, skipping");
            }
        }
    }

    /// `INCOMING_CALL` (spec §4.H): answers, fetches the DID's flow JSON
    /// and macros, applies the free-trial gate, builds the `Flow`, and
    /// spawns `processIncomingCall`'s three listeners.
    async fn handle_incoming_call(&self, channel: ChannelId, exten: String, caller_id: String) {
        let did_data = match self.api.get_did_number_data(&exten).await {
            Ok(d) => d,
            Err(e) => {
                warn!("getDIDNumberData failed for {exten}: {e}");
                return;
            }
        };

        if check_free_trial(&did_data.plan) {
            warn!(%exten, "ending call: free trial ended");
            let _ = self.gateway.channel_safe_hangup(&channel).await;
            return;
        }

        let macros_json = match self.api.get_workspace_macros(did_data.workspace_id).await {
            Ok(m) => m,
            Err(e) => {
                warn!("getWorkspaceMacros failed: {e}");
                return;
            }
        };
        let macros = match flow_builder::build_macros(&macros_json) {
            Ok(m) => m,
            Err(e) => {
                warn!("failed to build macro library: {e}");
                HashMap::new()
            }
        };

        let user = User::new(did_data.user_id, did_data.workspace_id, did_data.workspace_name.clone());
        let mut flow = match flow_builder::build_flow(
            format!("did:{exten}"),
            user.clone(),
            &did_data.flow,
            self.gateway.clone(),
        ) {
            Ok(f) => f,
            Err(e) => {
                warn!("failed to build flow for {exten}: {e}");
                let _ = self.gateway.channel_safe_hangup(&channel).await;
                return;
            }
        };
        flow.macros = macros;
        let root_cell = flow.root_cell;
        let shared_flow: SharedFlow = Arc::new(RwLock::new(flow));

        if let Err(e) = self.gateway.channel_answer(&channel).await {
            warn!("failed to answer incoming call: {e}");
            return;
        }
        info!(%exten, %caller_id, "processing incoming call");

        self.process_incoming_call(shared_flow, channel, exten, caller_id, user, root_cell)
            .await;
    }

    /// `processIncomingCall` (spec §4.H): registers the call with the
    /// management API, spawns the DTMF listener and channel-lifecycle
    /// listener, and starts the interpreter at `flow.cells[0]`.
    async fn process_incoming_call(
        &self,
        flow: SharedFlow,
        channel: ChannelId,
        exten: String,
        caller_id: String,
        user: User,
        root_cell: crate::model::CellId,
    ) {
        let params = CallParams {
            from: caller_id,
            to: exten,
            status: CallStatus::Start,
            direction: Direction::Inbound,
            user_id: user.id,
            workspace_id: user.workspace.id,
            channel_id: channel.0.clone(),
        };
        let call_id = match self.api.create_call(&params).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("createCall failed: {e}");
                None
            }
        };
        if let Some(call_id) = call_id {
            let started = chrono::Utc::now();
            let call = crate::model::Call::new(call_id, channel.0.clone(), params, started);
            flow.write().await.root_call = Some(call);
        }

        let gateway = self.gateway.clone();
        let dtmf_channel = channel.clone();
        tokio::spawn(async move {
            attach_dtmf_listener(gateway, dtmf_channel).await;
        });

        let gateway = self.gateway.clone();
        let api = self.api.clone();
        let lifecycle_channel = channel.clone();
        let lifecycle_flow = flow.clone();
        tokio::spawn(async move {
            attach_channel_lifecycle_listener(gateway, api, lifecycle_channel, lifecycle_flow).await;
        });

        self.interpreter().process_flow(flow, channel, root_cell);
    }

    /// `INCOMING_SIP_TRUNK` (spec §4.H): answers, looks up the user by
    /// DID, then runs `ProcessSIPTrunkCall`.
    async fn handle_incoming_sip_trunk(
        &self,
        channel: ChannelId,
        exten: String,
        caller_id: String,
        trunk_addr: String,
    ) {
        if let Err(e) = self.gateway.channel_answer(&channel).await {
            warn!("failed to answer SIP trunk call: {e}");
            return;
        }
        let record = match self.api.get_user_by_did(&exten).await {
            Ok(r) => r,
            Err(e) => {
                warn!("getUserByDID failed for {exten}: {e}");
                return;
            }
        };
        let user = User::new(record.user_id, record.workspace_id, record.workspace_name);
        let proxy_host = self.config.proxy_host.clone().unwrap_or_default();
        let lineblocs_key = self.config.lineblocs_key.clone().unwrap_or_default();

        let req = EnsureBridgeRequest::sip_trunk(
            &user,
            &channel,
            &caller_id,
            &exten,
            &trunk_addr,
            &proxy_host,
            &lineblocs_key,
        );
        if let Err(e) = supervisor::ensure_bridge(&self.gateway, &self.api, req).await {
            warn!("ProcessSIPTrunkCall failed: {e}");
        }
    }

    /// `OUTGOING_PROXY_ENDPOINT`/`OUTGOING_PROXY` (spec §4.H): resolves
    /// the calling user by domain, resolves caller id for the PSTN
    /// variant, answers, and runs `EnsureBridge`.
    async fn handle_outgoing_proxy(
        &self,
        channel: ChannelId,
        exten: String,
        caller_id: String,
        domain: String,
        call_type: &'static str,
    ) {
        let record = match self.api.get_user_by_domain(&domain).await {
            Ok(r) => r,
            Err(e) => {
                warn!("getUserByDomain failed for {domain}: {e}");
                return;
            }
        };
        let user = User::new(record.user_id, record.workspace_id, record.workspace_name);

        let resolved_caller_id = if call_type == "pstn" {
            match self.api.get_caller_id(user.workspace.id, &caller_id).await {
                Ok(id) => id,
                Err(e) => {
                    warn!("getCallerId failed: {e}");
                    return;
                }
            }
        } else {
            caller_id
        };

        if let Err(e) = self.gateway.channel_answer(&channel).await {
            warn!("failed to answer outgoing proxy call: {e}");
            return;
        }

        let proxy_host = self.config.proxy_host.clone().unwrap_or_default();
        let lineblocs_key = self.config.lineblocs_key.clone().unwrap_or_default();
        let req = EnsureBridgeRequest::bridge(
            &user,
            &channel,
            &resolved_caller_id,
            &exten,
            call_type,
            Vec::new(),
            &proxy_host,
            &lineblocs_key,
        );
        if let Err(e) = supervisor::ensure_bridge(&self.gateway, &self.api, req).await {
            warn!("EnsureBridge failed for {exten}: {e}");
        }
    }

    /// `OUTGOING_TRUNK_CALL` (spec §4.H): resolves the user by trunk
    /// source IP, answers, and runs `EnsureBridge` with the trunk-calling
    /// extra header.
    async fn handle_outgoing_trunk_call(
        &self,
        channel: ChannelId,
        exten: String,
        caller_id: String,
        trunk_source_ip: String,
    ) {
        let record = match self.api.get_user_by_trunk_source_ip(&trunk_source_ip).await {
            Ok(r) => r,
            Err(e) => {
                warn!("getUserByTrunkSourceIp failed for {trunk_source_ip}: {e}");
                return;
            }
        };
        let user = User::new(record.user_id, record.workspace_id, record.workspace_name);

        if let Err(e) = self.gateway.channel_answer(&channel).await {
            warn!("failed to answer outgoing trunk call: {e}");
            return;
        }

        let proxy_host = self.config.proxy_host.clone().unwrap_or_default();
        let lineblocs_key = self.config.lineblocs_key.clone().unwrap_or_default();
        let extra_headers = vec![(
            "X-Lineblocs-User-SIP-Trunk-Calling-PSTN".to_string(),
            "true".to_string(),
        )];
        let req = EnsureBridgeRequest::bridge(
            &user,
            &channel,
            &caller_id,
            &exten,
            "pstn",
            extra_headers,
            &proxy_host,
            &lineblocs_key,
        );
        if let Err(e) = supervisor::ensure_bridge(&self.gateway, &self.api, req).await {
            warn!("EnsureBridge failed for {exten}: {e}");
        }
    }
}

/// Spec §8 scenario 5 / §4.H.1: a DID whose plan has expired ends the
/// call immediately, without ever constructing a flow.
fn check_free_trial(plan: &str) -> bool {
    plan == "expired"
}


/// DTMF listener (ground: `original_source/main.go` `attachDTMFListeners`):
/// observes digits on the root channel for diagnostic purposes; cell-level
/// DTMF collection (`ProcessInputModel`) subscribes independently.
async fn attach_dtmf_listener(gateway: Arc<dyn GatewayClient>, channel: ChannelId) {
    let mut sub = match gateway.subscribe(&channel.0, &["ChannelDtmfReceived"]).await {
        Ok(s) => s,
        Err(e) => {
            warn!("DTMF listener failed to subscribe: {e}");
            return;
        }
    };
    while let Some(event) = sub.recv().await {
        if let GatewayEvent::ChannelDtmfReceived { digit, .. } = event {
            debug!(%digit, "root channel observed DTMF digit");
        }
    }
}

/// Channel-lifecycle listener (ground: `original_source/main.go`
/// `attachChannelLifeCycleListeners`): on `StasisEnd`, marks the call
/// `ended` on the management API.
async fn attach_channel_lifecycle_listener(
    gateway: Arc<dyn GatewayClient>,
    api: Arc<ApiClient>,
    channel: ChannelId,
    flow: SharedFlow,
) {
    let mut sub = match gateway.subscribe(&channel.0, &["StasisEnd"]).await {
        Ok(s) => s,
        Err(e) => {
            warn!("lifecycle listener failed to subscribe: {e}");
            return;
        }
    };
    while let Some(event) = sub.recv().await {
        if let GatewayEvent::StasisEnd { .. } = event {
            debug!("received stasis end event");
            let call_id = {
                let mut flow_guard = flow.write().await;
                if let Some(call) = flow_guard.root_call.as_mut() {
                    call.mark_ended(chrono::Utc::now());
                }
                flow_guard.root_call.as_ref().map(|c| c.call_id)
            };
            if let Some(call_id) = call_id {
                if let Err(e) = api.update_call(call_id, "ended", "0.0.0.0").await {
                    warn!("updateCall(ended) failed: {e}");
                }
                let user_id = { flow.read().await.user.id };
                api.record_call_debit(user_id, call_id, "incoming");
            }
            break;
        }
    }
}
