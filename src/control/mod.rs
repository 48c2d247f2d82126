//! Control session against an obs-websocket 5.x server.
//!
//! One spawned task owns the socket. Callers talk to it through an unbounded
//! outbound queue and read state from a `watch` channel. Requests are
//! correlated by a uuid request id; every request hands back a [`Reply`]
//! future that resolves exactly once, with the response payload, the server's
//! rejection, or [`RequestError::SessionClosed`] when the session is torn down
//! first.

mod poller;
pub mod reducer;

pub use poller::ScreenshotPoller;

use crate::model::{ConnectionState, ControlState, ScreenshotTarget, Settings, settings_to_json};
use crate::protocol::{self, RequestOutcome, ServerMessage};
use futures::{Sink, SinkExt, Stream, StreamExt};
use reducer::{Command, Refresh, ResponseAction};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use uuid::Uuid;

/// Close code obs-websocket uses when the Identify token is wrong.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

/// Connection error reported when the server rejects the Identify token.
pub const AUTHENTICATION_FAILED: &str = "authentication failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    NotConnected,
    SessionClosed,
    Encoding(String),
    Rejected {
        code: Option<u16>,
        comment: Option<String>,
    },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "control session is not connected"),
            Self::SessionClosed => write!(f, "control session closed before a response arrived"),
            Self::Encoding(err) => write!(f, "request encoding failed: {err}"),
            Self::Rejected { code, comment } => write!(
                f,
                "request rejected (code {}): {}",
                code.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string()),
                comment.as_deref().unwrap_or("no comment")
            ),
        }
    }
}

impl std::error::Error for RequestError {}

/// Parameters for GetSourceScreenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotSpec {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub quality: i32,
}

impl Default for ScreenshotSpec {
    fn default() -> Self {
        Self {
            format: "jpeg".to_string(),
            width: 320,
            height: 180,
            quality: 60,
        }
    }
}

type ReplyResult = Result<Value, RequestError>;

/// Resolves with the response data of one request.
#[derive(Debug)]
pub struct Reply {
    rx: oneshot::Receiver<ReplyResult>,
}

impl Reply {
    fn failed(err: RequestError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }
}

impl Future for Reply {
    type Output = ReplyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(RequestError::SessionClosed)))
    }
}

struct Pending {
    action: Option<ResponseAction>,
    reply: oneshot::Sender<ReplyResult>,
}

struct Link {
    epoch: u64,
    tx: mpsc::UnboundedSender<Message>,
}

struct Inner {
    state: watch::Sender<ControlState>,
    // Lock order: link, then pending.
    link: Mutex<Option<Link>>,
    pending: Mutex<HashMap<String, Pending>>,
    epoch: AtomicU64,
    password: Mutex<String>,
    screenshot: ScreenshotSpec,
}

#[derive(Clone)]
pub struct ControlSession {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ControlSession {
    pub fn new(screenshot: ScreenshotSpec) -> Self {
        let (state, _) = watch::channel(ControlState::default());
        Self {
            inner: Arc::new(Inner {
                state,
                link: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
                password: Mutex::new(String::new()),
                screenshot,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> ControlState {
        self.inner.state.borrow().clone()
    }

    /// Drops any current connection and dials `ws://host:port`.
    pub fn connect(&self, host: &str, port: u16, password: &str) {
        let url = format!("ws://{host}:{port}");
        let (epoch, outbound) = self.open(password);
        tracing::info!(url = %url, "connecting to obs");

        let session = self.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws, _)) => session.run_link(epoch, ws, outbound).await,
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "obs connection failed");
                    session.finish(epoch, ConnectionState::Error(err.to_string()));
                }
            }
        });
    }

    /// Runs the session over an already-established websocket.
    #[cfg(test)]
    pub(crate) fn connect_over<S>(&self, ws: S, password: &str)
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    {
        let (epoch, outbound) = self.open(password);
        let session = self.clone();
        tokio::spawn(async move { session.run_link(epoch, ws, outbound).await });
    }

    pub fn disconnect(&self) {
        let mut link = lock(&self.inner.link);
        if link.is_none() && self.inner.state.borrow().connection == ConnectionState::Disconnected {
            return;
        }
        tracing::info!("disconnecting from obs");
        self.reset_locked(&mut link, ConnectionState::Disconnected);
    }

    fn open(&self, password: &str) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let mut link = lock(&self.inner.link);
        let epoch = self.reset_locked(&mut link, ConnectionState::Connecting);
        *lock(&self.inner.password) = password.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        *link = Some(Link { epoch, tx });
        (epoch, rx)
    }

    /// Called by the link task when its socket ends. Stale links are ignored.
    fn finish(&self, epoch: u64, next: ConnectionState) {
        let mut link = lock(&self.inner.link);
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        match &next {
            ConnectionState::Error(msg) => tracing::warn!(error = %msg, "obs session ended"),
            _ => tracing::info!("obs session closed"),
        }
        self.reset_locked(&mut link, next);
    }

    /// Drops the link (its task closes the socket once the queue sender is
    /// gone), rejects every pending request and replaces the state.
    fn reset_locked(&self, link: &mut Option<Link>, next: ConnectionState) -> u64 {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *link = None;

        let drained: Vec<Pending> = lock(&self.inner.pending).drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "rejecting pending requests");
        }
        for pending in drained {
            let _ = pending.reply.send(Err(RequestError::SessionClosed));
        }

        self.inner.state.send_modify(|state| {
            *state = ControlState {
                connection: next,
                generation: state.generation + 1,
                ..ControlState::default()
            };
        });
        epoch
    }

    async fn run_link<S>(self, epoch: u64, ws: S, mut outbound: mpsc::UnboundedReceiver<Message>)
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError>,
    {
        let (mut sink, mut stream) = ws.split();
        let outcome = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = self.handle_text(epoch, &text) {
                            if let Err(err) = sink.send(Message::Text(reply)).await {
                                break ConnectionState::Error(err.to_string());
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => break close_state(frame),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break ConnectionState::Error(err.to_string()),
                    None => break ConnectionState::Disconnected,
                },
                queued = outbound.recv() => match queued {
                    Some(message) => {
                        if let Err(err) = sink.send(message).await {
                            break ConnectionState::Error(err.to_string());
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                },
            }
        };
        self.finish(epoch, outcome);
    }

    /// Returns a frame to write straight back on the socket, if any.
    fn handle_text(&self, epoch: u64, text: &str) -> Option<String> {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            return None;
        }
        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, "dropping undecodable obs frame");
                return None;
            }
        };

        match message {
            ServerMessage::Hello { authentication } => {
                let password = lock(&self.inner.password).clone();
                let token = match &authentication {
                    Some(auth) if !password.is_empty() => {
                        Some(protocol::compute_auth(&password, &auth.challenge, &auth.salt))
                    }
                    Some(_) => {
                        tracing::warn!("obs requires a password but none is configured");
                        None
                    }
                    None => None,
                };
                match protocol::encode_identify(token.as_deref()) {
                    Ok(frame) => Some(frame),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode identify");
                        None
                    }
                }
            }
            ServerMessage::Identified => {
                if self
                    .update(epoch, |state| state.connection = ConnectionState::Connected)
                    .is_some()
                {
                    tracing::info!("obs session identified");
                    self.bootstrap();
                }
                None
            }
            ServerMessage::Event {
                event_type,
                event_data,
            } => {
                let follow_up = self
                    .update(epoch, |state| reducer::apply_event(state, &event_type, &event_data))
                    .unwrap_or_default();
                self.issue(follow_up);
                None
            }
            ServerMessage::Response(outcome) => {
                self.complete(epoch, outcome);
                None
            }
        }
    }

    fn complete(&self, epoch: u64, outcome: RequestOutcome) {
        let Some(pending) = lock(&self.inner.pending).remove(&outcome.request_id) else {
            tracing::debug!(request_id = %outcome.request_id, "response for unknown request");
            return;
        };

        if !outcome.success {
            tracing::debug!(
                request_id = %outcome.request_id,
                code = ?outcome.code,
                comment = ?outcome.comment,
                "obs rejected request"
            );
            let _ = pending.reply.send(Err(RequestError::Rejected {
                code: outcome.code,
                comment: outcome.comment,
            }));
            return;
        }

        if let Some(action) = &pending.action {
            let follow_up = self
                .update(epoch, |state| reducer::apply_response(state, action, &outcome.data))
                .unwrap_or_default();
            self.issue(follow_up);
        }
        let _ = pending.reply.send(Ok(outcome.data));
    }

    /// Mutates the state if `epoch` is still the live link.
    fn update<R>(&self, epoch: u64, f: impl FnOnce(&mut ControlState) -> R) -> Option<R> {
        let _link = lock(&self.inner.link);
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            return None;
        }
        let mut out = None;
        self.inner.state.send_modify(|state| out = Some(f(state)));
        out
    }

    fn bootstrap(&self) {
        self.fetch_scene_list();
        self.fetch_input_list();
        self.fetch_stream_status();
        self.fetch_record_status();
        self.fetch_studio_mode();
    }

    fn issue(&self, follow_up: Vec<Refresh>) {
        for refresh in follow_up {
            match refresh {
                Refresh::SceneList => {
                    self.fetch_scene_list();
                }
                Refresh::InputAudio(input) => {
                    self.refresh_input_audio(&input);
                }
                Refresh::PreviewScene => {
                    self.fetch_preview_scene();
                }
                Refresh::SceneItems(scene) => {
                    self.dispatch(
                        None,
                        "GetSceneItemList",
                        Some(json!({ "sceneName": scene })),
                        Some(ResponseAction::SceneItems(scene)),
                    );
                }
                Refresh::GroupItems(group) => {
                    self.fetch_group_items(&group);
                }
                Refresh::Filters(source) => {
                    self.dispatch(
                        None,
                        "GetSourceFilterList",
                        Some(json!({ "sourceName": source })),
                        Some(ResponseAction::Filters(source)),
                    );
                }
            }
        }
    }

    /// Applies `command` to the state and queues the request, both under the
    /// link lock so a concurrent teardown sees either all of it or none.
    fn dispatch(
        &self,
        command: Option<Command>,
        request_type: &str,
        data: Option<Value>,
        action: Option<ResponseAction>,
    ) -> Reply {
        let link = lock(&self.inner.link);
        let Some(live) = link.as_ref() else {
            return Reply::failed(RequestError::NotConnected);
        };
        if !self.inner.state.borrow().connection.is_connected() {
            return Reply::failed(RequestError::NotConnected);
        }

        let request_id = Uuid::new_v4().to_string();
        let frame = match protocol::encode_request(request_type, &request_id, data.as_ref()) {
            Ok(frame) => frame,
            Err(err) => return Reply::failed(RequestError::Encoding(err.to_string())),
        };

        if let Some(command) = &command {
            self.inner
                .state
                .send_modify(|state| reducer::apply_command(state, command));
        }

        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(request_id.clone(), Pending { action, reply: tx });
        if live.tx.send(Message::Text(frame)).is_err() {
            if let Some(pending) = lock(&self.inner.pending).remove(&request_id) {
                let _ = pending.reply.send(Err(RequestError::SessionClosed));
            }
        }
        tracing::debug!(request_type = %request_type, request_id = %request_id, epoch = live.epoch, "request queued");
        Reply { rx }
    }

    pub fn call(&self, request_type: &str, data: Option<Value>) -> Reply {
        self.dispatch(None, request_type, data, None)
    }

    // Scenes

    pub fn fetch_scene_list(&self) -> Reply {
        self.dispatch(None, "GetSceneList", None, Some(ResponseAction::SceneList))
    }

    pub fn create_scene(&self, scene: &str) -> Reply {
        self.call("CreateScene", Some(json!({ "sceneName": scene })))
    }

    pub fn set_current_scene(&self, scene: &str) -> Reply {
        self.dispatch(
            Some(Command::SetCurrentScene(scene.to_string())),
            "SetCurrentProgramScene",
            Some(json!({ "sceneName": scene })),
            None,
        )
    }

    /// Studio mode selects into preview, otherwise straight to program.
    pub fn select_scene(&self, scene: &str) -> Reply {
        if self.inner.state.borrow().studio_mode_enabled {
            self.set_preview_scene(scene)
        } else {
            self.set_current_scene(scene)
        }
    }

    // Studio mode

    pub fn fetch_studio_mode(&self) -> Reply {
        self.dispatch(None, "GetStudioModeEnabled", None, Some(ResponseAction::StudioMode))
    }

    pub fn set_studio_mode_enabled(&self, enabled: bool) -> Reply {
        self.dispatch(
            Some(Command::SetStudioMode(enabled)),
            "SetStudioModeEnabled",
            Some(json!({ "studioModeEnabled": enabled })),
            None,
        )
    }

    pub fn toggle_studio_mode(&self) -> Reply {
        let enabled = self.inner.state.borrow().studio_mode_enabled;
        self.set_studio_mode_enabled(!enabled)
    }

    pub fn fetch_preview_scene(&self) -> Reply {
        self.dispatch(None, "GetCurrentPreviewScene", None, Some(ResponseAction::PreviewScene))
    }

    pub fn set_preview_scene(&self, scene: &str) -> Reply {
        self.dispatch(
            Some(Command::SetPreviewScene(scene.to_string())),
            "SetCurrentPreviewScene",
            Some(json!({ "sceneName": scene })),
            None,
        )
    }

    pub fn trigger_transition(&self) -> Reply {
        self.call("TriggerStudioModeTransition", None)
    }

    /// Puts the preview scene on program without a transition. `None` when no
    /// preview scene is known.
    pub fn cut_to_preview(&self) -> Option<Reply> {
        let preview = self.inner.state.borrow().preview_scene.clone();
        if preview.is_empty() {
            return None;
        }
        Some(self.set_current_scene(&preview))
    }

    // Outputs

    pub fn fetch_stream_status(&self) -> Reply {
        self.dispatch(None, "GetStreamStatus", None, Some(ResponseAction::StreamStatus))
    }

    pub fn start_stream(&self) -> Reply {
        self.call("StartStream", None)
    }

    pub fn stop_stream(&self) -> Reply {
        self.call("StopStream", None)
    }

    pub fn toggle_stream(&self) -> Reply {
        if self.inner.state.borrow().stream_active {
            self.stop_stream()
        } else {
            self.start_stream()
        }
    }

    pub fn fetch_record_status(&self) -> Reply {
        self.dispatch(None, "GetRecordStatus", None, Some(ResponseAction::RecordStatus))
    }

    pub fn start_record(&self) -> Reply {
        self.call("StartRecord", None)
    }

    pub fn stop_record(&self) -> Reply {
        self.call("StopRecord", None)
    }

    pub fn toggle_record(&self) -> Reply {
        if self.inner.state.borrow().record_active {
            self.stop_record()
        } else {
            self.start_record()
        }
    }

    // Screenshots

    pub fn fetch_screenshot(&self, source: &str, target: ScreenshotTarget) -> Reply {
        let spec = &self.inner.screenshot;
        self.dispatch(
            None,
            "GetSourceScreenshot",
            Some(json!({
                "sourceName": source,
                "imageFormat": spec.format,
                "imageWidth": spec.width,
                "imageHeight": spec.height,
                "imageCompressionQuality": spec.quality,
            })),
            Some(ResponseAction::Screenshot(target)),
        )
    }

    // Scene items

    /// Scopes the item list to `scene`, clearing whatever was shown before.
    pub fn fetch_scene_items(&self, scene: &str) -> Reply {
        self.dispatch(
            Some(Command::ScopeSceneItems(scene.to_string())),
            "GetSceneItemList",
            Some(json!({ "sceneName": scene })),
            Some(ResponseAction::SceneItems(scene.to_string())),
        )
    }

    pub fn set_scene_item_enabled(&self, scene: &str, item_id: i64, enabled: bool) -> Reply {
        self.dispatch(
            Some(Command::SetSceneItemEnabled {
                scene: scene.to_string(),
                item_id,
                enabled,
            }),
            "SetSceneItemEnabled",
            Some(json!({
                "sceneName": scene,
                "sceneItemId": item_id,
                "sceneItemEnabled": enabled,
            })),
            None,
        )
    }

    pub fn remove_scene_item(&self, scene: &str, item_id: i64) -> Reply {
        self.call(
            "RemoveSceneItem",
            Some(json!({ "sceneName": scene, "sceneItemId": item_id })),
        )
    }

    /// `ui_index` is a position in the top-down list of `scene`. When another
    /// scene's items are loaded, `scene` is fetched first so the server index
    /// is computed against its real item count.
    pub fn reorder_scene_item(&self, scene: &str, item_id: i64, ui_index: usize) -> Reply {
        if self.inner.state.borrow().scene_items_scene == scene {
            return self.move_loaded_scene_item(scene, item_id, ui_index);
        }

        let listing = self.fetch_scene_items(scene);
        let (tx, rx) = oneshot::channel();
        let session = self.clone();
        let scene = scene.to_string();
        tokio::spawn(async move {
            let result = match listing.await {
                Ok(_) => session.move_loaded_scene_item(&scene, item_id, ui_index).await,
                Err(err) => Err(err),
            };
            let _ = tx.send(result);
        });
        Reply { rx }
    }

    fn move_loaded_scene_item(&self, scene: &str, item_id: i64, ui_index: usize) -> Reply {
        let count = {
            let state = self.inner.state.borrow();
            if state.scene_items_scene != scene {
                return Reply::failed(RequestError::Rejected {
                    code: None,
                    comment: Some(format!("scene items of {scene} are not loaded")),
                });
            }
            state.scene_items.len()
        };
        let server_index = reducer::to_server_index(ui_index, count);
        self.dispatch(
            Some(Command::MoveSceneItem {
                scene: scene.to_string(),
                item_id,
                ui_index,
            }),
            "SetSceneItemIndex",
            Some(json!({
                "sceneName": scene,
                "sceneItemId": item_id,
                "sceneItemIndex": server_index,
            })),
            None,
        )
    }

    // Groups

    pub fn fetch_group_items(&self, group: &str) -> Reply {
        self.dispatch(
            None,
            "GetGroupSceneItemList",
            Some(json!({ "sceneName": group })),
            Some(ResponseAction::GroupItems(group.to_string())),
        )
    }

    pub fn set_group_item_enabled(&self, group: &str, item_id: i64, enabled: bool) -> Reply {
        self.dispatch(
            Some(Command::SetGroupItemEnabled {
                group: group.to_string(),
                item_id,
                enabled,
            }),
            "SetSceneItemEnabled",
            Some(json!({
                "sceneName": group,
                "sceneItemId": item_id,
                "sceneItemEnabled": enabled,
            })),
            None,
        )
    }

    pub fn remove_group_item(&self, group: &str, item_id: i64) -> Reply {
        self.dispatch(
            None,
            "RemoveSceneItem",
            Some(json!({ "sceneName": group, "sceneItemId": item_id })),
            Some(ResponseAction::GroupItemRemoved {
                group: group.to_string(),
                item_id,
            }),
        )
    }

    // Inputs

    pub fn fetch_input_list(&self) -> Reply {
        self.dispatch(None, "GetInputList", None, Some(ResponseAction::InputList))
    }

    /// Returns the volume and mute replies, in that order.
    pub fn refresh_input_audio(&self, input: &str) -> [Reply; 2] {
        [
            self.dispatch(
                None,
                "GetInputVolume",
                Some(json!({ "inputName": input })),
                Some(ResponseAction::InputVolume(input.to_string())),
            ),
            self.dispatch(
                None,
                "GetInputMute",
                Some(json!({ "inputName": input })),
                Some(ResponseAction::InputMute(input.to_string())),
            ),
        ]
    }

    pub fn toggle_mute(&self, input: &str) -> Reply {
        self.dispatch(
            Some(Command::ToggleMute(input.to_string())),
            "ToggleInputMute",
            Some(json!({ "inputName": input })),
            None,
        )
    }

    pub fn set_volume(&self, input: &str, volume_db: f64) -> Reply {
        self.dispatch(
            Some(Command::SetVolume {
                input: input.to_string(),
                volume_db,
            }),
            "SetInputVolume",
            Some(json!({ "inputName": input, "inputVolumeDb": volume_db })),
            None,
        )
    }

    pub fn create_input(&self, scene: &str, input: &str, kind: &str) -> Reply {
        self.call(
            "CreateInput",
            Some(json!({
                "sceneName": scene,
                "inputName": input,
                "inputKind": kind,
                "inputSettings": {},
                "sceneItemEnabled": true,
            })),
        )
    }

    pub fn fetch_input_settings(&self, input: &str) -> Reply {
        self.dispatch(
            Some(Command::ScopeInputSettings(input.to_string())),
            "GetInputSettings",
            Some(json!({ "inputName": input })),
            Some(ResponseAction::InputSettings(input.to_string())),
        )
    }

    pub fn set_input_settings(&self, input: &str, settings: Settings) -> Reply {
        let payload = settings_to_json(&settings);
        self.dispatch(
            Some(Command::MergeInputSettings {
                input: input.to_string(),
                settings,
            }),
            "SetInputSettings",
            Some(json!({ "inputName": input, "inputSettings": payload, "overlay": true })),
            None,
        )
    }

    // Filters

    pub fn fetch_filters(&self, source: &str) -> Reply {
        self.dispatch(
            Some(Command::ScopeFilters(source.to_string())),
            "GetSourceFilterList",
            Some(json!({ "sourceName": source })),
            Some(ResponseAction::Filters(source.to_string())),
        )
    }

    pub fn create_filter(&self, source: &str, filter: &str, kind: &str) -> Reply {
        self.dispatch(
            None,
            "CreateSourceFilter",
            Some(json!({
                "sourceName": source,
                "filterName": filter,
                "filterKind": kind,
                "filterSettings": {},
            })),
            Some(ResponseAction::FilterCreated(source.to_string())),
        )
    }

    pub fn remove_filter(&self, source: &str, filter: &str) -> Reply {
        self.dispatch(
            None,
            "RemoveSourceFilter",
            Some(json!({ "sourceName": source, "filterName": filter })),
            Some(ResponseAction::FilterRemoved {
                source: source.to_string(),
                filter: filter.to_string(),
            }),
        )
    }

    pub fn set_filter_enabled(&self, source: &str, filter: &str, enabled: bool) -> Reply {
        self.dispatch(
            Some(Command::SetFilterEnabled {
                source: source.to_string(),
                filter: filter.to_string(),
                enabled,
            }),
            "SetSourceFilterEnabled",
            Some(json!({
                "sourceName": source,
                "filterName": filter,
                "filterEnabled": enabled,
            })),
            None,
        )
    }

    pub fn set_filter_settings(&self, source: &str, filter: &str, settings: Settings) -> Reply {
        let payload = settings_to_json(&settings);
        self.dispatch(
            Some(Command::MergeFilterSettings {
                source: source.to_string(),
                filter: filter.to_string(),
                settings,
            }),
            "SetSourceFilterSettings",
            Some(json!({
                "sourceName": source,
                "filterName": filter,
                "filterSettings": payload,
                "overlay": true,
            })),
            None,
        )
    }

    /// Filter order is not reversed, `index` goes to the server as is.
    pub fn reorder_filter(&self, source: &str, filter: &str, index: usize) -> Reply {
        self.dispatch(
            Some(Command::MoveFilter {
                source: source.to_string(),
                filter: filter.to_string(),
                index,
            }),
            "SetSourceFilterIndex",
            Some(json!({
                "sourceName": source,
                "filterName": filter,
                "filterIndex": index,
            })),
            None,
        )
    }
}

fn close_state(frame: Option<CloseFrame<'_>>) -> ConnectionState {
    match frame {
        Some(frame) if u16::from(frame.code) == CLOSE_AUTHENTICATION_FAILED => {
            ConnectionState::Error(AUTHENTICATION_FAILED.to_string())
        }
        _ => ConnectionState::Disconnected,
    }
}
