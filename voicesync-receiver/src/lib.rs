use std::{
    io,
    sync::{Arc, Mutex, atomic::Ordering},
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};
use voicesync_core::{
    ACK_BODY, ClipboardHistoryItem, DecodedBody, HistoryStore, MAX_CLIPBOARD_HISTORY, SYNC_PATH,
    validate_content,
};

pub mod injector;
pub mod platform;

use injector::{
    InjectionQueue, InjectorSettings, InputBackend, ReceiverEvent, SharedClipboardHistory,
    spawn_sequencer,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything a request handler needs, built once at start-up.
#[derive(Debug, Clone)]
pub struct ReceiverContext {
    history: SharedClipboardHistory,
    settings: InjectorSettings,
    queue: InjectionQueue,
    events: broadcast::Sender<ReceiverEvent>,
}

impl ReceiverContext {
    /// Build the context and start the injection sequencer with the backend
    /// produced by `make_backend`.
    pub fn start<B, F>(settings: InjectorSettings, make_backend: F) -> io::Result<Self>
    where
        B: InputBackend,
        F: FnOnce() -> B + Send + 'static,
    {
        let history: SharedClipboardHistory =
            Arc::new(Mutex::new(HistoryStore::new(MAX_CLIPBOARD_HISTORY)));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue = spawn_sequencer(
            make_backend,
            Arc::clone(&history),
            settings.clone(),
            events.clone(),
        )?;

        Ok(Self {
            history,
            settings,
            queue,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReceiverEvent> {
        self.events.subscribe()
    }

    /// Clipboard history, newest first.
    pub fn history_snapshot(&self) -> Vec<ClipboardHistoryItem> {
        self.history
            .lock()
            .map(|history| history.to_vec())
            .unwrap_or_default()
    }

    pub fn auto_paste(&self) -> bool {
        self.settings.auto_paste.load(Ordering::SeqCst)
    }

    pub fn set_auto_paste(&self, enabled: bool) {
        self.settings.auto_paste.store(enabled, Ordering::SeqCst);
        info!(enabled, "auto-paste toggled");
    }
}

pub fn build_router(context: ReceiverContext) -> Router {
    Router::new()
        .route(SYNC_PATH, post(sync_handler))
        .route("/history", get(history_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(context)
}

pub async fn serve(listener: TcpListener, context: ReceiverContext) -> Result<(), String> {
    info!(
        "receiver listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(context))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn history_handler(State(context): State<ReceiverContext>) -> impl IntoResponse {
    Json(context.history_snapshot())
}

/// Accept one sync request. The reply is sent as soon as the message is
/// queued; clipboard and keystroke work happens on the sequencer afterwards.
async fn sync_handler(State(context): State<ReceiverContext>, body: Bytes) -> Response {
    let decoded = DecodedBody::decode(&body);
    if let Err(err) = validate_content(decoded.content()) {
        warn!("rejecting sync request: {}", err);
        return StatusCode::BAD_REQUEST.into_response();
    }

    let structured = decoded.is_structured();
    let message = decoded.into_message();
    info!(
        chars = message.content.chars().count(),
        structured,
        auto_enter = message.auto_enter,
        "sync received"
    );

    if let Err(err) = context.queue.enqueue(message) {
        error!("failed to queue injection: {}", err);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    (StatusCode::OK, ACK_BODY).into_response()
}
