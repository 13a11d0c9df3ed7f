//! Debounce and auto-clear timers for the sender.
//!
//! All scheduler state lives on one control task that handles [`SchedulerHandle`]
//! commands strictly in order. Timers and network sends run as separate tasks
//! and report back by posting commands onto the same queue, so every buffer
//! mutation and record append happens on the control task.
//!
//! Each fire event carries the id of the timer that produced it. A fire whose
//! id no longer matches the live handle of its kind was cancelled after it had
//! already been queued, and is dropped.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use voicesync_core::{HistoryStore, MAX_SYNC_RECORDS, SyncMessage, SyncRecord, validate_content};

use crate::client::{SendError, SyncTransport};

pub const CLEAR_DELAY: Duration = Duration::from_millis(3_000);

const MIN_DELAY_MS: u64 = 2_000;
const MAX_DELAY_MS: u64 = 4_000;
const SHORT_TEXT_CHARS: usize = 25;
const LONG_TEXT_CHARS: usize = 100;

/// Quiet period before an auto-send, growing linearly from 2 s at 25
/// characters to 4 s at 100.
pub fn smart_delay(chars: usize) -> Duration {
    let ms = if chars <= SHORT_TEXT_CHARS {
        MIN_DELAY_MS
    } else if chars <= LONG_TEXT_CHARS {
        let over = (chars - SHORT_TEXT_CHARS) as u64;
        let span = (LONG_TEXT_CHARS - SHORT_TEXT_CHARS) as u64;
        MIN_DELAY_MS + over * (MAX_DELAY_MS - MIN_DELAY_MS) / span
    } else {
        MAX_DELAY_MS
    };
    Duration::from_millis(ms)
}

#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

/// Issues cancellable one-shot timers with unique ids.
#[derive(Debug, Default)]
pub struct Timer {
    next_id: u64,
}

impl Timer {
    /// Run `callback` with the timer id once `delay` has elapsed, unless cancelled first.
    pub fn arm<F>(&mut self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.next_id += 1;
        let id = self.next_id;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback(id);
        });
        TimerHandle { id, task }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Send,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub auto_send: bool,
    pub auto_clear: bool,
    pub auto_enter: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            auto_send: true,
            auto_clear: false,
            auto_enter: false,
        }
    }
}

/// What the front-end gets told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    BufferChanged(String),
    Sending { content: String },
    /// A send attempt finished. `address` is the receiver it was sent to,
    /// which may differ from the current one after a transport switch.
    Recorded { record: SyncRecord, address: String },
    Status(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub buffer: String,
    pub options: SchedulerOptions,
    /// Newest first.
    pub records: Vec<SyncRecord>,
    pub send_pending: bool,
    pub clear_pending: bool,
}

enum Command {
    Edit(String),
    SendNow,
    Clear,
    SetAutoSend(bool),
    SetAutoClear(bool),
    SetAutoEnter(bool),
    SetTransport(Arc<dyn SyncTransport>),
    Snapshot(oneshot::Sender<SchedulerSnapshot>),
    TimerFired {
        kind: TimerKind,
        id: u64,
    },
    SendFinished {
        content: String,
        address: String,
        generation: u64,
        result: Result<(), SendError>,
    },
}

/// Cheap, cloneable front door to the control task. The task stops once every
/// handle is dropped.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// The user replaced the buffer with `text`.
    pub fn edit(&self, text: impl Into<String>) {
        let _ = self.tx.send(Command::Edit(text.into()));
    }

    pub fn send_now(&self) {
        let _ = self.tx.send(Command::SendNow);
    }

    pub fn clear(&self) {
        let _ = self.tx.send(Command::Clear);
    }

    pub fn set_auto_send(&self, enabled: bool) {
        let _ = self.tx.send(Command::SetAutoSend(enabled));
    }

    pub fn set_auto_clear(&self, enabled: bool) {
        let _ = self.tx.send(Command::SetAutoClear(enabled));
    }

    pub fn set_auto_enter(&self, enabled: bool) {
        let _ = self.tx.send(Command::SetAutoEnter(enabled));
    }

    /// Point subsequent sends at a different receiver. In-flight sends are unaffected.
    pub fn set_transport(&self, transport: Arc<dyn SyncTransport>) {
        let _ = self.tx.send(Command::SetTransport(transport));
    }

    pub async fn snapshot(&self) -> Option<SchedulerSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Command::Snapshot(reply_tx)).ok()?;
        reply_rx.await.ok()
    }
}

/// Start the control task.
pub fn spawn_scheduler(
    options: SchedulerOptions,
    transport: Arc<dyn SyncTransport>,
) -> (SchedulerHandle, mpsc::UnboundedReceiver<SchedulerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let scheduler = DebounceScheduler {
        options,
        buffer: String::new(),
        generation: 0,
        records: HistoryStore::new(MAX_SYNC_RECORDS),
        transport,
        timer: Timer::default(),
        send_timer: None,
        clear_timer: None,
        commands: tx.downgrade(),
        events: event_tx,
    };
    tokio::spawn(scheduler.run(rx));
    (SchedulerHandle { tx }, event_rx)
}

struct DebounceScheduler {
    options: SchedulerOptions,
    buffer: String,
    /// Bumped on every buffer mutation; lets a finished send tell whether the
    /// text it carried is still what the user sees.
    generation: u64,
    records: HistoryStore<SyncRecord>,
    transport: Arc<dyn SyncTransport>,
    timer: Timer,
    send_timer: Option<TimerHandle>,
    clear_timer: Option<TimerHandle>,
    commands: mpsc::WeakUnboundedSender<Command>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

impl DebounceScheduler {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        self.cancel_timers();
        debug!("scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Edit(text) => self.on_edit(text),
            Command::SendNow => {
                self.cancel_timers();
                self.dispatch_send(true);
            }
            Command::Clear => {
                self.cancel_timers();
                self.set_buffer(String::new());
            }
            Command::SetAutoSend(enabled) => {
                self.options.auto_send = enabled;
                if !enabled {
                    cancel(&mut self.send_timer);
                }
            }
            Command::SetAutoClear(enabled) => {
                self.options.auto_clear = enabled;
                if !enabled {
                    cancel(&mut self.clear_timer);
                }
            }
            Command::SetAutoEnter(enabled) => self.options.auto_enter = enabled,
            Command::SetTransport(transport) => self.transport = transport,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::TimerFired { kind, id } => self.on_timer_fired(kind, id),
            Command::SendFinished {
                content,
                address,
                generation,
                result,
            } => self.on_send_finished(content, address, generation, result),
        }
    }

    fn on_edit(&mut self, text: String) {
        self.cancel_timers();
        self.set_buffer(text);
        if self.options.auto_send {
            let delay = smart_delay(self.buffer.chars().count());
            self.send_timer = Some(self.arm(TimerKind::Send, delay));
        }
    }

    fn on_timer_fired(&mut self, kind: TimerKind, id: u64) {
        let slot = match kind {
            TimerKind::Send => &mut self.send_timer,
            TimerKind::Clear => &mut self.clear_timer,
        };
        if slot.as_ref().map(TimerHandle::id) != Some(id) {
            debug!(?kind, id, "ignoring stale timer");
            return;
        }
        *slot = None;

        match kind {
            TimerKind::Send => self.dispatch_send(false),
            TimerKind::Clear => {
                debug!("auto-clear fired");
                self.set_buffer(String::new());
            }
        }
    }

    fn dispatch_send(&mut self, manual: bool) {
        if let Err(err) = validate_content(&self.buffer) {
            if manual {
                self.publish(SchedulerEvent::Status(err.to_string()));
            }
            return;
        }

        let message = SyncMessage::new(self.buffer.clone(), self.options.auto_enter);
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let address = transport.address().to_owned();
        let commands = self.commands.clone();

        info!(
            %address,
            chars = message.content.chars().count(),
            auto_enter = message.auto_enter,
            manual,
            "dispatching send"
        );
        self.publish(SchedulerEvent::Sending {
            content: message.content.clone(),
        });

        tokio::spawn(async move {
            let content = message.content.clone();
            let result = transport.send(message).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::SendFinished {
                    content,
                    address,
                    generation,
                    result,
                });
            }
        });
    }

    fn on_send_finished(
        &mut self,
        content: String,
        address: String,
        generation: u64,
        result: Result<(), SendError>,
    ) {
        let record = SyncRecord {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            content,
            success: result.is_ok(),
            message: match &result {
                Ok(()) => "OK".to_owned(),
                Err(err) => err.to_string(),
            },
        };
        if let Err(err) = &result {
            warn!(%address, "send failed: {err}");
        }
        self.records.push(record.clone());
        self.publish(SchedulerEvent::Recorded { record, address });

        if result.is_err() || !self.options.auto_clear {
            return;
        }
        if generation != self.generation {
            debug!("buffer changed while sending; auto-clear skipped");
            return;
        }
        cancel(&mut self.clear_timer);
        self.clear_timer = Some(self.arm(TimerKind::Clear, CLEAR_DELAY));
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration) -> TimerHandle {
        let commands = self.commands.clone();
        let handle = self.timer.arm(delay, move |id| {
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::TimerFired { kind, id });
            }
        });
        debug!(?kind, id = handle.id(), ?delay, "timer armed");
        handle
    }

    fn cancel_timers(&mut self) {
        cancel(&mut self.send_timer);
        cancel(&mut self.clear_timer);
    }

    fn set_buffer(&mut self, text: String) {
        self.generation += 1;
        self.buffer = text;
        self.publish(SchedulerEvent::BufferChanged(self.buffer.clone()));
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            buffer: self.buffer.clone(),
            options: self.options,
            records: self.records.to_vec(),
            send_pending: self.send_timer.is_some(),
            clear_pending: self.clear_timer.is_some(),
        }
    }

    fn publish(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }
}

fn cancel(slot: &mut Option<TimerHandle>) {
    if let Some(handle) = slot.take() {
        handle.cancel();
    }
}
