//! Receiver-side effect pipeline.
//!
//! Every accepted [`SyncMessage`] runs through the same sequence on a single
//! dedicated thread:
//!
//! ```text
//! Idle -> ClipboardWritten -> PermissionChecked -> PasteSent -> (EnterSent) -> Idle
//! ```
//!
//! The thread drains a FIFO queue, so a message that arrives while another is
//! still waiting on a settle delay is handled strictly after it.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use voicesync_core::{ClipboardHistoryItem, HistoryStore, SyncMessage};

/// Wait between the clipboard write and the paste keystroke.
pub const PASTE_SETTLE_DELAY: Duration = Duration::from_millis(150);
/// Wait between the paste keystroke and the confirm keystroke, so the paste
/// modifier is released before Enter goes out.
pub const ENTER_SETTLE_DELAY: Duration = Duration::from_millis(200);

pub type SharedClipboardHistory = Arc<Mutex<HistoryStore<ClipboardHistoryItem>>>;

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("clipboard write failed: {0}")]
    Clipboard(String),
    #[error("key synthesis failed: {0}")]
    Keystroke(String),
    #[error("injection queue is closed")]
    QueueClosed,
}

/// The platform seam: clipboard access, the input-injection permission gate,
/// and synthesized key events.
pub trait InputBackend {
    fn write_clipboard(&mut self, text: &str) -> Result<(), InjectError>;

    fn has_input_permission(&mut self) -> bool;

    /// Show the platform permission prompt. Called at most once per denied attempt.
    fn request_input_permission(&mut self);

    /// Key-down then key-up of primary modifier + V.
    fn send_paste(&mut self) -> Result<(), InjectError>;

    /// Key-down then key-up of Enter with every modifier released.
    fn send_enter(&mut self) -> Result<(), InjectError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionState {
    Idle,
    ClipboardWritten,
    PermissionChecked,
    PasteSent,
    EnterSent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// Auto-paste is off; the text is on the clipboard only.
    ClipboardOnly,
    /// Permission was missing; the prompt was shown and the paste abandoned.
    PermissionDenied,
    Pasted,
    PastedAndConfirmed,
    Failed(String),
}

#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    Received(ClipboardHistoryItem),
    Injected {
        id: String,
        outcome: InjectionOutcome,
    },
}

#[derive(Debug, Clone)]
pub struct InjectorSettings {
    pub auto_paste: Arc<AtomicBool>,
    pub paste_settle: Duration,
    pub enter_settle: Duration,
}

impl InjectorSettings {
    #[must_use]
    pub fn new(auto_paste: bool) -> Self {
        Self {
            auto_paste: Arc::new(AtomicBool::new(auto_paste)),
            paste_settle: PASTE_SETTLE_DELAY,
            enter_settle: ENTER_SETTLE_DELAY,
        }
    }
}

impl Default for InjectorSettings {
    fn default() -> Self {
        Self::new(true)
    }
}

pub struct ClipboardInjector<B> {
    backend: B,
    history: SharedClipboardHistory,
    settings: InjectorSettings,
    events: broadcast::Sender<ReceiverEvent>,
    state: InjectionState,
}

impl<B: InputBackend> ClipboardInjector<B> {
    pub fn new(
        backend: B,
        history: SharedClipboardHistory,
        settings: InjectorSettings,
        events: broadcast::Sender<ReceiverEvent>,
    ) -> Self {
        Self {
            backend,
            history,
            settings,
            events,
            state: InjectionState::Idle,
        }
    }

    pub fn state(&self) -> InjectionState {
        self.state
    }

    /// Run one full sequence for `message`. Always ends back in `Idle`.
    pub fn inject(&mut self, message: &SyncMessage) -> (ClipboardHistoryItem, InjectionOutcome) {
        let clipboard_result = self.backend.write_clipboard(&message.content);
        if clipboard_result.is_ok() {
            self.transition(InjectionState::ClipboardWritten);
        }

        let item = ClipboardHistoryItem::received_now(message.content.clone());
        self.record(item.clone());

        let outcome = match clipboard_result {
            Ok(()) => self.automate(message.auto_enter),
            Err(err) => {
                warn!(id = %item.id, "{err}");
                InjectionOutcome::Failed(err.to_string())
            }
        };

        self.transition(InjectionState::Idle);
        (item, outcome)
    }

    fn automate(&mut self, auto_enter: bool) -> InjectionOutcome {
        if !self.settings.auto_paste.load(Ordering::SeqCst) {
            return InjectionOutcome::ClipboardOnly;
        }

        thread::sleep(self.settings.paste_settle);
        if !self.backend.has_input_permission() {
            warn!("input injection permission missing; prompting and skipping paste");
            self.backend.request_input_permission();
            return InjectionOutcome::PermissionDenied;
        }
        self.transition(InjectionState::PermissionChecked);

        if let Err(err) = self.backend.send_paste() {
            warn!("{err}");
            return InjectionOutcome::Failed(err.to_string());
        }
        self.transition(InjectionState::PasteSent);

        if !auto_enter {
            return InjectionOutcome::Pasted;
        }

        thread::sleep(self.settings.enter_settle);
        if let Err(err) = self.backend.send_enter() {
            warn!("{err}");
            return InjectionOutcome::Failed(err.to_string());
        }
        self.transition(InjectionState::EnterSent);
        InjectionOutcome::PastedAndConfirmed
    }

    fn record(&self, item: ClipboardHistoryItem) {
        match self.history.lock() {
            Ok(mut history) => {
                history.push(item.clone());
            }
            Err(_) => warn!("clipboard history lock poisoned; item not recorded"),
        }
        let _ = self.events.send(ReceiverEvent::Received(item));
    }

    fn transition(&mut self, next: InjectionState) {
        debug!(from = ?self.state, to = ?next, "injector transition");
        self.state = next;
    }
}

/// Sending half of the sequencer queue.
#[derive(Debug, Clone)]
pub struct InjectionQueue {
    tx: mpsc::UnboundedSender<SyncMessage>,
}

impl InjectionQueue {
    pub fn enqueue(&self, message: SyncMessage) -> Result<(), InjectError> {
        self.tx.send(message).map_err(|_| InjectError::QueueClosed)
    }
}

/// Start the sequencer thread. The backend is built on that thread, so it
/// need not be `Send`. The thread exits once every queue handle is dropped.
pub fn spawn_sequencer<B, F>(
    make_backend: F,
    history: SharedClipboardHistory,
    settings: InjectorSettings,
    events: broadcast::Sender<ReceiverEvent>,
) -> io::Result<InjectionQueue>
where
    B: InputBackend,
    F: FnOnce() -> B + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<SyncMessage>();

    thread::Builder::new()
        .name("voicesync-injector".to_owned())
        .spawn(move || {
            let mut injector =
                ClipboardInjector::new(make_backend(), history, settings, events.clone());
            while let Some(message) = rx.blocking_recv() {
                let (item, outcome) = injector.inject(&message);
                info!(id = %item.id, ?outcome, "injection finished");
                let _ = events.send(ReceiverEvent::Injected {
                    id: item.id,
                    outcome,
                });
            }
            debug!("injection queue closed");
        })?;

    Ok(InjectionQueue { tx })
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Action {
        Clipboard(String),
        PermissionCheck,
        PermissionPrompt,
        Paste,
        Enter,
    }

    #[derive(Clone, Default)]
    struct RecordingBackend {
        log: Arc<Mutex<Vec<(Instant, Action)>>>,
        deny_permission: bool,
        fail_clipboard: bool,
    }

    impl RecordingBackend {
        fn push(&self, action: Action) {
            self.log.lock().unwrap().push((Instant::now(), action));
        }

        fn actions(&self) -> Vec<Action> {
            self.log.lock().unwrap().iter().map(|(_, a)| a.clone()).collect()
        }
    }

    impl InputBackend for RecordingBackend {
        fn write_clipboard(&mut self, text: &str) -> Result<(), InjectError> {
            if self.fail_clipboard {
                return Err(InjectError::Clipboard("no display".to_owned()));
            }
            self.push(Action::Clipboard(text.to_owned()));
            Ok(())
        }

        fn has_input_permission(&mut self) -> bool {
            self.push(Action::PermissionCheck);
            !self.deny_permission
        }

        fn request_input_permission(&mut self) {
            self.push(Action::PermissionPrompt);
        }

        fn send_paste(&mut self) -> Result<(), InjectError> {
            self.push(Action::Paste);
            Ok(())
        }

        fn send_enter(&mut self) -> Result<(), InjectError> {
            self.push(Action::Enter);
            Ok(())
        }
    }

    fn injector(
        backend: RecordingBackend,
        auto_paste: bool,
    ) -> (ClipboardInjector<RecordingBackend>, SharedClipboardHistory) {
        let history = Arc::new(Mutex::new(HistoryStore::new(50)));
        let (events, _) = broadcast::channel(16);
        let injector = ClipboardInjector::new(
            backend,
            Arc::clone(&history),
            InjectorSettings::new(auto_paste),
            events,
        );
        (injector, history)
    }

    #[test]
    fn clipboard_only_when_auto_paste_disabled() {
        let backend = RecordingBackend::default();
        let (mut injector, history) = injector(backend.clone(), false);

        let (item, outcome) = injector.inject(&SyncMessage::new("hello", true));

        assert_eq!(outcome, InjectionOutcome::ClipboardOnly);
        assert_eq!(backend.actions(), vec![Action::Clipboard("hello".to_owned())]);
        assert_eq!(history.lock().unwrap().most_recent(), Some(&item));
        assert_eq!(injector.state(), InjectionState::Idle);
    }

    #[test]
    fn paste_then_enter_respect_settle_delays() {
        let backend = RecordingBackend::default();
        let (mut injector, _) = injector(backend.clone(), true);

        let (_, outcome) = injector.inject(&SyncMessage::new("ls -la", true));
        assert_eq!(outcome, InjectionOutcome::PastedAndConfirmed);
        assert_eq!(
            backend.actions(),
            vec![
                Action::Clipboard("ls -la".to_owned()),
                Action::PermissionCheck,
                Action::Paste,
                Action::Enter,
            ]
        );

        let log = backend.log.lock().unwrap();
        let clipboard_at = log[0].0;
        let paste_at = log[2].0;
        let enter_at = log[3].0;
        assert!(paste_at.duration_since(clipboard_at) >= PASTE_SETTLE_DELAY);
        assert!(enter_at.duration_since(paste_at) >= ENTER_SETTLE_DELAY);
    }

    #[test]
    fn paste_without_enter_when_not_requested() {
        let backend = RecordingBackend::default();
        let (mut injector, _) = injector(backend.clone(), true);

        let (_, outcome) = injector.inject(&SyncMessage::new("note", false));
        assert_eq!(outcome, InjectionOutcome::Pasted);
        assert!(!backend.actions().contains(&Action::Enter));
    }

    #[test]
    fn denied_permission_prompts_and_abandons() {
        let backend = RecordingBackend {
            deny_permission: true,
            ..RecordingBackend::default()
        };
        let (mut injector, history) = injector(backend.clone(), true);

        let (_, outcome) = injector.inject(&SyncMessage::new("text", true));
        assert_eq!(outcome, InjectionOutcome::PermissionDenied);
        assert_eq!(
            backend.actions(),
            vec![
                Action::Clipboard("text".to_owned()),
                Action::PermissionCheck,
                Action::PermissionPrompt,
            ]
        );
        assert_eq!(history.lock().unwrap().len(), 1);
        assert_eq!(injector.state(), InjectionState::Idle);
    }

    #[test]
    fn clipboard_failure_still_records_but_skips_keystrokes() {
        let backend = RecordingBackend {
            fail_clipboard: true,
            ..RecordingBackend::default()
        };
        let (mut injector, history) = injector(backend.clone(), true);

        let (_, outcome) = injector.inject(&SyncMessage::new("text", true));
        assert!(matches!(outcome, InjectionOutcome::Failed(_)));
        assert!(backend.actions().is_empty());
        assert_eq!(history.lock().unwrap().len(), 1);
    }

    #[test]
    fn sequencer_runs_messages_one_at_a_time_in_order() {
        let backend = RecordingBackend::default();
        let history = Arc::new(Mutex::new(HistoryStore::new(50)));
        let (events, mut events_rx) = broadcast::channel(16);
        let factory_backend = backend.clone();
        let queue = spawn_sequencer(
            move || factory_backend,
            Arc::clone(&history),
            InjectorSettings::new(true),
            events,
        )
        .unwrap();

        queue.enqueue(SyncMessage::new("first", true)).unwrap();
        queue.enqueue(SyncMessage::new("second", true)).unwrap();

        let mut finished = 0;
        while finished < 2 {
            if let ReceiverEvent::Injected { outcome, .. } = events_rx.blocking_recv().unwrap() {
                assert_eq!(outcome, InjectionOutcome::PastedAndConfirmed);
                finished += 1;
            }
        }

        assert_eq!(
            backend.actions(),
            vec![
                Action::Clipboard("first".to_owned()),
                Action::PermissionCheck,
                Action::Paste,
                Action::Enter,
                Action::Clipboard("second".to_owned()),
                Action::PermissionCheck,
                Action::Paste,
                Action::Enter,
            ]
        );
        let contents: Vec<String> = history
            .lock()
            .unwrap()
            .iter()
            .map(|item| item.content.clone())
            .collect();
        assert_eq!(contents, vec!["second".to_owned(), "first".to_owned()]);
    }
}
