use arboard::Clipboard;
use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use tracing::{debug, info, warn};

use crate::injector::{InjectError, InputBackend};

#[cfg(target_os = "macos")]
const PRIMARY_MODIFIER: Key = Key::Meta;
#[cfg(not(target_os = "macos"))]
const PRIMARY_MODIFIER: Key = Key::Control;

const MODIFIERS: [Key; 4] = [Key::Meta, Key::Control, Key::Shift, Key::Alt];

/// Real clipboard and keyboard, created lazily on the sequencer thread.
///
/// The clipboard handle is kept alive between writes; on X11 the selection is
/// lost when its owner goes away.
#[derive(Default)]
pub struct SystemInput {
    clipboard: Option<Clipboard>,
    enigo: Option<Enigo>,
}

impl SystemInput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn clipboard(&mut self) -> Result<&mut Clipboard, InjectError> {
        if self.clipboard.is_none() {
            let clipboard = Clipboard::new().map_err(|err| InjectError::Clipboard(err.to_string()))?;
            self.clipboard = Some(clipboard);
        }
        self.clipboard
            .as_mut()
            .ok_or_else(|| InjectError::Clipboard("clipboard unavailable".to_owned()))
    }

    fn enigo(&mut self) -> Result<&mut Enigo, InjectError> {
        if self.enigo.is_none() {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|err| InjectError::Keystroke(err.to_string()))?;
            self.enigo = Some(enigo);
        }
        self.enigo
            .as_mut()
            .ok_or_else(|| InjectError::Keystroke("keyboard unavailable".to_owned()))
    }
}

impl InputBackend for SystemInput {
    fn write_clipboard(&mut self, text: &str) -> Result<(), InjectError> {
        let result = self
            .clipboard()?
            .set_text(text.to_owned())
            .map_err(|err| InjectError::Clipboard(err.to_string()));
        if result.is_err() {
            // A stale handle is dropped so the next write reconnects.
            self.clipboard = None;
        }
        result
    }

    fn has_input_permission(&mut self) -> bool {
        let granted = input_permission_granted();
        debug!(granted, "checked input injection permission");
        granted
    }

    fn request_input_permission(&mut self) {
        info!("requesting input injection permission");
        if !prompt_input_permission() {
            warn!("input injection permission denied or pending");
        }
    }

    fn send_paste(&mut self) -> Result<(), InjectError> {
        let enigo = self.enigo()?;
        let press = enigo
            .key(PRIMARY_MODIFIER, Direction::Press)
            .and_then(|()| enigo.key(Key::Unicode('v'), Direction::Click));
        // Release even if the click failed, so the modifier is never left held.
        let release = enigo.key(PRIMARY_MODIFIER, Direction::Release);
        press
            .and(release)
            .map_err(|err| InjectError::Keystroke(err.to_string()))
    }

    fn send_enter(&mut self) -> Result<(), InjectError> {
        let enigo = self.enigo()?;
        for modifier in MODIFIERS {
            enigo
                .key(modifier, Direction::Release)
                .map_err(|err| InjectError::Keystroke(err.to_string()))?;
        }
        enigo
            .key(Key::Return, Direction::Click)
            .map_err(|err| InjectError::Keystroke(err.to_string()))
    }
}

#[cfg(target_os = "macos")]
fn input_permission_granted() -> bool {
    macos_accessibility_client::accessibility::application_is_trusted()
}

#[cfg(target_os = "macos")]
fn prompt_input_permission() -> bool {
    macos_accessibility_client::accessibility::application_is_trusted_with_prompt()
}

#[cfg(not(target_os = "macos"))]
fn input_permission_granted() -> bool {
    true
}

#[cfg(not(target_os = "macos"))]
fn prompt_input_permission() -> bool {
    true
}
