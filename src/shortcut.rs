//! Keyboard shortcut matching for start/stop.

use tracing::{debug, warn};

use crate::settings::Settings;

/// A key press as delivered by the UI toolkit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub ctrl: bool,
    pub shift: bool,
    pub key: String,
}

impl KeyPress {
    pub fn new(key: impl Into<String>) -> Self {
        Self { ctrl: false, shift: false, key: key.into() }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// `("Ctrl+")?("Shift+")?<UPPERCASE_KEY>`
    pub fn combination(&self) -> String {
        format!(
            "{}{}{}",
            if self.ctrl { "Ctrl+" } else { "" },
            if self.shift { "Shift+" } else { "" },
            self.key.to_uppercase()
        )
    }
}

/// Canonical upper-case form of a configured shortcut, modifiers in fixed order.
///
/// Returns `None` when the shortcut can never be produced by a key press:
/// no key, several keys, or a modifier other than Ctrl/Shift.
pub fn canonicalize(shortcut: &str) -> Option<String> {
    let mut ctrl = false;
    let mut shift = false;
    let mut key: Option<String> = None;

    for token in shortcut.split('+').map(str::trim).filter(|t| !t.is_empty()) {
        match token.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => ctrl = true,
            "shift" => shift = true,
            "alt" | "option" | "meta" | "cmd" | "command" | "super" | "win" => return None,
            _ if key.is_some() => return None,
            _ => key = Some(token.to_string()),
        }
    }

    let press = KeyPress { ctrl, shift, key: key? };
    Some(press.combination().to_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutIntent {
    Start,
    Stop,
}

/// Whoever acts on matched shortcuts.
pub trait ShortcutTarget {
    fn start(&self);
    fn stop(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    start: Option<String>,
    stop: Option<String>,
}

/// Holds at most one active start/stop binding.
///
/// `rebind` replaces the previous binding rather than adding to it, so a
/// settings change never leads to double dispatch.
#[derive(Debug, Default)]
pub struct ShortcutListener {
    binding: Option<Binding>,
}

impl ShortcutListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(settings: &Settings) -> Self {
        let mut listener = Self::new();
        listener.rebind(settings);
        listener
    }

    pub fn rebind(&mut self, settings: &Settings) {
        let start = canonicalize(&settings.start_shortcut);
        if start.is_none() {
            warn!("Start shortcut {:?} can never match a key press", settings.start_shortcut);
        }
        let stop = canonicalize(&settings.stop_shortcut);
        if stop.is_none() {
            warn!("Stop shortcut {:?} can never match a key press", settings.stop_shortcut);
        }
        debug!("Shortcuts bound: start={:?} stop={:?}", start, stop);
        self.binding = Some(Binding { start, stop });
    }

    pub fn unbind(&mut self) {
        self.binding = None;
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Intents matched by `press`. Start and stop are checked independently.
    pub fn matches(&self, press: &KeyPress) -> Vec<ShortcutIntent> {
        let Some(binding) = &self.binding else {
            return Vec::new();
        };
        let combination = press.combination().to_uppercase();
        let mut intents = Vec::new();
        if binding.start.as_deref() == Some(combination.as_str()) {
            intents.push(ShortcutIntent::Start);
        }
        if binding.stop.as_deref() == Some(combination.as_str()) {
            intents.push(ShortcutIntent::Stop);
        }
        intents
    }

    /// Dispatches matched intents to `target`. The press is never consumed.
    pub fn handle(&self, press: &KeyPress, target: &impl ShortcutTarget) -> bool {
        let intents = self.matches(press);
        for intent in &intents {
            debug!("Shortcut {} -> {:?}", press.combination(), intent);
            match intent {
                ShortcutIntent::Start => target.start(),
                ShortcutIntent::Stop => target.stop(),
            }
        }
        !intents.is_empty()
    }
}
