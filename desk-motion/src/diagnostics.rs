//! Last error and last stop reason, the only place faults are surfaced to the outside.

use core::{
    cell::RefCell,
    fmt::{Display, Write},
};

use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use heapless::String;
use log::{error, warn};

use crate::config::MAX_DIAGNOSTIC_LENGTH;

pub type DiagnosticString = String<MAX_DIAGNOSTIC_LENGTH>;

struct DiagnosticsState {
    last_error: DiagnosticString,
    stop_reason: DiagnosticString,
}

pub struct Diagnostics {
    state: Mutex<CriticalSectionRawMutex, RefCell<DiagnosticsState>>,
}

impl Diagnostics {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(DiagnosticsState {
                last_error: String::new(),
                stop_reason: String::new(),
            })),
        }
    }

    /// Record a fault. Always logged, even if it does not fit
    pub fn set_last_error(&self, message: impl Display) {
        error!("{}", message);
        let text = render(&message);
        self.state
            .lock(|state| state.borrow_mut().last_error = text);
    }

    pub fn set_stop_reason(&self, reason: impl Display) {
        let text = render(&reason);
        self.state
            .lock(|state| state.borrow_mut().stop_reason = text);
    }

    /// Forget both fields, e.g. when a new command comes in
    pub fn clear(&self) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.last_error.clear();
            state.stop_reason.clear();
        });
    }

    pub fn last_error(&self) -> DiagnosticString {
        self.state.lock(|state| state.borrow().last_error.clone())
    }

    pub fn stop_reason(&self) -> DiagnosticString {
        self.state.lock(|state| state.borrow().stop_reason.clone())
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Render into a bounded string, keeping whatever fits
fn render(value: &impl Display) -> DiagnosticString {
    let mut writer = Truncating {
        output: String::new(),
        truncated: false,
    };
    // Truncating never reports an error
    let _ = write!(writer, "{}", value);
    if writer.truncated {
        warn!("Diagnostic message truncated to {} bytes", MAX_DIAGNOSTIC_LENGTH);
    }
    writer.output
}

struct Truncating {
    output: DiagnosticString,
    truncated: bool,
}

impl Write for Truncating {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.output.push(c).is_err() {
                self.truncated = true;
                break;
            }
        }
        Ok(())
    }
}

/// Copy `s` into a bounded string, dropping what does not fit
pub fn truncated<const N: usize>(s: &str) -> String<N> {
    let mut output = String::new();
    for c in s.chars() {
        if output.push(c).is_err() {
            break;
        }
    }
    output
}
