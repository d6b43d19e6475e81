//! Notification and tray presentation
//!
//! A pure mapping from session state to what the platform layer shows.
//! Rendering stays with the platform; this only decides the words.

use crate::session::SessionState;

/// Title used by notifications and the tray
pub const APP_TITLE: &str = "DefyxVPN";

/// First OS API level that requires a typed foreground service
const TYPED_FOREGROUND_API_LEVEL: u32 = 29;

/// How the background service must be promoted to the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundServiceKind {
    /// Untyped foreground service
    Plain,
    /// Foreground service typed as a connected device
    ConnectedDevice,
}

impl ForegroundServiceKind {
    pub fn for_api_level(api_level: u32) -> Self {
        if api_level >= TYPED_FOREGROUND_API_LEVEL {
            ForegroundServiceKind::ConnectedDevice
        } else {
            ForegroundServiceKind::Plain
        }
    }
}

/// Action offered to the user next to the status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayAction {
    Connect,
    Disconnect,
    /// Shown while a transition is in progress; not clickable
    Busy(&'static str),
}

impl TrayAction {
    pub fn label(&self) -> &'static str {
        match self {
            TrayAction::Connect => "Connect",
            TrayAction::Disconnect => "Disconnect",
            TrayAction::Busy(label) => label,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, TrayAction::Busy(_))
    }
}

/// Everything the platform layer needs to render the current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    pub title: &'static str,
    /// Notification body
    pub text: String,
    /// Tray tooltip
    pub tooltip: String,
    pub action: TrayAction,
    /// Keep the notification pinned
    pub ongoing: bool,
}

impl Presentation {
    /// Build the presentation for `state`, with the advisory connection
    /// label appended to the notification body when known.
    pub fn for_state(state: SessionState, label: Option<&str>) -> Self {
        let (text, tooltip_suffix, action) = match state {
            SessionState::Connected => {
                ("VPN connection is active", "Connected", TrayAction::Disconnect)
            }
            SessionState::Connecting => (
                "Connecting",
                "Connecting ...",
                TrayAction::Busy("Connecting ..."),
            ),
            SessionState::Disconnecting | SessionState::Failed => (
                "Disconnecting",
                "Disconnecting ...",
                TrayAction::Busy("Disconnecting ..."),
            ),
            SessionState::Idle => ("VPN is disconnected", "Disconnected", TrayAction::Connect),
        };

        let text = match label {
            Some(label) if state == SessionState::Connected => format!("{} ({})", text, label),
            _ => text.to_string(),
        };

        Self {
            title: APP_TITLE,
            text,
            tooltip: format!("{} - {}", APP_TITLE, tooltip_suffix),
            action,
            ongoing: state == SessionState::Connected || state.is_transitioning(),
        }
    }
}
