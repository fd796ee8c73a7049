//! Error types surfaced to callers of the link manager

use serde::Serialize;
use thiserror::Error;

use crate::core::bluetooth::{ConnectionStatus, Operation, TransportFamily};

/// Caller-facing error kinds. Transport errors never cross the manager
/// boundary without being translated into one of these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// Radio off or permission missing
    #[error("{family} adapter unavailable: {reason}")]
    AdapterUnavailable {
        family: TransportFamily,
        reason: String,
    },

    /// Connect attempted while another connection is active or in progress
    #[error("a connection is already {0}")]
    Conflict(ConnectionStatus),

    #[error("failed to connect to {device_id}: {detail}")]
    ConnectFailed { device_id: String, detail: String },

    #[error("failed to reconnect to {device_id}: {detail}")]
    ReconnectFailed { device_id: String, detail: String },

    /// Read, write or notify failure; the connection is left untouched
    #[error("{operation} failed: {detail}")]
    OperationFailed { operation: Operation, detail: String },

    #[error("no device connected")]
    NotConnected,

    #[error("no previous device to reconnect to")]
    NoPreviousDevice,

    #[error("{family} scan failed: {detail}")]
    ScanFailed {
        family: TransportFamily,
        detail: String,
    },

    #[error("speech output failed: {0}")]
    SpeechFailed(String),
}

/// How prominently a notice should be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    /// Must be acknowledged before continuing
    Blocking,
    /// Informational, does not disturb the connection
    Transient,
}

/// Follow-up action offered along with a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeAction {
    Retry,
    Reconnect,
}

/// User-facing message derived from an error or an interruption
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
    pub action: Option<NoticeAction>,
}

impl Notice {
    pub fn new(kind: NoticeKind, title: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.to_string(),
            message: message.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: NoticeAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Shown when a connection drops without the user asking for it
    pub fn interrupted(device_name: &str) -> Self {
        Self::new(
            NoticeKind::Blocking,
            "Connection lost",
            format!("{} disconnected", device_name),
        )
        .with_action(NoticeAction::Reconnect)
    }

    pub fn radio_off(family: TransportFamily) -> Self {
        Self::new(
            NoticeKind::Blocking,
            "Bluetooth is off",
            format!("Turn on Bluetooth to use {} devices", family),
        )
    }
}

impl LinkError {
    /// Maps the error onto the notice policy shown to users
    pub fn notice(&self) -> Notice {
        let message = self.to_string();
        match self {
            Self::AdapterUnavailable { .. } => {
                Notice::new(NoticeKind::Blocking, "Bluetooth unavailable", message)
            }
            Self::Conflict(_) => Notice::new(
                NoticeKind::Blocking,
                "Already connected",
                "Disconnect the current device first",
            ),
            Self::ConnectFailed { .. } => {
                Notice::new(NoticeKind::Transient, "Connection failed", message)
                    .with_action(NoticeAction::Retry)
            }
            Self::ReconnectFailed { .. } => {
                Notice::new(NoticeKind::Transient, "Reconnection failed", message)
                    .with_action(NoticeAction::Retry)
            }
            Self::OperationFailed { .. } => {
                Notice::new(NoticeKind::Transient, "Operation failed", message)
            }
            Self::NotConnected => Notice::new(
                NoticeKind::Transient,
                "Not connected",
                "Connect a headset first",
            ),
            Self::NoPreviousDevice => {
                Notice::new(NoticeKind::Transient, "Nothing to reconnect", message)
            }
            Self::ScanFailed { .. } => Notice::new(NoticeKind::Transient, "Scan failed", message),
            Self::SpeechFailed(_) => {
                Notice::new(NoticeKind::Transient, "Announcement failed", message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_and_unavailable_block() {
        assert_eq!(
            LinkError::Conflict(ConnectionStatus::Connected).notice().kind,
            NoticeKind::Blocking
        );
        let unavailable = LinkError::AdapterUnavailable {
            family: TransportFamily::Classic,
            reason: "radio off".into(),
        };
        assert_eq!(unavailable.notice().kind, NoticeKind::Blocking);
    }

    #[test]
    fn connect_failures_offer_retry() {
        let error = LinkError::ConnectFailed {
            device_id: "AA".into(),
            detail: "timeout".into(),
        };
        let notice = error.notice();
        assert_eq!(notice.action, Some(NoticeAction::Retry));
        assert!(notice.message.contains("timeout"));
    }

    #[test]
    fn operation_failures_are_transient() {
        let error = LinkError::OperationFailed {
            operation: Operation::Write,
            detail: "not permitted".into(),
        };
        assert_eq!(error.notice().kind, NoticeKind::Transient);
        assert_eq!(error.notice().action, None);
    }
}
