//! Link events and subscriptions
//! Everything a presentation layer needs to react to is published as a
//! [`LinkEvent`]. Listeners hold a [`Subscription`]; dropping it unregisters.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use log::warn;

use crate::core::bluetooth::types::{
    ConnectionSnapshot, ConnectionStatus, DeviceRecord, TransportFamily,
};
use crate::error::Notice;

#[derive(Debug, Clone, Serialize)]
pub enum LinkEvent {
    ScanStarted(TransportFamily),
    DeviceFound(DeviceRecord),
    ScanComplete(TransportFamily),
    StatusChanged(ConnectionStatus),
    Connected(ConnectionSnapshot),
    /// The link dropped without the user asking; a reconnect is offered
    Interrupted(DeviceRecord),
    /// The user disconnected
    Disconnected(DeviceRecord),
    Bonded { device_id: String },
    Notice(Notice),
    Announced(String),
}

/// Registration on the link event stream, released on drop
pub struct Subscription {
    receiver: broadcast::Receiver<LinkEvent>,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<LinkEvent>) -> Self {
        Self { receiver }
    }

    /// Waits for the next event. Returns `None` once the manager is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Link event subscriber lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drains every queued event.
    pub fn drain(&mut self) -> Vec<LinkEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Sending side shared by the manager and its tasks
#[derive(Clone)]
pub(crate) struct EventEmitter {
    sender: broadcast::Sender<LinkEvent>,
}

impl EventEmitter {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        Subscription::new(self.sender.subscribe())
    }
}
