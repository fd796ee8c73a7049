//! Spoken time announcements
//! Speaks the current time through the connected headset, either on demand or
//! on a fixed interval while a device is connected.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, Timelike};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::speech_config::SpeechConfig;
use crate::core::bluetooth::events::{EventEmitter, LinkEvent};
use crate::core::bluetooth::ConnectionManager;
use crate::error::LinkError;
use crate::utils::TaskHandle;

/// Prefix of announcements triggered by the user
pub const MANUAL_ANNOUNCEMENT_PREFIX: &str = "按钮触发播报：";
/// Prefix of periodic announcements
pub const AUTO_ANNOUNCEMENT_PREFIX: &str = "定时播报：";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpeechError {
    #[error("speech engine not configured: {0}")]
    NotConfigured(String),
    #[error("{0}")]
    Failed(String),
}

/// Text-to-speech output
#[async_trait]
pub trait SpeechSink: Send + Sync {
    /// Called once before the first utterance
    async fn configure(&self, language: &str, rate: f32, pitch: f32) -> Result<(), SpeechError>;

    async fn speak(&self, utterance: &str) -> Result<(), SpeechError>;
}

/// Writes utterances to the log instead of a speech engine
#[derive(Debug, Default)]
pub struct LogSpeechSink;

#[async_trait]
impl SpeechSink for LogSpeechSink {
    async fn configure(&self, language: &str, rate: f32, pitch: f32) -> Result<(), SpeechError> {
        info!("Speech configured: language {}, rate {}, pitch {}", language, rate, pitch);
        Ok(())
    }

    async fn speak(&self, utterance: &str) -> Result<(), SpeechError> {
        info!("[speech] {}", utterance);
        Ok(())
    }
}

/// Spoken 12-hour form of `time`, e.g. `下午3点零5分`.
pub fn time_announcement<T: Timelike>(prefix: &str, time: &T) -> String {
    let hours = time.hour();
    let minutes = time.minute();
    let period = if hours >= 12 { "下午" } else { "上午" };
    let hour12 = match hours % 12 {
        0 => 12,
        h => h,
    };
    let minute_text = if minutes < 10 {
        format!("零{}", minutes)
    } else {
        minutes.to_string()
    };
    format!("{}{}{}点{}分", prefix, period, hour12, minute_text)
}

/// Manual and periodic time announcements
pub struct TimeAnnouncer {
    speech: Arc<dyn SpeechSink>,
    connection: ConnectionManager,
    events: EventEmitter,
    interval: Duration,
    shutdown: CancellationToken,
    task: Mutex<Option<TaskHandle>>,
}

impl TimeAnnouncer {
    pub(crate) fn new(
        speech: Arc<dyn SpeechSink>,
        connection: ConnectionManager,
        events: EventEmitter,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            speech,
            connection,
            events,
            interval,
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Applies the speech settings. Failures are logged only.
    pub async fn configure(&self, config: &SpeechConfig) {
        match self
            .speech
            .configure(&config.language, config.rate, config.pitch)
            .await
        {
            Ok(()) => info!("Speech output initialized"),
            Err(e) => warn!("Speech output initialization failed: {}", e),
        }
    }

    /// Speaks the current time now. Requires a connected headset.
    pub async fn announce_now(&self) -> Result<String, LinkError> {
        if !self.connection.is_connected().await {
            return Err(LinkError::NotConnected);
        }
        Self::announce(self.speech.as_ref(), &self.events, MANUAL_ANNOUNCEMENT_PREFIX).await
    }

    async fn announce(
        speech: &dyn SpeechSink,
        events: &EventEmitter,
        prefix: &str,
    ) -> Result<String, LinkError> {
        let text = time_announcement(prefix, &Local::now());
        info!("Announcing: {}", text);
        speech
            .speak(&text)
            .await
            .map_err(|e| LinkError::SpeechFailed(e.to_string()))?;
        events.emit(LinkEvent::Announced(text.clone()));
        Ok(text)
    }

    /// Starts or stops the periodic announcement task.
    pub fn set_auto(&self, enabled: bool) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !enabled {
            if task.take().is_some() {
                info!("Periodic time announcements stopped");
            }
            return;
        }
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let speech = self.speech.clone();
        let connection = self.connection.clone();
        let events = self.events.clone();
        let period = self.interval;
        *task = Some(TaskHandle::spawn(&self.shutdown, move |token| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !connection.is_connected().await {
                            debug!("Skipping periodic announcement, no device connected");
                            continue;
                        }
                        if let Err(e) =
                            Self::announce(speech.as_ref(), &events, AUTO_ANNOUNCEMENT_PREFIX).await
                        {
                            warn!("Periodic announcement failed: {}", e);
                            events.emit(LinkEvent::Notice(e.notice()));
                        }
                    }
                }
            }
        }));
        info!("Periodic time announcements started every {} seconds", period.as_secs());
    }

    pub fn is_auto(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    pub(crate) fn stop(&self) {
        self.set_auto(false);
    }
}
