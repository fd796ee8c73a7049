//! Core functionality for the headset link
//! Bluetooth transports and the link state machine, plus spoken announcements.

pub mod announcer;
pub mod bluetooth;

// Re-export commonly used types
pub use announcer::{LogSpeechSink, SpeechError, SpeechSink, TimeAnnouncer};
pub use bluetooth::BluetoothManager;
