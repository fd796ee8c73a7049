use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// BCP 47 language tag handed to the speech engine.
    pub language: String,

    /// Speaking rate, 1.0 being the engine's normal speed.
    pub rate: f32,

    pub pitch: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: "zh-CN".to_string(),
            rate: 0.5,
            pitch: 1.0,
        }
    }
}
