use serde::{Deserialize, Serialize};

/// The playback state every paired device converges on. This is the
/// canonical payload for the synchronized containers; the container
/// itself is payload-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeleprompterState {
    pub is_playing: bool,
    /// Scroll speed multiplier applied by the rendering layer.
    pub speed: f64,
    /// Absolute scroll offset in rendering units.
    pub current_position: f64,
    /// Fraction of the script already shown, 0.0 ..= 1.0.
    pub progress: f64,
}

impl Default for TeleprompterState {
    fn default() -> Self {
        Self {
            is_playing: false,
            speed: 1.0,
            current_position: 0.0,
            progress: 0.0,
        }
    }
}
