//! Tracked livestreams.

/// A livestream whose chat should be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamConfig {
    pub video_id: String,
}

impl StreamConfig {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
        }
    }
}

/// The full set of tracked livestreams, swapped as a whole on reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamsConfig {
    pub streams: Vec<StreamConfig>,
}

impl StreamsConfig {
    pub fn contains(&self, video_id: &str) -> bool {
        self.streams.iter().any(|s| s.video_id == video_id)
    }
}
