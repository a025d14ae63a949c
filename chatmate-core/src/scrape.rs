//! Best-effort stream metadata from the watch page.
//!
//! The page embeds two JSON blobs: the player response (playability, video
//! details, broadcast details) and the initial page data (viewer count
//! text). Missing fields become unknown; only the playability
//! classifications below are errors.

use chatmate_sdk::objects::embedded::extract_embedded;
use chatmate_sdk::objects::{LiveStatus, StreamMetadata};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

const PLAYER_RESPONSE_MARKER: &str = "ytInitialPlayerResponse";
const INITIAL_DATA_MARKER: &str = "ytInitialData";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScrapeError {
    #[error("stream unavailable: {0}")]
    Unavailable(String),

    #[error("login required")]
    LoginRequired,

    #[error("stream is members-only")]
    MembersOnly,

    #[error("no recording available")]
    NoRecording,

    #[error("malformed watch page: {0}")]
    Parse(String),
}

impl ScrapeError {
    /// Classifications that retrying will not fix.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScrapeError::Parse(_))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PlayerResponse {
    playability_status: Option<PlayabilityStatus>,
    video_details: Option<VideoDetails>,
    microformat: Option<Microformat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PlayabilityStatus {
    status: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VideoDetails {
    title: Option<String>,
    author: Option<String>,
    channel_id: Option<String>,
    is_live: Option<bool>,
    is_upcoming: Option<bool>,
    is_live_content: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Microformat {
    player_microformat_renderer: Option<MicroformatRenderer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MicroformatRenderer {
    live_broadcast_details: Option<LiveBroadcastDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LiveBroadcastDetails {
    is_live_now: Option<bool>,
    start_timestamp: Option<String>,
    end_timestamp: Option<String>,
}

/// Parse title, channel, live status and viewer count from a watch page.
pub fn parse_metadata(document: &str) -> Result<StreamMetadata, ScrapeError> {
    let player: PlayerResponse = match extract_embedded(document, PLAYER_RESPONSE_MARKER) {
        Some(Ok(player)) => player,
        Some(Err(e)) => return Err(ScrapeError::Parse(e.to_string())),
        None => return Err(ScrapeError::Parse("player response not found".to_owned())),
    };

    if let Some(playability) = &player.playability_status {
        classify_playability(playability)?;
    }

    let details = player.video_details.unwrap_or_default();
    let broadcast = player
        .microformat
        .and_then(|m| m.player_microformat_renderer)
        .and_then(|r| r.live_broadcast_details);
    let status = live_status(&details, broadcast.as_ref());

    // The page data is optional; a malformed blob only loses the count.
    let viewer_count = extract_embedded::<Value>(document, INITIAL_DATA_MARKER)
        .and_then(Result::ok)
        .as_ref()
        .and_then(viewer_count_text)
        .and_then(parse_viewer_count);
    let viewer_count = match (viewer_count, status) {
        (None, Some(LiveStatus::Live)) => Some(0),
        (count, _) => count,
    };

    Ok(StreamMetadata {
        title: details.title,
        channel_name: details.author,
        channel_id: details.channel_id,
        status,
        viewer_count,
    })
}

fn classify_playability(playability: &PlayabilityStatus) -> Result<(), ScrapeError> {
    let reason = playability.reason.clone().unwrap_or_default();
    match playability.status.as_deref() {
        Some("ERROR") => Err(ScrapeError::Unavailable(reason)),
        Some("LOGIN_REQUIRED") => Err(ScrapeError::LoginRequired),
        Some("UNPLAYABLE") => {
            let lowered = reason.to_lowercase();
            if lowered.contains("members") {
                Err(ScrapeError::MembersOnly)
            } else if lowered.contains("recording") {
                Err(ScrapeError::NoRecording)
            } else {
                Err(ScrapeError::Unavailable(reason))
            }
        }
        _ => Ok(()),
    }
}

fn live_status(
    details: &VideoDetails,
    broadcast: Option<&LiveBroadcastDetails>,
) -> Option<LiveStatus> {
    if let Some(broadcast) = broadcast {
        if broadcast.is_live_now == Some(true) {
            return Some(LiveStatus::Live);
        }
        if broadcast.end_timestamp.is_some() {
            return Some(LiveStatus::Finished);
        }
        if broadcast.start_timestamp.is_some() || details.is_upcoming == Some(true) {
            return Some(LiveStatus::NotStarted);
        }
    }
    match (details.is_live, details.is_upcoming, details.is_live_content) {
        (Some(true), _, _) => Some(LiveStatus::Live),
        (_, Some(true), _) => Some(LiveStatus::NotStarted),
        (_, _, Some(true)) => Some(LiveStatus::Finished),
        _ => None,
    }
}

fn viewer_count_text(initial_data: &Value) -> Option<&str> {
    let contents = initial_data
        .pointer("/contents/twoColumnWatchNextResults/results/results/contents")?
        .as_array()?;
    let view_count = contents.iter().find_map(|item| {
        item.pointer("/videoPrimaryInfoRenderer/viewCount/videoViewCountRenderer/viewCount")
    })?;
    view_count
        .get("simpleText")
        .and_then(Value::as_str)
        .or_else(|| view_count.pointer("/runs/0/text").and_then(Value::as_str))
}

/// Parse the leading figure of a text like `"1,234 watching now"`.
pub fn parse_viewer_count(text: &str) -> Option<u64> {
    let token = text.split_whitespace().next()?;
    token.replace(',', "").parse().ok()
}
