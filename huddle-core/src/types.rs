//! Common types used throughout the session core

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a participant in the room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque reference to a remote media track, as announced by signaling
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TrackId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
    #[serde(rename = "screenshare")]
    ScreenShare,
}

impl TrackKind {
    pub const ALL: [Self; 3] = [Self::Audio, Self::Video, Self::ScreenShare];

    /// Camera video and screen share both count as video bandwidth
    #[must_use]
    pub const fn is_video(&self) -> bool {
        matches!(self, Self::Video | Self::ScreenShare)
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::ScreenShare => "screenshare",
        };
        f.write_str(s)
    }
}

/// Self-reported media and activity flags of a participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFlags {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_share_enabled: bool,
    pub speaking: bool,
    pub raised_hand: bool,
}

impl MediaFlags {
    /// Speaking, a raised hand, or an ongoing screen share
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.speaking || self.raised_hand || self.screen_share_enabled
    }
}
