//! Message routing and payload tags shared across the relay crates.

use serde::{Deserialize, Serialize};

/// Recipient chat class. Ceilings are configured per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatClass {
    Direct,
    Group,
    Channel,
    /// A stored class string that is not recognised.
    Unknown,
}

impl ChatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "direct" | "private" => Self::Direct,
            "group" | "supergroup" => Self::Group,
            "channel" => Self::Channel,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ChatClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload type of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Text,
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Animation,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Animation => "animation",
            Self::Sticker => "sticker",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "photo" => Self::Photo,
            "video" => Self::Video,
            "document" => Self::Document,
            "audio" => Self::Audio,
            "voice" => Self::Voice,
            "animation" => Self::Animation,
            "sticker" => Self::Sticker,
            _ => Self::Text,
        }
    }

    /// Whether the payload references an external blob.
    pub fn has_file(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
