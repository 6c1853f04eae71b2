//! Validation and normalization of user-supplied video references.
//!
//! A reference is accepted when it looks like one of the supported YouTube
//! URL shapes (watch, short link, shorts, embed, music). Accepted references
//! are rewritten to a single canonical watch URL so the extractor never sees
//! playlist or tracking parameters.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::Serialize;

pub const VIDEO_ID_LEN: usize = 11;

static ACCEPTED_SHAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)?(www\.)?(youtube\.com/(watch\?v=|shorts/|embed/)|youtu\.be/|music\.youtube\.com/watch\?v=)",
    )
    .expect("reference shape regex is valid")
});

// Evaluated in order; a later match overrides an earlier one.
static ID_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        r"youtu\.be/([a-zA-Z0-9_-]{11})",
        r"[?&]v=([a-zA-Z0-9_-]{11})",
        r"embed/([a-zA-Z0-9_-]{11})",
        r"shorts/([a-zA-Z0-9_-]{11})",
    ]
    .map(|pattern| Regex::new(pattern).expect("identifier regex is valid"))
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid YouTube URL.")]
pub struct InvalidReference;

/// Canonical identifier of a video on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == VIDEO_ID_LEN
            && value
                .bytes()
                .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_'));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of normalizing an accepted reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedReference {
    Canonical { id: VideoId, url: String },
    /// Accepted by the shape check but no identifier could be extracted.
    /// The trimmed input is forwarded to the extractor as-is.
    Passthrough(String),
}

impl NormalizedReference {
    pub fn url(&self) -> &str {
        match self {
            Self::Canonical { url, .. } => url,
            Self::Passthrough(url) => url,
        }
    }

    pub fn id(&self) -> Option<&VideoId> {
        match self {
            Self::Canonical { id, .. } => Some(id),
            Self::Passthrough(_) => None,
        }
    }
}

pub fn is_accepted(input: &str) -> bool {
    ACCEPTED_SHAPES.is_match(input.trim())
}

pub fn extract_video_id(input: &str) -> Option<VideoId> {
    ID_PATTERNS
        .iter()
        .rev()
        .find_map(|pattern| pattern.captures(input))
        .and_then(|captures| captures.get(1))
        .and_then(|id| VideoId::parse(id.as_str()))
}

pub fn canonical_url(id: &VideoId) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}

pub fn normalize(input: &str) -> Result<NormalizedReference, InvalidReference> {
    let trimmed = input.trim();
    if !is_accepted(trimmed) {
        return Err(InvalidReference);
    }

    Ok(match extract_video_id(trimmed) {
        Some(id) => NormalizedReference::Canonical {
            url: canonical_url(&id),
            id,
        },
        None => NormalizedReference::Passthrough(trimmed.to_string()),
    })
}
