//! Generation request parameters and canonical fingerprints.
//!
//! A [`GenerationRequest`] is the caller-supplied half of a job. Its
//! [`fingerprint`](GenerationRequest::fingerprint) is the identity used
//! for in-flight coalescing and short-term result caching: two requests
//! that normalize to the same fingerprint are the same work.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::job::{JobKind, OwnerScope};

/// Maximum accepted prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 2_000;

/// Maximum accepted voiceover/subtitle source text length.
pub const MAX_TEXT_LENGTH: usize = 10_000;

/// Default number of images per generation.
pub const DEFAULT_IMAGE_COUNT: u32 = 1;

/// Maximum number of images per generation.
pub const MAX_IMAGE_COUNT: u32 = 4;

/// Default video clip length.
pub const DEFAULT_VIDEO_DURATION_SECS: u32 = 5;

/// Default music track length.
pub const DEFAULT_MUSIC_DURATION_SECS: u32 = 30;

/// Default text-to-speech voice.
pub const DEFAULT_VOICE: &str = "alloy";

/// Default subtitle language.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Caller-supplied generation parameters.
///
/// One shape covers all job kinds; each adapter reads the fields it
/// cares about and validates the ones it requires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Free-form prompt (image, video, music)
    #[validate(length(max = 2000))]
    pub prompt: Option<String>,

    /// Source text (voiceover)
    #[validate(length(max = 10000))]
    pub text: Option<String>,

    /// Named visual or musical style
    #[validate(length(max = 100))]
    pub style: Option<String>,

    /// Number of images to generate
    #[validate(range(min = 1, max = 4))]
    pub count: Option<u32>,

    /// Requested clip or track length
    #[validate(range(min = 1, max = 300))]
    pub duration_secs: Option<u32>,

    /// Image used to condition video generation
    #[validate(url)]
    pub reference_image_url: Option<String>,

    /// Text-to-speech voice name
    #[validate(length(max = 100))]
    pub voice: Option<String>,

    /// Music genre
    #[validate(length(max = 100))]
    pub genre: Option<String>,

    /// Media to extract subtitles from
    #[validate(url)]
    pub media_url: Option<String>,

    /// Subtitle language code
    #[validate(length(max = 16))]
    pub language: Option<String>,
}

impl GenerationRequest {
    /// Whether the request points at caller-hosted binary media.
    ///
    /// Such requests coalesce while in flight but are never served
    /// from the result cache: the bytes behind the URL can change.
    pub fn has_binary_reference(&self) -> bool {
        self.reference_image_url.is_some() || self.media_url.is_some()
    }

    /// Derive the canonical identity of this request for one owner and kind.
    ///
    /// Text fields are trimmed and lowercased, absent optionals are
    /// replaced by the defaults the adapters would apply, so requests
    /// that differ only in spelling or omitted defaults share a key.
    pub fn fingerprint(&self, owner: &OwnerScope, kind: JobKind) -> RequestFingerprint {
        let duration = self.duration_secs.unwrap_or(match kind {
            JobKind::Video => DEFAULT_VIDEO_DURATION_SECS,
            JobKind::Music => DEFAULT_MUSIC_DURATION_SECS,
            _ => 0,
        });

        let key = format!(
            "{}:{}:{}|p={}|t={}|s={}|n={}|d={}|v={}|g={}|l={}|r={}|m={}",
            owner.client_id,
            owner.user_id,
            kind.as_str(),
            normalize_text(&self.prompt),
            normalize_text(&self.text),
            normalize_text(&self.style),
            self.count.unwrap_or(DEFAULT_IMAGE_COUNT),
            duration,
            normalize_or(&self.voice, DEFAULT_VOICE),
            normalize_text(&self.genre),
            normalize_or(&self.language, DEFAULT_LANGUAGE),
            trim_only(&self.reference_image_url),
            trim_only(&self.media_url),
        );

        RequestFingerprint {
            key,
            cacheable: !self.has_binary_reference(),
        }
    }
}

/// Canonical request identity used for coalescing and caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    /// Normalized identity string, unique per (owner, kind, parameters)
    pub key: String,
    /// Whether a finished result for this key may be cached and re-served
    pub cacheable: bool,
}

fn normalize_text(value: &Option<String>) -> String {
    value
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default()
}

fn normalize_or(value: &Option<String>, default: &str) -> String {
    let normalized = normalize_text(value);
    if normalized.is_empty() {
        default.to_string()
    } else {
        normalized
    }
}

// URLs keep their case; only surrounding whitespace is insignificant.
fn trim_only(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}
