//! Provider adapters for generative media services.
//!
//! Each upstream provider speaks its own dialect; the adapters here
//! translate those dialects into one normalized vocabulary so the rest
//! of the system never sees provider-specific shapes. One adapter
//! exists per job kind:
//! - [`ImageAdapter`] - still image generation
//! - [`VideoAdapter`] - short-form video generation
//! - [`VoiceoverAdapter`] - text-to-speech
//! - [`MusicAdapter`] - music composition
//! - [`SubtitlesAdapter`] - subtitle extraction

pub mod adapter;
pub mod asset_store;
pub mod client;
pub mod error;
pub mod image;
pub mod music;
pub mod subtitles;
pub mod video;
pub mod voiceover;

pub use adapter::{AdapterSet, ProviderAdapter};
pub use asset_store::{AssetStore, AssetStoreError, HttpAssetStore};
pub use client::{ProviderClient, ProviderSettings};
pub use error::{ProviderError, ProviderResult};
pub use image::ImageAdapter;
pub use music::MusicAdapter;
pub use subtitles::SubtitlesAdapter;
pub use video::VideoAdapter;
pub use voiceover::VoiceoverAdapter;
