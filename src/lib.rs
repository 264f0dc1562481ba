//! A Rust library for downloading Twitch VOD (video on demand) recordings. The download involves
//! resolving the VOD URL to a playback manifest through the Twitch GraphQL API, mirroring the HLS
//! media playlist (encryption keys and media segments) to local storage, then muxing the stream
//! into a single media container using ffmpeg run as a subprocess.
//!
//! [HLS](https://en.wikipedia.org/wiki/HTTP_Live_Streaming) (HTTP Live Streaming) is the streaming
//! technology used by Twitch for both live broadcasts and recorded VODs. A master playlist (M3U8
//! format) lists the available variant streams (levels of quality), and each variant's media
//! playlist lists the media segments making up the recording. This library fetches and rewrites
//! those playlists itself, but delegates all media handling (demuxing the MPEG-TS segments,
//! remuxing into an MP4 container) to ffmpeg.
//!
//! ## Features supported
//!
//! - Resolving a VOD URL or bare video id to metadata (title, broadcaster, duration) and a signed
//!   playback manifest URL
//! - Variant selection by bandwidth (highest quality by default)
//! - Concurrent segment downloads with exponential-backoff retries on transient network errors
//! - Optional bandwidth limiting
//! - Listing recently published TFT VOD records from the metatft API
//!
//! ## Limitations / unsupported features
//!
//! - Subscriber-only VODs (Twitch does not return a playback access token for these)
//! - Live (in-progress) broadcasts
//! - Streams using DRM content protection

mod ffmpeg;
pub mod fetch;
pub mod hls;
pub mod listing;
pub mod twitch;


#[derive(thiserror::Error, Debug)]
pub enum TwitchVodError {
    #[error("parse error {0}")]
    Parsing(String),
    #[error("invalid Twitch VOD URL: {0}")]
    InvalidVodUrl(String),
    #[error("I/O error {1}")]
    Io(#[source] std::io::Error, String),
    #[error("network error {0}")]
    Network(String),
    #[error("muxing error {0}")]
    Muxing(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("unknown error {0}")]
    Other(String),
}
