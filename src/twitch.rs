//! Client for the Twitch GraphQL API and the usher manifest service.
//
// Resolving a VOD to something downloadable takes two GraphQL requests: one for the video
// metadata (title, broadcaster, duration) and one for the playback access token. The token value
// and signature are then interpolated into the usher URL, which serves the HLS master playlist.

use std::sync::LazyLock;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use url::Url;
use crate::TwitchVodError;

/// The Client-ID used by the Twitch web player. Requests without a recognized Client-ID are
/// rejected by the GraphQL endpoint.
pub const CLIENT_ID: &str = "ue6666qo983tsx6so1t0vnawi233wa";

/// The Twitch GraphQL endpoint.
pub const GQL_URL: &str = "https://gql.twitch.tv/gql";

/// The usher service, which serves HLS playlists for authorized playback sessions.
pub const USHER_BASE: &str = "https://usher.ttvnw.net";

static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/videos/(\d+)").unwrap());


/// Extract the numeric video id from a Twitch VOD URL such as
/// `https://www.twitch.tv/videos/2686951727`. A bare numeric id is also accepted.
pub fn extract_video_id(url: &str) -> Result<String, TwitchVodError> {
    if !url.is_empty() && url.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(url.to_string());
    }
    if let Some(caps) = VIDEO_ID_RE.captures(url) {
        return Ok(caps[1].to_string());
    }
    Err(TwitchVodError::InvalidVodUrl(url.to_string()))
}


/// Metainformation concerning the broadcaster of a VOD.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOwner {
    pub display_name: Option<String>,
    pub login: Option<String>,
}

/// Metainformation concerning a VOD, as returned by the Twitch GraphQL API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub length_seconds: Option<u64>,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    pub owner: Option<VideoOwner>,
    pub view_count: Option<u64>,
    #[serde(rename = "thumbnailURLs", default)]
    pub thumbnail_urls: Vec<String>,
}

/// A playback access token authorizing the retrieval of the HLS playlists and media segments for
/// a VOD. The token value is an opaque JSON blob and the signature authenticates it; both must be
/// passed to the usher service unmodified.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackAccessToken {
    pub value: String,
    pub signature: String,
}

#[derive(Deserialize)]
struct GqlEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct VideoData {
    video: Option<VideoMetadata>,
}

#[derive(Deserialize)]
struct TokenData {
    #[serde(rename = "videoPlaybackAccessToken")]
    video_playback_access_token: Option<PlaybackAccessToken>,
}


fn network_error(why: &str, e: impl std::error::Error) -> TwitchVodError {
    TwitchVodError::Network(format!("{why}: {e}"))
}


/// A client for the two Twitch services involved in resolving a VOD: the GraphQL API and the
/// usher playlist service.
#[derive(Debug, Clone)]
pub struct TwitchClient {
    http: reqwest::Client,
    client_id: String,
    gql_url: Url,
    usher_base: Url,
}

impl TwitchClient {
    /// Create a `TwitchClient` using the standard Twitch endpoints and the web player Client-ID.
    pub fn new(http: reqwest::Client) -> TwitchClient {
        TwitchClient {
            http,
            client_id: String::from(CLIENT_ID),
            gql_url: Url::parse(GQL_URL).unwrap(),
            usher_base: Url::parse(USHER_BASE).unwrap(),
        }
    }

    /// Create a `TwitchClient` that addresses alternative GraphQL and usher endpoints (used by
    /// our test harness to point at a local server).
    pub fn with_endpoints(http: reqwest::Client, gql_url: Url, usher_base: Url) -> TwitchClient {
        TwitchClient { http, client_id: String::from(CLIENT_ID), gql_url, usher_base }
    }

    /// Use `client_id` instead of the web player Client-ID on GraphQL requests.
    pub fn with_client_id(mut self, client_id: String) -> TwitchClient {
        self.client_id = client_id;
        self
    }

    async fn gql<T: serde::de::DeserializeOwned>(&self, query: String) -> Result<T, TwitchVodError> {
        let envelope: GqlEnvelope<T> = self.http.post(self.gql_url.clone())
            .header("Client-ID", &self.client_id)
            .json(&json!({ "query": query }))
            .send().await
            .map_err(|e| network_error("requesting Twitch GraphQL endpoint", e))?
            .error_for_status()
            .map_err(|e| network_error("requesting Twitch GraphQL endpoint", e))?
            .json().await
            .map_err(|e| TwitchVodError::Parsing(format!("parsing GraphQL response: {e}")))?;
        Ok(envelope.data)
    }

    /// Fetch the metadata for the VOD with this video id.
    #[tracing::instrument(level="trace", skip(self))]
    pub async fn video_metadata(&self, video_id: &str) -> Result<VideoMetadata, TwitchVodError> {
        let query = format!(r#"
        {{
          video(id: "{video_id}") {{
            id
            title
            description
            lengthSeconds
            publishedAt
            owner {{
              displayName
              login
            }}
            viewCount
            thumbnailURLs(height: 480, width: 640)
          }}
        }}
        "#);
        let data: VideoData = self.gql(query).await?;
        data.video.ok_or_else(|| TwitchVodError::Parsing(
            format!("no video in GraphQL response for id {video_id}")))
    }

    /// Fetch a playback access token for the VOD with this video id. Twitch returns a null token
    /// for content the (anonymous) requester may not watch, notably subscriber-only VODs.
    #[tracing::instrument(level="trace", skip(self))]
    pub async fn playback_access_token(&self, video_id: &str) -> Result<PlaybackAccessToken, TwitchVodError> {
        let query = format!(r#"
        {{
          videoPlaybackAccessToken(id: "{video_id}", params: {{platform: "web", playerBackend: "mediaplayer", playerType: "site"}}) {{
            value
            signature
          }}
        }}
        "#);
        let data: TokenData = self.gql(query).await?;
        data.video_playback_access_token.ok_or_else(|| TwitchVodError::AccessDenied(
            format!("no playback access token for VOD {video_id} (subscriber-only content?)")))
    }

    /// Build the usher URL serving the HLS master playlist for this VOD. This is a pure function
    /// of the video id and the access token fields.
    pub fn manifest_url(&self, video_id: &str, token: &PlaybackAccessToken) -> Result<Url, TwitchVodError> {
        let mut url = self.usher_base.join(&format!("vod/{video_id}.m3u8"))
            .map_err(|e| TwitchVodError::Parsing(format!("building usher URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("allow_source", "true")
            .append_pair("allow_audio_only", "true")
            .append_pair("allow_spectre", "true")
            .append_pair("p", "1000000")
            .append_pair("platform", "web")
            .append_pair("player", "twitchweb")
            .append_pair("supported_codecs", "av1,h265,h264")
            .append_pair("playlist_include_framerate", "true")
            .append_pair("sig", &token.signature)
            .append_pair("token", &token.value);
        Ok(url)
    }
}
