// Tests for building the usher manifest URL from the playback access token fields.

use std::collections::HashMap;
use pretty_assertions::assert_eq;
use twitch_vod::twitch::{PlaybackAccessToken, TwitchClient};


fn token() -> PlaybackAccessToken {
    PlaybackAccessToken {
        value: String::from(r#"{"authorization":{"forbidden":false},"chansub":{"restricted_bitrates":[]}}"#),
        signature: String::from("0123456789abcdef0123456789abcdef01234567"),
    }
}

#[test]
fn test_manifest_url_construction() {
    let api = TwitchClient::new(reqwest::Client::new());
    let token = token();
    let url = api.manifest_url("2686951727", &token).unwrap();
    assert_eq!(url.host_str(), Some("usher.ttvnw.net"));
    assert_eq!(url.path(), "/vod/2686951727.m3u8");
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    assert_eq!(params.get("sig"), Some(&token.signature));
    assert_eq!(params.get("token"), Some(&token.value));
    assert_eq!(params.get("allow_source").map(String::as_str), Some("true"));
    assert_eq!(params.get("allow_audio_only").map(String::as_str), Some("true"));
    assert_eq!(params.get("platform").map(String::as_str), Some("web"));
    assert_eq!(params.get("player").map(String::as_str), Some("twitchweb"));
    assert_eq!(params.get("supported_codecs").map(String::as_str), Some("av1,h265,h264"));
    assert_eq!(params.get("playlist_include_framerate").map(String::as_str), Some("true"));
}

#[test]
fn test_manifest_url_is_deterministic() {
    let api = TwitchClient::new(reqwest::Client::new());
    let first = api.manifest_url("123", &token()).unwrap();
    let second = api.manifest_url("123", &token()).unwrap();
    assert_eq!(first, second);
}
