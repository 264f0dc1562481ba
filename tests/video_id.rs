// Tests for extracting the numeric video id from a Twitch VOD URL.
//
// To run tests while enabling printing to stdout/stderr
//
//    cargo test --test video_id -- --show-output

use twitch_vod::TwitchVodError;
use twitch_vod::twitch::extract_video_id;


#[test]
fn test_extract_wellformed() {
    assert_eq!(extract_video_id("https://www.twitch.tv/videos/2686951727").unwrap(),
               "2686951727");
    assert_eq!(extract_video_id("https://twitch.tv/videos/42").unwrap(), "42");
    assert_eq!(extract_video_id("www.twitch.tv/videos/1234567").unwrap(), "1234567");
    // Timestamps and other query parameters don't change the id.
    assert_eq!(extract_video_id("https://www.twitch.tv/videos/2686951727?t=1h2m3s").unwrap(),
               "2686951727");
}

#[test]
fn test_extract_bare_id() {
    assert_eq!(extract_video_id("2686951727").unwrap(), "2686951727");
    assert_eq!(extract_video_id("7").unwrap(), "7");
}

#[test]
fn test_extract_malformed() {
    assert!(extract_video_id("").is_err());
    assert!(extract_video_id("https://www.twitch.tv/somechannel").is_err());
    assert!(extract_video_id("https://www.twitch.tv/videos/").is_err());
    assert!(extract_video_id("https://www.twitch.tv/videos/abcdef").is_err());
    assert!(extract_video_id("2686951727abc").is_err());
    assert!(matches!(extract_video_id("not a url"),
                     Err(TwitchVodError::InvalidVodUrl(_))));
}
