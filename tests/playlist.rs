// Tests for HLS playlist handling: variant selection from a master playlist, EXT-X-KEY attribute
// parsing, and the rewrite of a media playlist into its local mirror.
//
// To run tests while enabling printing to stdout/stderr
//
//    cargo test --test playlist -- --show-output

use pretty_assertions::assert_eq;
use url::Url;
use twitch_vod::fetch::QualityPreference;
use twitch_vod::hls::{is_master_playlist, parse_key_attributes, parse_master_playlist,
                      plan_mirror, resolve_with_query, select_variant};


static MASTER: &str = r#"#EXTM3U
#EXT-X-TWITCH-INFO:NODE="video-edge-abc.fra02",MANIFEST-NODE="video-weaver.fra02"
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="chunked",NAME="1080p60",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:BANDWIDTH=6000000,RESOLUTION=1920x1080,CODECS="avc1.64002A,mp4a.40.2",VIDEO="chunked",FRAME-RATE=60.000
https://example.com/vod/chunked/index-dvr.m3u8
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="720p30",NAME="720p",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:BANDWIDTH=2373000,RESOLUTION=1280x720,CODECS="avc1.4D401F,mp4a.40.2",VIDEO="720p30"

https://example.com/vod/720p30/index-dvr.m3u8
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="audio_only",NAME="Audio Only",AUTOSELECT=NO,DEFAULT=NO
#EXT-X-STREAM-INF:BANDWIDTH=160000,CODECS="mp4a.40.2",VIDEO="audio_only"
https://example.com/vod/audio_only/index-dvr.m3u8
"#;

#[test]
fn test_master_playlist_detection() {
    assert!(is_master_playlist(MASTER));
    assert!(!is_master_playlist("#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\n0.ts\n"));
}

#[test]
fn test_variant_selection() {
    let variants = parse_master_playlist(MASTER);
    assert_eq!(variants.len(), 3);
    // A blank line between EXT-X-STREAM-INF and the variant URI is tolerated.
    assert_eq!(variants[1].bandwidth, 2373000);
    assert_eq!(variants[1].uri, "https://example.com/vod/720p30/index-dvr.m3u8");
    let best = select_variant(&variants, &QualityPreference::Highest).unwrap();
    assert_eq!(best.bandwidth, 6000000);
    assert_eq!(best.uri, "https://example.com/vod/chunked/index-dvr.m3u8");
    let worst = select_variant(&variants, &QualityPreference::Lowest).unwrap();
    assert_eq!(worst.bandwidth, 160000);
    assert!(select_variant(&[], &QualityPreference::Highest).is_none());
}

#[test]
fn test_key_attribute_parsing() {
    // Commas inside the quoted URI must not split the attribute list.
    let attrs = parse_key_attributes(
        r#"#EXT-X-KEY:METHOD=AES-128,URI="https://example.com/key?a=1,b=2",IV=0x9c7db8778935cf0f6b79d3fbbb0ab13c"#);
    assert_eq!(attrs.len(), 3);
    assert_eq!(attrs[0], (String::from("METHOD"), String::from("AES-128")));
    assert_eq!(attrs[1], (String::from("URI"), String::from("https://example.com/key?a=1,b=2")));
    assert_eq!(attrs[2], (String::from("IV"), String::from("0x9c7db8778935cf0f6b79d3fbbb0ab13c")));
    assert!(parse_key_attributes("#EXT-X-KEY").is_empty());
}

#[test]
fn test_resolve_with_query() {
    let playlist_url = Url::parse("https://example.com/vod/chunked/index-dvr.m3u8?sig=s&token=t").unwrap();
    let query = playlist_url.query().map(String::from);
    let query = query.as_deref();

    // A relative URI resolves against the playlist directory and inherits the query.
    let seg = resolve_with_query(&playlist_url, "0.ts", query).unwrap();
    assert_eq!(seg.as_str(), "https://example.com/vod/chunked/0.ts?sig=s&token=t");

    // An absolute URL with its own query is left alone.
    let key = resolve_with_query(&playlist_url, "https://keys.example.com/k?id=9", query).unwrap();
    assert_eq!(key.as_str(), "https://keys.example.com/k?id=9");

    // An absolute-path URI resolves against the host and inherits the query.
    let other = resolve_with_query(&playlist_url, "/vod/720p30/1.ts", query).unwrap();
    assert_eq!(other.as_str(), "https://example.com/vod/720p30/1.ts?sig=s&token=t");
}

#[test]
fn test_plan_mirror() {
    let playlist_url = Url::parse("https://example.com/vod/chunked/index-dvr.m3u8?sig=s&token=t").unwrap();
    let playlist = r#"#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-PLAYLIST-TYPE:VOD
#EXT-X-KEY:METHOD=AES-128,URI="enc.key",IV=0x0000000000000000000000000000002a
#EXTINF:10.000,
0.ts
#EXTINF:10.000,
1.ts
#EXTINF:3.500,
2.mp4
#EXT-X-ENDLIST
"#;
    let plan = plan_mirror(playlist, &playlist_url, playlist_url.query()).unwrap();

    assert_eq!(plan.keys.len(), 1);
    assert_eq!(plan.keys[0].local_name, "key_0");
    assert_eq!(plan.keys[0].url.as_str(), "https://example.com/vod/chunked/enc.key?sig=s&token=t");

    assert_eq!(plan.segments.len(), 3);
    assert_eq!(plan.segments[0].local_name, "segment_000000.ts");
    assert_eq!(plan.segments[0].url.as_str(), "https://example.com/vod/chunked/0.ts?sig=s&token=t");
    // The local filename keeps the URI's extension.
    assert_eq!(plan.segments[2].local_name, "segment_000002.mp4");
    assert_eq!(plan.segments[2].index, 2);

    // Tag and comment lines pass through; key and segment URIs are rewritten to local names.
    assert_eq!(plan.lines, vec![
        "#EXTM3U",
        "#EXT-X-VERSION:3",
        "#EXT-X-TARGETDURATION:10",
        "#EXT-X-PLAYLIST-TYPE:VOD",
        "#EXT-X-KEY:METHOD=AES-128,URI=\"key_0\",IV=0x0000000000000000000000000000002a",
        "#EXTINF:10.000,",
        "segment_000000.ts",
        "#EXTINF:10.000,",
        "segment_000001.ts",
        "#EXTINF:3.500,",
        "segment_000002.mp4",
        "#EXT-X-ENDLIST",
    ]);
}
