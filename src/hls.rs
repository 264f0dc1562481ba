//! Handling for HLS (M3U8) playlist content.
//
// We only implement the minimal subset of the M3U8 format needed to mirror a Twitch VOD: variant
// selection from a master playlist, and rewriting a media playlist so that its key and segment
// URIs point at local files. Demuxing the media segments themselves is left to ffmpeg.

use std::sync::LazyLock;
use regex::Regex;
use url::Url;
use crate::TwitchVodError;
use crate::fetch::QualityPreference;

static BANDWIDTH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"BANDWIDTH=(\d+)").unwrap());


/// A master playlist lists the variant streams available; a media playlist lists segments.
pub fn is_master_playlist(playlist: &str) -> bool {
    playlist.contains("#EXT-X-STREAM-INF")
}

/// One variant stream advertised by a master playlist.
#[derive(Debug, Clone)]
pub struct VariantStream {
    pub bandwidth: u64,
    pub uri: String,
}

/// Parse the variant streams from a master playlist. Each `#EXT-X-STREAM-INF` line is followed
/// (possibly after blank lines) by the URI of the variant's media playlist. A variant without a
/// BANDWIDTH attribute is retained with bandwidth zero.
pub fn parse_master_playlist(playlist: &str) -> Vec<VariantStream> {
    let lines: Vec<&str> = playlist.lines().collect();
    let mut variants = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("#EXT-X-STREAM-INF") {
            let bandwidth = BANDWIDTH_RE.captures(line)
                .and_then(|c| c[1].parse().ok())
                .unwrap_or(0);
            let mut j = i + 1;
            while j < lines.len() && lines[j].trim().is_empty() {
                j += 1;
            }
            if j < lines.len() {
                variants.push(VariantStream { bandwidth, uri: lines[j].trim().to_string() });
            }
        }
    }
    variants
}

/// Select the variant stream to download, by BANDWIDTH.
pub fn select_variant<'a>(variants: &'a [VariantStream], preference: &QualityPreference)
                          -> Option<&'a VariantStream> {
    match preference {
        QualityPreference::Highest => variants.iter().max_by_key(|v| v.bandwidth),
        QualityPreference::Lowest => variants.iter().min_by_key(|v| v.bandwidth),
    }
}

/// Parse the attribute list of an `#EXT-X-KEY` line, such as
/// `#EXT-X-KEY:METHOD=AES-128,URI="https://...",IV=0x9c...`. Commas inside a quoted attribute
/// value do not separate attributes.
pub fn parse_key_attributes(line: &str) -> Vec<(String, String)> {
    let rest = match line.split_once(':') {
        Some((_, rest)) => rest,
        None => return Vec::new(),
    };
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    for c in rest.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                field.push(c);
            },
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if !field.is_empty() {
        fields.push(field);
    }
    fields.iter()
        .filter_map(|f| f.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect()
}

/// Resolve a possibly-relative playlist URI against the URL of the playlist it appeared in.
/// Twitch requires the token/sig query parameters of the playlist request on key and segment
/// requests, so if the resolved URL has no query string of its own, `original_query` is attached.
pub fn resolve_with_query(base: &Url, uri: &str, original_query: Option<&str>)
                          -> Result<Url, TwitchVodError> {
    let mut resolved = base.join(uri)
        .map_err(|e| TwitchVodError::Parsing(format!("resolving playlist URI {uri}: {e}")))?;
    if resolved.query().is_none() {
        if let Some(q) = original_query {
            if !q.is_empty() {
                resolved.set_query(Some(q));
            }
        }
    }
    Ok(resolved)
}

/// A media segment to be mirrored to local storage.
#[derive(Debug, Clone)]
pub struct SegmentRef {
    pub index: usize,
    pub url: Url,
    pub local_name: String,
}

/// An encryption key file to be mirrored to local storage.
#[derive(Debug, Clone)]
pub struct KeyRef {
    pub url: Url,
    pub local_name: String,
}

/// The plan for mirroring a media playlist: the remote objects to fetch, each with the local
/// filename it will be stored under, and the rewritten playlist lines referencing those local
/// filenames.
#[derive(Debug, Clone)]
pub struct MirrorPlan {
    pub lines: Vec<String>,
    pub segments: Vec<SegmentRef>,
    pub keys: Vec<KeyRef>,
}

// Filename extension of a playlist URI, ignoring any query string.
fn uri_extension(uri: &str) -> String {
    let path = uri.split('?').next().unwrap_or(uri);
    let filename = path.rsplit_once('/').map_or(path, |(_, f)| f);
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{ext}"),
        _ => String::from(".ts"),
    }
}

/// Walk the lines of a media playlist, assigning a local filename to every key and segment URI
/// and rewriting the playlist to reference the local copies. Comment and tag lines other than
/// `#EXT-X-KEY` pass through unmodified.
pub fn plan_mirror(playlist: &str, playlist_url: &Url, original_query: Option<&str>)
                   -> Result<MirrorPlan, TwitchVodError> {
    let mut lines = Vec::new();
    let mut segments: Vec<SegmentRef> = Vec::new();
    let mut keys: Vec<KeyRef> = Vec::new();
    for line in playlist.lines() {
        let line = line.trim_end();
        if line.starts_with("#EXT-X-KEY") {
            let attrs = parse_key_attributes(line);
            if attrs.iter().any(|(k, _)| k == "URI") {
                let local_name = format!("key_{}", keys.len());
                let mut rewritten = Vec::new();
                for (k, v) in &attrs {
                    if k == "URI" {
                        let url = resolve_with_query(playlist_url, v, original_query)?;
                        keys.push(KeyRef { url, local_name: local_name.clone() });
                        rewritten.push(format!("URI=\"{local_name}\""));
                    } else {
                        rewritten.push(format!("{k}={v}"));
                    }
                }
                lines.push(format!("#EXT-X-KEY:{}", rewritten.join(",")));
            } else {
                lines.push(line.to_string());
            }
        } else if line.is_empty() || line.starts_with('#') {
            lines.push(line.to_string());
        } else {
            let uri = line.trim();
            let url = resolve_with_query(playlist_url, uri, original_query)?;
            let local_name = format!("segment_{:06}{}", segments.len(), uri_extension(uri));
            segments.push(SegmentRef { index: segments.len(), url, local_name: local_name.clone() });
            lines.push(local_name);
        }
    }
    Ok(MirrorPlan { lines, segments, keys })
}
