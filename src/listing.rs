//! Listing of recently published TFT VOD records from the metatft API.
//
// The API returns records whose fields are partly embedded JSON: objects serialized as strings
// inside the outer JSON document. We parse those embedded documents before reducing each record
// to the small summary callers care about (which broadcast, which VOD, which ranked account).

use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;
use crate::TwitchVodError;
use crate::twitch::extract_video_id;

/// The endpoint serving recently published TFT VOD records.
pub const VODS_API_BASE: &str = "https://api.metatft.com/tft-vods/latest";


/// Build the listing URL for a page of VOD records. The API accepts a page size `limit` between
/// 1 and 100, and a record `offset` into the listing.
pub fn vods_endpoint(limit: u32, offset: u32) -> Result<Url, TwitchVodError> {
    if limit == 0 || limit > 100 {
        return Err(TwitchVodError::Other(
            format!("invalid listing limit {limit}: must be between 1 and 100")));
    }
    let mut url = Url::parse(VODS_API_BASE)
        .map_err(|e| TwitchVodError::Parsing(format!("parsing VOD listing URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("limit", &limit.to_string())
        .append_pair("offset", &offset.to_string());
    Ok(url)
}

/// The Twitch account a VOD record belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TwitchAccount {
    pub name: Option<String>,
    pub id: Option<String>,
}

/// The ranked league account associated with a VOD record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeagueAccount {
    pub riot_id: Option<String>,
    pub rating_numeric: Option<i64>,
    pub region: Option<String>,
    pub games_played: Option<i64>,
}

/// A VOD record from the listing API, reduced to the fields of interest. The `vod_id` can be
/// handed directly to [`crate::fetch::VodDownloader`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VodRecord {
    pub twitch: TwitchAccount,
    pub vod_id: Option<String>,
    pub league: LeagueAccount,
    pub game_version: Option<String>,
}


fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse any field whose value is an embedded JSON document serialized as a string, replacing the
/// string with the parsed document. Strings that don't parse are left as they are.
pub fn normalize_embedded_json(record: &mut Map<String, Value>) {
    for (_key, val) in record.iter_mut() {
        if let Value::String(s) = val {
            if s.contains('{') {
                if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                    *val = parsed;
                }
            }
        }
    }
}

/// Reduce a raw listing record to a [`VodRecord`]. Several of the fields have a fallback
/// location: the VOD id may only be present as a VOD URL, and the ranked account information may
/// only be present in the match data participant list.
pub fn simplify_record(record: &mut Map<String, Value>) -> VodRecord {
    normalize_embedded_json(record);

    let twitch_account = record.get("twitch_account_info");
    let twitch = TwitchAccount {
        name: twitch_account
            .and_then(|t| t.get("name"))
            .and_then(value_to_string)
            .or_else(|| record.get("twitch_login").and_then(value_to_string)),
        id: twitch_account
            .and_then(|t| t.get("id"))
            .and_then(value_to_string),
    };

    let mut vod_id = record.get("vod_info")
        .and_then(|v| v.get("id"))
        .and_then(value_to_string);
    if vod_id.is_none() {
        if let Some(vod_url) = record.get("twitch_vod").and_then(Value::as_str) {
            vod_id = extract_video_id(vod_url).ok();
        }
    }

    let league = if let Some(Value::Object(la)) = record.get("league_account_info") {
        LeagueAccount {
            riot_id: la.get("riot_id").and_then(value_to_string),
            rating_numeric: la.get("rating_numeric").and_then(Value::as_i64),
            region: la.get("region").and_then(value_to_string),
            games_played: la.get("num_played").and_then(Value::as_i64),
        }
    } else {
        // Fall back to the first entry of the match data participant list.
        let participant = record.get("match_data")
            .and_then(|md| md.get("_metatft"))
            .and_then(|mt| mt.get("participant_info"))
            .and_then(|pi| pi.as_array())
            .and_then(|pi| pi.first());
        match participant {
            Some(p) => {
                let ranked = p.get("ranked");
                LeagueAccount {
                    riot_id: p.get("riot_id").and_then(value_to_string),
                    rating_numeric: ranked
                        .and_then(|r| r.get("rating_numeric"))
                        .and_then(Value::as_i64),
                    region: p.get("summoner_region").and_then(value_to_string),
                    games_played: ranked
                        .and_then(|r| r.get("num_games"))
                        .and_then(Value::as_i64),
                }
            },
            None => LeagueAccount::default(),
        }
    };

    let game_version = record.get("match_data")
        .and_then(|md| md.get("info"))
        .and_then(|info| info.get("game_version"))
        .and_then(value_to_string);

    VodRecord { twitch, vod_id, league, game_version }
}

/// Fetch a page of VOD records from the listing API and reduce each record. A response holding a
/// single record object rather than an array is accepted.
pub async fn latest_vods(client: &reqwest::Client, limit: u32, offset: u32)
                         -> Result<Vec<VodRecord>, TwitchVodError> {
    latest_vods_from(client, &vods_endpoint(limit, offset)?).await
}

/// As [`latest_vods`], fetching from an explicit listing URL.
pub async fn latest_vods_from(client: &reqwest::Client, url: &Url)
                              -> Result<Vec<VodRecord>, TwitchVodError> {
    let listing: Value = client.get(url.clone())
        .send().await
        .map_err(|e| TwitchVodError::Network(format!("requesting VOD listing: {e}")))?
        .error_for_status()
        .map_err(|e| TwitchVodError::Network(format!("requesting VOD listing: {e}")))?
        .json().await
        .map_err(|e| TwitchVodError::Parsing(format!("parsing VOD listing: {e}")))?;
    let records = match listing {
        Value::Array(records) => records,
        record @ Value::Object(_) => vec![record],
        _ => return Err(TwitchVodError::Parsing(
            String::from("VOD listing is neither an array nor an object"))),
    };
    Ok(records.into_iter()
       .filter_map(|r| match r {
           Value::Object(mut record) => Some(simplify_record(&mut record)),
           _ => None,
       })
       .collect())
}
