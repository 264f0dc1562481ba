//! Support for downloading Twitch VOD content from its HLS playback manifest.

use std::cmp::{max, min};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use fs_err as fs;
use futures_util::StreamExt;
use governor::{Quota, RateLimiter};
use tracing::{info, warn};
use url::Url;
use crate::TwitchVodError;
use crate::ffmpeg::{container_has_video, remux_local_playlist, stream_remote_playlist};
use crate::hls;
use crate::twitch::{extract_video_id, TwitchClient, VideoMetadata};

/// A `Client` from the `reqwest` crate, that we use to download content over HTTP.
pub type HttpClient = reqwest::Client;

/// The number of media segments downloaded in parallel, unless overridden.
pub const DEFAULT_CONCURRENCY: usize = 16;


/// Receives updates concerning the progression of the download, and can display this information
/// to the user, for example using a progress bar.
pub trait ProgressObserver: Send + Sync {
    fn update(&self, percent: u32, message: &str);
}


/// Preference for retrieving the variant stream with highest quality (and highest file size) or
/// lowest quality (and lowest file size).
#[derive(PartialEq, Eq, Default)]
pub enum QualityPreference { Lowest, #[default] Highest }


/// The VodDownloader allows the download of a recorded Twitch broadcast (VOD). This involves
/// resolving the VOD URL to a signed HLS manifest URL via the Twitch GraphQL API, selecting a
/// variant stream from the master playlist, mirroring the encryption keys and media segments of
/// the media playlist to a local directory, then muxing the stream into a single MP4 file using
/// ffmpeg run as a subprocess.
pub struct VodDownloader {
    pub vod_url: String,
    pub output_path: Option<PathBuf>,
    http_client: Option<HttpClient>,
    client_id: Option<String>,
    gql_url: Option<Url>,
    usher_base: Option<Url>,
    quality_preference: QualityPreference,
    concurrency: usize,
    max_error_count: u32,
    progress_observers: Vec<Arc<dyn ProgressObserver>>,
    sleep_between_requests: u8,
    rate_limit: u64,
    verbosity: u8,
    keep_segments: Option<PathBuf>,
    record_metainformation: bool,
    pub ffmpeg_location: String,
}

/// The VodDownloader follows the builder pattern to allow various optional arguments concerning
/// the download of the VOD (quality preference, segment download concurrency, specifying an HTTP
/// proxy via a custom reqwest Client, etc.).
///
/// Example
/// ```no_run
/// use twitch_vod::fetch::VodDownloader;
///
/// # async fn run() {
/// let url = "https://www.twitch.tv/videos/2686951727";
/// match VodDownloader::new(url)
///        .best_quality()
///        .download()
///        .await
/// {
///    Ok(path) => println!("Downloaded to {path:?}"),
///    Err(e) => eprintln!("Download failed: {e}"),
/// }
/// # }
/// ```
impl VodDownloader {
    /// Create a `VodDownloader` for the specified Twitch VOD URL (or bare numeric video id).
    pub fn new(vod_url: &str) -> VodDownloader {
        VodDownloader {
            vod_url: String::from(vod_url),
            output_path: None,
            http_client: None,
            client_id: None,
            gql_url: None,
            usher_base: None,
            quality_preference: QualityPreference::Highest,
            concurrency: DEFAULT_CONCURRENCY,
            max_error_count: 10,
            progress_observers: vec![],
            sleep_between_requests: 0,
            rate_limit: 0,
            verbosity: 0,
            keep_segments: None,
            record_metainformation: true,
            ffmpeg_location: if cfg!(target_os = "windows") {
                String::from("ffmpeg.exe")
            } else {
                String::from("ffmpeg")
            },
        }
    }

    /// Specify the reqwest Client to be used for HTTP requests that download the media content.
    /// Allows you to specify a proxy, the user agent, custom request headers, request timeouts,
    /// additional root certificates to trust, etc.
    pub fn with_http_client(mut self, client: HttpClient) -> VodDownloader {
        self.http_client = Some(client);
        self
    }

    /// Use `client_id` instead of the Twitch web player Client-ID on GraphQL requests.
    pub fn with_client_id(mut self, client_id: &str) -> VodDownloader {
        self.client_id = Some(String::from(client_id));
        self
    }

    /// Address GraphQL requests to `gql_url` and playlist requests to `usher_base` instead of the
    /// standard Twitch endpoints. Used by our test harness to point at a local server.
    pub fn with_endpoints(mut self, gql_url: Url, usher_base: Url) -> VodDownloader {
        self.gql_url = Some(gql_url);
        self.usher_base = Some(usher_base);
        self
    }

    /// Add an observer implementing the ProgressObserver trait, that will receive updates
    /// concerning the progression of the download (allows implementation of a progress bar, for
    /// example).
    pub fn add_progress_observer(mut self, observer: Arc<dyn ProgressObserver>) -> VodDownloader {
        self.progress_observers.push(observer);
        self
    }

    /// If the master playlist offers several variant streams with different bitrates (levels of
    /// quality), select the variant with the highest bitrate (largest output file). This is the
    /// default.
    pub fn best_quality(mut self) -> VodDownloader {
        self.quality_preference = QualityPreference::Highest;
        self
    }

    /// If the master playlist offers several variant streams with different bitrates (levels of
    /// quality), select the variant with the lowest bitrate (smallest output file).
    pub fn worst_quality(mut self) -> VodDownloader {
        self.quality_preference = QualityPreference::Lowest;
        self
    }

    /// The number of media segments downloaded in parallel (default
    /// [`DEFAULT_CONCURRENCY`]). A value of 1 downloads segments sequentially.
    pub fn concurrency(mut self, count: usize) -> VodDownloader {
        self.concurrency = max(count, 1);
        self
    }

    /// The upper limit on the number of non-transient network errors encountered for this
    /// download before we abort the download. Transient network errors such as an HTTP 408
    /// "request timeout" are retried automatically with an exponential backoff mechanism, and do
    /// not count towards this upper limit. The default is to fail after 10 non-transient network
    /// errors.
    pub fn max_error_count(mut self, count: u32) -> VodDownloader {
        self.max_error_count = count;
        self
    }

    /// Specify a number of seconds to sleep after each media segment download (default 0).
    pub fn sleep_between_requests(mut self, seconds: u8) -> VodDownloader {
        self.sleep_between_requests = seconds;
        self
    }

    /// A maximal limit on the network bandwidth consumed to download media segments, expressed in
    /// octets (bytes) per second. No limit on bandwidth if set to zero (the default value).
    /// Limiting bandwidth below 50kB/s is not recommended, as the downloader may fail to respect
    /// this limit.
    pub fn with_rate_limit(mut self, bps: u64) -> VodDownloader {
        if bps < 10 * 1024 {
            warn!("Limiting bandwidth below 10kB/s is unlikely to be stable");
        }
        self.rate_limit = bps;
        self
    }

    /// Mirror the playlist, keys and media segments into the directory `segment_path` instead of
    /// a temporary directory that is deleted once muxing finishes. The directory will be created
    /// if it does not exist.
    pub fn keep_segments_in<P: Into<PathBuf>>(mut self, segment_path: P) -> VodDownloader {
        self.keep_segments = Some(segment_path.into());
        self
    }

    /// If `record` is true, record metainformation concerning the media content (origin URL,
    /// title, broadcaster) as extended attributes in the output file (default true).
    pub fn record_metainformation(mut self, record: bool) -> VodDownloader {
        self.record_metainformation = record;
        self
    }

    /// Set the verbosity level of the download process.
    ///
    /// # Arguments
    ///
    /// * Level - an integer specifying the verbosity level.
    /// - 0: no information is printed
    /// - 1: basic information on the VOD and the selected variant stream
    /// - 2: information above + download speed
    /// - 3 or larger: information above + size of each downloaded segment
    pub fn verbosity(mut self, level: u8) -> VodDownloader {
        self.verbosity = level;
        self
    }

    /// Specify the location of the ffmpeg application, if not located in the PATH.
    pub fn with_ffmpeg(mut self, ffmpeg_path: &str) -> VodDownloader {
        self.ffmpeg_location = String::from(ffmpeg_path);
        self
    }

    fn http(&self) -> HttpClient {
        self.http_client.clone().unwrap_or_else(|| {
            reqwest::Client::builder()
                .timeout(Duration::new(30, 0))
                .user_agent(concat!("twitch-vod/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default()
        })
    }

    fn api(&self) -> TwitchClient {
        let mut api = match (&self.gql_url, &self.usher_base) {
            (Some(gql), Some(usher)) =>
                TwitchClient::with_endpoints(self.http(), gql.clone(), usher.clone()),
            _ => TwitchClient::new(self.http()),
        };
        if let Some(id) = &self.client_id {
            api = api.with_client_id(id.clone());
        }
        api
    }

    /// Resolve the VOD URL to its metadata and a signed manifest URL: extract the video id, fetch
    /// the video metadata and a playback access token from the GraphQL API, and build the usher
    /// URL from the token fields.
    pub async fn resolve_manifest_url(&self) -> Result<(VideoMetadata, Url), TwitchVodError> {
        let video_id = extract_video_id(&self.vod_url)?;
        let api = self.api();
        let metadata = api.video_metadata(&video_id).await?;
        let token = api.playback_access_token(&video_id).await?;
        let manifest_url = api.manifest_url(&video_id, &token)?;
        Ok((metadata, manifest_url))
    }

    /// Fetch the playlist at `manifest_url` and reduce it to a media playlist. The usher service
    /// normally responds with a master playlist, from which we select a variant stream according
    /// to the quality preference and fetch its media playlist; a media playlist response is used
    /// as is. Returns the URL the media playlist was fetched from (needed to resolve the relative
    /// URIs it contains) together with its text.
    pub async fn fetch_media_playlist(&self, manifest_url: &Url) -> Result<(Url, String), TwitchVodError> {
        let client = self.http();
        let playlist = fetch_text(&client, manifest_url, "fetching HLS playlist").await?;
        if !hls::is_master_playlist(&playlist) {
            return Ok((manifest_url.clone(), playlist));
        }
        let variants = hls::parse_master_playlist(&playlist);
        let Some(variant) = hls::select_variant(&variants, &self.quality_preference) else {
            return Err(TwitchVodError::Parsing(
                String::from("no variant streams in master playlist")));
        };
        if self.verbosity > 0 {
            println!("Selected variant stream with bandwidth {}b/s", variant.bandwidth);
        }
        let variant_url = hls::resolve_with_query(manifest_url, &variant.uri, manifest_url.query())?;
        let playlist = fetch_text(&client, &variant_url, "fetching variant media playlist").await?;
        Ok((variant_url, playlist))
    }

    /// Mirror the media playlist into the directory `dir`: download every encryption key and
    /// every media segment it references, then write a rewritten playlist `local.m3u8` whose
    /// URIs point at the local copies. Returns the path of the local playlist.
    pub async fn mirror_media_playlist(&self, playlist_url: &Url, playlist: &str, dir: &Path)
                                       -> Result<PathBuf, TwitchVodError> {
        let client = self.http();
        let plan = hls::plan_mirror(playlist, playlist_url, playlist_url.query())?;
        if plan.segments.is_empty() {
            return Err(TwitchVodError::Parsing(
                String::from("media playlist contains no segments")));
        }
        for key in &plan.keys {
            let data = fetch_bytes(&client, &key.url, "fetching HLS encryption key").await?;
            fs::write(dir.join(&key.local_name), &data)
                .map_err(|e| TwitchVodError::Io(e, String::from("writing HLS encryption key")))?;
        }
        info!("Downloading {} segments with {} parallel requests",
              plan.segments.len(), self.concurrency);
        let rate_limiter = if self.rate_limit > 0 {
            let kps = min(self.rate_limit / 1024 + 1, u32::MAX as u64) as u32;
            NonZeroU32::new(kps).map(|quota| RateLimiter::direct(Quota::per_second(quota)))
        } else {
            None
        };
        let start_download = Instant::now();
        let segment_count = plan.segments.len();
        let mut completed = 0usize;
        let mut bytes_downloaded = 0u64;
        let mut download_errors = 0u32;
        let mut fetches = futures_util::stream::iter(plan.segments.iter().map(|segment| {
            let client = client.clone();
            async move {
                let fetched = fetch_bytes(&client, &segment.url, "fetching media segment").await;
                (segment, fetched)
            }
        })).buffer_unordered(self.concurrency);
        while let Some((segment, fetched)) = fetches.next().await {
            match fetched {
                Ok(data) => {
                    if let Some(limiter) = &rate_limiter {
                        let size = min(data.len() / 1024 + 1, u32::MAX as usize);
                        if let Some(cells) = NonZeroU32::new(size as u32) {
                            if limiter.until_n_ready(cells).await.is_err() {
                                return Err(TwitchVodError::Other(
                                    String::from("Bandwidth limit is too low")));
                            }
                        }
                    }
                    if self.verbosity > 2 {
                        println!("  Segment {} -> {} octets", segment.url, data.len());
                    }
                    bytes_downloaded += data.len() as u64;
                    fs::write(dir.join(&segment.local_name), &data)
                        .map_err(|e| TwitchVodError::Io(e, String::from("writing media segment")))?;
                },
                Err(e) => {
                    if self.verbosity > 0 {
                        eprintln!("{e} fetching segment {}", segment.url);
                    }
                    download_errors += 1;
                    if download_errors > self.max_error_count {
                        return Err(TwitchVodError::Network(
                            String::from("more than max_error_count network errors")));
                    }
                },
            }
            completed += 1;
            let percent = (100.0 * completed as f32 / segment_count as f32).ceil() as u32;
            for observer in &self.progress_observers {
                observer.update(percent, "Fetching media segments");
            }
            if self.sleep_between_requests > 0 {
                tokio::time::sleep(Duration::new(self.sleep_between_requests.into(), 0)).await;
            }
        }
        drop(fetches);
        if download_errors > 0 {
            return Err(TwitchVodError::Network(
                format!("{download_errors} segments failed to download")));
        }
        if self.verbosity > 1 {
            let mbytes = bytes_downloaded as f64 / (1024.0 * 1024.0);
            let elapsed = start_download.elapsed();
            println!("  Wrote {mbytes:.1}MB of media segments ({:.1}MB/s)",
                     mbytes / elapsed.as_secs_f64());
        }
        let local_playlist = dir.join("local.m3u8");
        let mut text = plan.lines.join("\n");
        text.push('\n');
        fs::write(&local_playlist, text)
            .map_err(|e| TwitchVodError::Io(e, String::from("writing local playlist")))?;
        Ok(local_playlist)
    }

    /// Prepare a fully local playlist for `manifest_url` in the directory `dir`: fetch the
    /// playlist, select a variant stream if it is a master playlist, and mirror the keys and
    /// media segments of its media playlist. Any failure here (an unusable master playlist as
    /// much as a failed segment) is recoverable, because ffmpeg can still fetch the stream
    /// directly from the remote manifest.
    async fn prepare_local_playlist(&self, manifest_url: &Url, dir: &Path)
                                    -> Result<PathBuf, TwitchVodError> {
        let (playlist_url, playlist) = self.fetch_media_playlist(manifest_url).await?;
        self.mirror_media_playlist(&playlist_url, &playlist, dir).await
    }

    /// Download the VOD to the specified output path, ignoring any path previously registered
    /// with the builder.
    pub async fn download_to<P: Into<PathBuf>>(mut self, out: P) -> Result<PathBuf, TwitchVodError> {
        self.output_path = Some(out.into());
        self.download().await
    }

    /// Download the VOD and mux it to a single output file. If no output path was specified, the
    /// file is named from the sanitised VOD title. Returns the path of the output file.
    pub async fn download(mut self) -> Result<PathBuf, TwitchVodError> {
        if self.http_client.is_none() {
            self.http_client = Some(self.http());
        }
        for observer in &self.progress_observers {
            observer.update(1, "Resolving playback manifest");
        }
        let (metadata, manifest_url) = self.resolve_manifest_url().await?;
        let output_path = match &self.output_path {
            Some(path) => path.clone(),
            None => PathBuf::from(output_filename_for(&metadata)),
        };
        if self.verbosity > 0 {
            let title = metadata.title.as_deref().unwrap_or("<untitled>");
            println!("Downloading {title} to {}", output_path.display());
        }
        // The TempDir is deleted when dropped, so it must outlive the muxing step.
        let mut tmp_dir_holder = None;
        let mirror_dir = match &self.keep_segments {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .map_err(|e| TwitchVodError::Io(e, String::from("creating segment directory")))?;
                dir.clone()
            },
            None => {
                let tmp_dir = tempfile::Builder::new()
                    .prefix("twitchvod")
                    .tempdir()
                    .map_err(|e| TwitchVodError::Io(e, String::from("creating temporary directory")))?;
                let path = tmp_dir.path().to_path_buf();
                tmp_dir_holder = Some(tmp_dir);
                path
            },
        };
        match self.prepare_local_playlist(&manifest_url, &mirror_dir).await {
            Ok(local_playlist) => {
                for observer in &self.progress_observers {
                    observer.update(99, "Muxing media stream");
                }
                remux_local_playlist(&self.ffmpeg_location, &local_playlist, &output_path)?;
            },
            Err(e) => {
                warn!("Could not prepare local playlist: {e}");
                info!("Falling back to streaming ffmpeg on the remote manifest");
                stream_remote_playlist(&self.ffmpeg_location, &manifest_url, &output_path)?;
            },
        }
        drop(tmp_dir_holder);
        if !container_has_video(&output_path) {
            warn!("Muxed output {} does not appear to contain a video track", output_path.display());
        }
        maybe_record_metainformation(&output_path, &self, &metadata);
        for observer in &self.progress_observers {
            observer.update(100, "Done");
        }
        Ok(output_path)
    }
}


/// The default output filename for a VOD: its title, sanitised for use as a filename, with an
/// ".mp4" extension.
pub fn output_filename_for(metadata: &VideoMetadata) -> String {
    let title = metadata.title.as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled");
    let sanitised = sanitise_file_name::sanitise(title);
    if sanitised.is_empty() {
        String::from("Untitled.mp4")
    } else {
        format!("{sanitised}.mp4")
    }
}


fn reqwest_error_transient_p(e: &reqwest::Error) -> bool {
    if e.is_timeout() {
        return true;
    }
    if let Some(s) = e.status() {
        if s == reqwest::StatusCode::REQUEST_TIMEOUT ||
            s == reqwest::StatusCode::TOO_MANY_REQUESTS ||
            s == reqwest::StatusCode::SERVICE_UNAVAILABLE ||
            s == reqwest::StatusCode::GATEWAY_TIMEOUT {
                return true;
            }
    }
    false
}

fn notify_transient(err: &reqwest::Error, dur: Duration) {
    warn!("Transient error after {dur:?}: {err:?}");
}

fn network_error(why: &str, e: impl std::error::Error) -> TwitchVodError {
    TwitchVodError::Network(format!("{why}: {e}"))
}

pub(crate) async fn fetch_text(client: &HttpClient, url: &Url, why: &'static str)
                               -> Result<String, TwitchVodError> {
    let fetch = || async {
        client.get(url.clone())
            .header("Accept", "application/vnd.apple.mpegurl,*/*")
            .send().await?
            .error_for_status()
    };
    let response = fetch
        .retry(ExponentialBuilder::default())
        .when(reqwest_error_transient_p)
        .notify(notify_transient)
        .await
        .map_err(|e| network_error(why, e))?;
    response.text().await
        .map_err(|e| network_error(why, e))
}

pub(crate) async fn fetch_bytes(client: &HttpClient, url: &Url, why: &'static str)
                                -> Result<Bytes, TwitchVodError> {
    let fetch = || async {
        client.get(url.clone())
            .header("Accept", "*/*")
            .send().await?
            .error_for_status()
    };
    let response = fetch
        .retry(ExponentialBuilder::default())
        .when(reqwest_error_transient_p)
        .notify(notify_transient)
        .await
        .map_err(|e| network_error(why, e))?;
    response.bytes().await
        .map_err(|e| network_error(why, e))
}


// As per https://www.freedesktop.org/wiki/CommonExtendedAttributes/, set extended filesystem
// attributes indicating metadata such as the origin URL, title and creator. This functionality
// is only active on platforms where the xattr crate supports extended attributes (currently
// Android, Linux, MacOS, FreeBSD, and NetBSD); on unsupported Unix platforms it's a no-op.
#[allow(unused_variables)]
fn maybe_record_metainformation(path: &Path, downloader: &VodDownloader, metadata: &VideoMetadata) {
    #[cfg(target_family = "unix")]
    if downloader.record_metainformation {
        if let Ok(origin_url) = Url::parse(&downloader.vod_url) {
            // Don't record the origin URL if it contains sensitive information such as passwords
            if origin_url.username().is_empty() && origin_url.password().is_none() {
                if xattr::set(path, "user.xdg.origin.url", downloader.vod_url.as_bytes()).is_err() {
                    info!("Failed to set user.xdg.origin.url xattr on output file");
                }
            }
        }
        if let Some(title) = &metadata.title {
            if xattr::set(path, "user.dublincore.title", title.as_bytes()).is_err() {
                info!("Failed to set user.dublincore.title xattr on output file");
            }
        }
        if let Some(creator) = metadata.owner.as_ref()
            .and_then(|o| o.display_name.as_deref().or(o.login.as_deref()))
        {
            if xattr::set(path, "user.dublincore.creator", creator.as_bytes()).is_err() {
                info!("Failed to set user.dublincore.creator xattr on output file");
            }
        }
    }
}
