// twitch-vod: download a Twitch VOD from the command line.
//
// Usage: twitch-vod [options] <VOD-URL> [OUTPUT-FILE]

use std::sync::Arc;
use clap::{Arg, ArgAction};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use twitch_vod::fetch::{ProgressObserver, VodDownloader, DEFAULT_CONCURRENCY};


struct DownloadProgressBar {
    bar: ProgressBar,
}

impl DownloadProgressBar {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::with_template("{msg:24} {wide_bar} {percent}%") {
            bar.set_style(style);
        }
        Self { bar }
    }
}

impl ProgressObserver for DownloadProgressBar {
    fn update(&self, percent: u32, message: &str) {
        if percent <= 100 {
            self.bar.set_position(percent.into());
        }
        self.bar.set_message(message.to_string());
    }
}


#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(false)
        .init();

    let matches = clap::Command::new("twitch-vod")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Download a Twitch VOD by resolving its playback manifest and muxing the stream with ffmpeg")
        .arg(Arg::new("quality")
             .long("quality")
             .value_parser(["best", "worst"])
             .default_value("best")
             .help("Variant stream to select from the master playlist"))
        .arg(Arg::new("concurrency")
             .long("concurrency")
             .value_name("COUNT")
             .value_parser(clap::value_parser!(usize))
             .help("Number of media segments to download in parallel"))
        .arg(Arg::new("keep-segments")
             .long("keep-segments")
             .value_name("DIR")
             .help("Mirror the playlist and media segments into DIR and keep them after muxing"))
        .arg(Arg::new("ffmpeg")
             .long("ffmpeg")
             .value_name("PATH")
             .help("Location of the ffmpeg application, if not in the PATH"))
        .arg(Arg::new("verbose")
             .short('v')
             .long("verbose")
             .action(ArgAction::Count)
             .help("Print more information about the download"))
        .arg(Arg::new("url")
             .value_name("VOD-URL")
             .required(true)
             .index(1)
             .help("URL of the Twitch VOD (or a bare numeric video id)"))
        .arg(Arg::new("output")
             .value_name("OUTPUT-FILE")
             .index(2)
             .help("Output filename (defaults to the VOD title)"))
        .get_matches();

    let url: &String = matches.get_one("url").expect("VOD-URL is a required argument");
    let mut downloader = VodDownloader::new(url)
        .add_progress_observer(Arc::new(DownloadProgressBar::new()))
        .verbosity(matches.get_count("verbose"));
    if matches.get_one::<String>("quality").is_some_and(|q| q.eq("worst")) {
        downloader = downloader.worst_quality();
    }
    let concurrency = matches.get_one::<usize>("concurrency")
        .copied()
        .unwrap_or(DEFAULT_CONCURRENCY);
    downloader = downloader.concurrency(concurrency);
    if let Some(dir) = matches.get_one::<String>("keep-segments") {
        downloader = downloader.keep_segments_in(dir);
    }
    if let Some(ffmpeg) = matches.get_one::<String>("ffmpeg") {
        downloader = downloader.with_ffmpeg(ffmpeg);
    }
    let outcome = match matches.get_one::<String>("output") {
        Some(output) => downloader.download_to(output).await,
        None => downloader.download().await,
    };
    match outcome {
        Ok(path) => println!("Downloaded VOD to {}", path.display()),
        Err(e) => {
            eprintln!("Download failed: {e}");
            std::process::exit(1);
        },
    }
}
