/// Muxing support using ffmpeg as a subprocess.
///
/// The HLS segments served by Twitch are MPEG-TS containers; ffmpeg demuxes them and remuxes the
/// streams into the output container without reencoding (`-c copy`). The `aac_adtstoasc`
/// bitstream filter converts the ADTS framing used in MPEG-TS audio to the format expected in an
/// MP4 container.

use std::path::Path;
use std::process::Command;
use url::Url;
use crate::TwitchVodError;


/// Remux a local playlist (produced by mirroring the media playlist) into `output_path`. The
/// protocol whitelist is needed because some ffmpeg builds refuse file:// input for HLS by
/// default.
pub(crate) fn remux_local_playlist(ffmpeg: &str, playlist: &Path, output_path: &Path)
                                   -> Result<(), TwitchVodError> {
    let ffmpeg = Command::new(ffmpeg)
        .args(["-hide_banner", "-nostats",
               "-loglevel", "error",
               "-y",  // overwrite output file if it exists
               "-protocol_whitelist", "file,http,https,tcp,tls"])
        .arg("-i").arg(playlist)
        .args(["-c", "copy",
               "-bsf:a", "aac_adtstoasc"])
        .arg(output_path)
        .output()
        .map_err(|e| TwitchVodError::Io(e, String::from("spawning ffmpeg subprocess")))?;
    if ffmpeg.status.success() {
        Ok(())
    } else {
        let msg = String::from_utf8_lossy(&ffmpeg.stderr);
        Err(TwitchVodError::Muxing(format!("running ffmpeg: {msg}")))
    }
}

/// Let ffmpeg fetch the HLS stream itself from the remote manifest URL. Slower than mirroring
/// the segments first (ffmpeg downloads sequentially), but has no other requirements; used as
/// the fallback when mirroring fails.
pub(crate) fn stream_remote_playlist(ffmpeg: &str, manifest_url: &Url, output_path: &Path)
                                     -> Result<(), TwitchVodError> {
    let ffmpeg = Command::new(ffmpeg)
        .args(["-hide_banner", "-nostats",
               "-loglevel", "error",
               "-y",
               "-i", manifest_url.as_str(),
               "-c", "copy",
               "-bsf:a", "aac_adtstoasc"])
        .arg(output_path)
        .output()
        .map_err(|e| TwitchVodError::Io(e, String::from("spawning ffmpeg subprocess")))?;
    if ffmpeg.status.success() {
        Ok(())
    } else {
        let msg = String::from_utf8_lossy(&ffmpeg.stderr);
        Err(TwitchVodError::Muxing(format!("running ffmpeg: {msg}")))
    }
}

// Does the media container at path contain a video track? Uses ffprobe as a subprocess.
#[tracing::instrument(level="trace")]
pub(crate) fn container_has_video(path: &Path) -> bool {
    if let Ok(meta) = ffprobe::ffprobe(path) {
        return meta.streams.iter().any(|s| s.codec_type.as_ref().is_some_and(|typ| typ.eq("video")));
    }
    false
}
