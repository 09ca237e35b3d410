use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    is_url, AudioQuality, ExtractionBackend, PlaylistLookup, PlaylistMetadata, TrackMetadata,
};

/// Prefer high bitrate first, then any audio-only stream.
const AUDIO_FORMAT: &str = "bestaudio[abr>=256]/bestaudio[abr>=192]/bestaudio[abr>=128]/\
                            bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio/best";

/// Extraction backend that shells out to `yt-dlp --dump-single-json`.
pub struct YtDlpClient {
    binary: String,
}

/// Subset of the yt-dlp info dict we read
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    abr: Option<f64>,
    acodec: Option<String>,
    ext: Option<String>,
    format_id: Option<String>,
    #[serde(default)]
    requested_formats: Vec<YtDlpFormat>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
    entries: Option<Vec<Option<YtDlpInfo>>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: Option<String>,
    abr: Option<f64>,
    tbr: Option<f64>,
    acodec: Option<String>,
    ext: Option<String>,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks that the binary runs and returns its version string.
    pub async fn verify(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))?;

        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.binary, output.status);
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp version: {}", version);
        Ok(version)
    }

    async fn dump_json(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))?;

        // yt-dlp exits non-zero on partial playlist failures but still
        // prints the JSON it managed to gather.
        if !output.status.success() && output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ExtractionBackend for YtDlpClient {
    async fn extract(&self, query: &str) -> Result<Option<TrackMetadata>> {
        let target = if is_url(query) {
            query.trim().to_string()
        } else {
            format!("ytsearch1:{}", query.trim())
        };

        debug!("📊 yt-dlp extract: {}", target);

        let json = self
            .dump_json(&[
                "--dump-single-json",
                "--no-playlist",
                "--no-warnings",
                "--no-check-certificates",
                "--socket-timeout",
                "15",
                "-f",
                AUDIO_FORMAT,
                &target,
            ])
            .await?;

        parse_track(&json)
    }

    async fn extract_playlist(
        &self,
        locator: &str,
        limit: usize,
    ) -> Result<Option<PlaylistLookup>> {
        debug!("📋 yt-dlp playlist: {} (limit {})", locator, limit);

        let limit_arg = limit.to_string();
        let json = self
            .dump_json(&[
                "--dump-single-json",
                "--flat-playlist",
                "--yes-playlist",
                "--ignore-errors",
                "--no-warnings",
                "--playlist-end",
                &limit_arg,
                locator.trim(),
            ])
            .await?;

        parse_playlist(&json, limit)
    }
}

fn parse_track(json: &str) -> Result<Option<TrackMetadata>> {
    if json.trim().is_empty() {
        return Ok(None);
    }

    let mut info: YtDlpInfo =
        serde_json::from_str(json).context("Failed to parse yt-dlp output")?;

    // Searches come back as a one-entry playlist
    if let Some(entries) = info.entries.take() {
        match entries.into_iter().flatten().next() {
            Some(first) => info = first,
            None => return Ok(None),
        }
    }

    Ok(Some(track_from_info(info)))
}

fn parse_playlist(json: &str, limit: usize) -> Result<Option<PlaylistLookup>> {
    if json.trim().is_empty() {
        return Ok(None);
    }

    let info: YtDlpInfo =
        serde_json::from_str(json).context("Failed to parse yt-dlp playlist output")?;

    let Some(entries) = info.entries else {
        return Ok(Some(PlaylistLookup::SingleItem));
    };

    let title = info.title.unwrap_or_else(|| "Playlist".to_string());
    let entries: Vec<TrackMetadata> = entries
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            // Flat entries carry the watch page in `url`, not a stream
            let webpage_url = entry.webpage_url.or(entry.url)?;
            Some(TrackMetadata {
                title: entry.title.unwrap_or_else(|| webpage_url.clone()),
                audio_url: None,
                webpage_url: Some(webpage_url),
                duration: entry.duration.and_then(seconds),
                quality: AudioQuality::default(),
            })
        })
        .take(limit)
        .collect();

    if entries.is_empty() {
        return Ok(None);
    }

    Ok(Some(PlaylistLookup::Playlist(PlaylistMetadata {
        title,
        entries,
    })))
}

fn track_from_info(info: YtDlpInfo) -> TrackMetadata {
    let quality = audio_quality(&info);
    let title = info
        .title
        .or_else(|| info.webpage_url.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    TrackMetadata {
        title,
        audio_url: info.url,
        webpage_url: info.webpage_url,
        duration: info.duration.and_then(seconds),
        quality,
    }
}

/// Bitrate and codec, falling back to the merged formats when the top
/// level leaves them out.
fn audio_quality(info: &YtDlpInfo) -> AudioQuality {
    let mut bitrate = info.abr;
    let mut codec = real_codec(info.acodec.as_deref());
    let mut ext = info.ext.clone();

    if bitrate.is_none() || codec.is_none() {
        if let Some(fmt) = info
            .requested_formats
            .iter()
            .find(|f| real_codec(f.acodec.as_deref()).is_some())
        {
            bitrate = bitrate.or(fmt.abr);
            codec = codec.or_else(|| real_codec(fmt.acodec.as_deref()));
            ext = ext.or_else(|| fmt.ext.clone());
        }

        if bitrate.is_none() {
            if let Some(fmt) = info
                .formats
                .iter()
                .find(|f| f.format_id.is_some() && f.format_id == info.format_id)
            {
                bitrate = fmt.abr.or(fmt.tbr);
                codec = codec.or_else(|| real_codec(fmt.acodec.as_deref()));
                ext = ext.or_else(|| fmt.ext.clone());
            }
        }
    }

    AudioQuality {
        bitrate_kbps: bitrate,
        codec,
        ext,
    }
}

fn real_codec(codec: Option<&str>) -> Option<String> {
    codec.filter(|c| *c != "none").map(str::to_string)
}

fn seconds(secs: f64) -> Option<Duration> {
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
