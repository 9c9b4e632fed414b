use crate::cmd;
use crate::process;
use crate::session::DownloadRequest;
use crate::{EngineError, Result};
use regex::Regex;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

pub const TITLE_LOOKUP_TIMEOUT_SECS: u64 = 10;

/// One recognized field-bearing output line shape, in the priority order the
/// session applies them. Percent extraction is a separate, independent scan
/// because a single line can carry both a percent and a destination.
#[derive(Debug, Clone, PartialEq)]
pub enum LineSignal {
    /// `Destination: <path>` marker; the payload is the raw path text.
    Destination(String),
    /// `[download] <name> has already been downloaded` sentinel.
    AlreadyDownloaded(String),
    /// `[Merger]` / `[ExtractAudio]` post-processing step, with the quoted
    /// `into "<path>"` target when the line names one.
    PostProcess(Option<String>),
}

pub fn classify_line(line: &str) -> Option<LineSignal> {
    if let Some(caps) = destination_re().captures(line) {
        if let Some(target) = caps.get(1) {
            return Some(LineSignal::Destination(target.as_str().trim().to_string()));
        }
    }
    if let Some(caps) = already_downloaded_re().captures(line) {
        if let Some(name) = caps.get(1) {
            return Some(LineSignal::AlreadyDownloaded(name.as_str().trim().to_string()));
        }
    }
    if line.contains("[Merger]") || line.contains("[ExtractAudio]") {
        let target = into_target_re()
            .captures(line)
            .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()));
        return Some(LineSignal::PostProcess(target));
    }
    None
}

/// Percentage embedded anywhere in the line: digits, optional fraction, `%`.
pub fn percent_in_line(line: &str) -> Option<f32> {
    let caps = percent_re().captures(line)?;
    caps.get(1)?.as_str().parse::<f32>().ok()
}

pub(crate) fn has_download_marker(line: &str) -> bool {
    line.to_ascii_lowercase().contains("[download]")
}

/// Validates user input and returns the URL to hand to the tool (scheme
/// prepended when the paste left it off).
pub fn validate_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidUrl("url is empty".to_string()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    if Url::parse(&candidate).is_err() || !is_youtube_media_url(&candidate) {
        return Err(EngineError::InvalidUrl(format!(
            "not a YouTube video or playlist url: {trimmed}"
        )));
    }
    Ok(candidate)
}

/// Watch pages, short links, shorts, and playlists on YouTube hosts.
pub fn is_youtube_media_url(url: &str) -> bool {
    let parsed = match Url::parse(url) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(v) => v.to_ascii_lowercase(),
        None => return false,
    };

    if host == "youtu.be" {
        return parsed
            .path()
            .strip_prefix('/')
            .is_some_and(|id| looks_like_video_id(id.trim_end_matches('/')));
    }

    if host != "youtube.com" && !host.ends_with(".youtube.com") {
        return false;
    }
    let path = parsed.path();
    if path == "/watch" {
        return parsed
            .query_pairs()
            .any(|(key, value)| key == "v" && looks_like_video_id(&value));
    }
    if let Some(id) = path.strip_prefix("/shorts/") {
        return looks_like_video_id(id.trim_end_matches('/'));
    }
    if path == "/playlist" {
        return parsed
            .query_pairs()
            .any(|(key, value)| key == "list" && !value.is_empty());
    }
    false
}

pub fn download_command(
    tool: impl AsRef<OsStr>,
    request: &DownloadRequest,
    ffmpeg_location: Option<&Path>,
) -> Command {
    let mut command = cmd::command(tool);
    command.arg(&request.url);
    command.arg("-o");
    command.arg(request.dest_dir.join(&request.output_template));
    command.arg("--newline");
    command.arg("--progress");
    if let Some(location) = ffmpeg_location {
        command.arg("--ffmpeg-location");
        command.arg(location);
    }
    command
}

pub fn title_command(tool: impl AsRef<OsStr>, url: &str) -> Command {
    let mut command = cmd::command(tool);
    command.args([url, "--get-title", "--no-warnings"]);
    command
}

/// Best-effort title probe ahead of the download. Missing tool, timeout,
/// non-zero exit, and empty output all read as "no title".
pub fn fetch_title(tool: impl AsRef<OsStr>, url: &str) -> Option<String> {
    let command = title_command(tool, url);
    let output = process::run_capture_timeout(
        command,
        "yt-dlp",
        Duration::from_secs(TITLE_LOOKUP_TIMEOUT_SECS),
    )
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let title = text.trim();
    if title.is_empty() {
        return None;
    }
    Some(title.to_string())
}

fn looks_like_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+\.?\d*)%").expect("valid percent regex"))
}

fn destination_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Destination:\s*(.+)").expect("valid destination regex"))
}

fn already_downloaded_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[download\]\s*(.+?)\s+has already been downloaded")
            .expect("valid already-downloaded regex")
    })
}

fn into_target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"into\s+"(.+)""#).expect("valid post-process target regex"))
}
