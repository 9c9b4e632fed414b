use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Availability of one external tool: the managed copy under the app's
/// tools directory, or a PATH lookup as fallback.
#[derive(Debug, Clone, Serialize)]
pub struct ToolProbe {
    pub available: bool,
    pub managed_installed: bool,
    pub managed_path: String,
    pub resolved_path: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolsStatus {
    pub yt_dlp: ToolProbe,
    pub ffmpeg: ToolProbe,
}

pub fn tools_status(paths: &AppPaths) -> ToolsStatus {
    ToolsStatus {
        yt_dlp: yt_dlp_probe(paths),
        ffmpeg: ffmpeg_probe(paths),
    }
}

pub fn yt_dlp_probe(paths: &AppPaths) -> ToolProbe {
    probe_tool(paths.yt_dlp_bin_path(), "yt-dlp", "--version")
}

pub fn ffmpeg_probe(paths: &AppPaths) -> ToolProbe {
    probe_tool(paths.ffmpeg_bin_path(), "ffmpeg", "-version")
}

/// Downloads the latest yt-dlp release build for this platform into the
/// managed tools directory, staging through a temp file so a failed
/// download never clobbers a working binary.
pub fn install_yt_dlp(paths: &AppPaths) -> Result<ToolProbe> {
    paths.ensure_dirs()?;

    let destination = paths.yt_dlp_bin_path();
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = destination.with_extension("download");

    let resp = ureq::get(yt_dlp_release_url())
        .call()
        .map_err(|e| EngineError::InstallFailed(format!("yt-dlp download failed: {e}")))?;
    let status = resp.status();
    if status.as_u16() >= 400 {
        return Err(EngineError::InstallFailed(format!(
            "yt-dlp download failed (status={status})"
        )));
    }

    {
        let mut reader = resp.into_body().into_reader();
        let mut file = std::fs::File::create(&tmp_path)?;
        std::io::copy(&mut reader, &mut file)?;
        file.flush()?;
    }

    let min_size = 512 * 1024_u64;
    let downloaded_size = std::fs::metadata(&tmp_path).map(|m| m.len()).unwrap_or(0);
    if downloaded_size < min_size {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(EngineError::InstallFailed(
            "downloaded yt-dlp is unexpectedly small".to_string(),
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&tmp_path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&tmp_path, perms)?;
    }

    if destination.exists() {
        let _ = std::fs::remove_file(&destination);
    }
    if std::fs::rename(&tmp_path, &destination).is_err() {
        std::fs::copy(&tmp_path, &destination)?;
        let _ = std::fs::remove_file(&tmp_path);
    }

    let probe = yt_dlp_probe(paths);
    if !probe.available {
        return Err(EngineError::InstallFailed(
            "installed yt-dlp failed its version probe".to_string(),
        ));
    }
    Ok(probe)
}

/// Opens the system file manager at the directory containing `path`.
pub fn reveal_in_file_manager(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no such path: {}", path.display()),
        )));
    }
    let target = if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| path.to_path_buf())
    };
    open::that(&target)?;
    Ok(())
}

fn probe_tool(managed: PathBuf, fallback: &str, version_arg: &str) -> ToolProbe {
    let managed_installed = managed.exists();

    let mut resolved_path = String::new();
    let mut version: Option<String> = None;
    let mut available = false;

    let mut candidates: Vec<PathBuf> = Vec::new();
    if managed_installed {
        candidates.push(managed.clone());
    }
    candidates.push(PathBuf::from(fallback));

    for candidate in candidates {
        let probed = tool_version_first_line(&candidate, version_arg);
        if probed.is_some() {
            available = true;
            resolved_path = candidate.to_string_lossy().to_string();
            version = probed;
            break;
        }
    }

    ToolProbe {
        available,
        managed_installed,
        managed_path: managed.to_string_lossy().to_string(),
        resolved_path,
        version,
    }
}

fn tool_version_first_line(program: impl AsRef<std::ffi::OsStr>, arg: &str) -> Option<String> {
    let output = crate::cmd::command(program).arg(arg).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}

fn yt_dlp_release_url() -> &'static str {
    if cfg!(windows) {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux"
    }
}
