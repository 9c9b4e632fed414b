use std::path::PathBuf;

/// Filesystem layout for the app's own state directory. The download
/// destination is separate and user-chosen; see `DownloaderConfig`.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir().join("downloader.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn download_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("downloads")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn yt_dlp_bin_path(&self) -> PathBuf {
        let mut path = self.tools_dir().join("yt-dlp").join("yt-dlp");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    /// Managed binary when installed, otherwise the PATH name.
    pub fn yt_dlp_cmd(&self) -> PathBuf {
        let path = self.yt_dlp_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("yt-dlp")
        }
    }

    pub fn ffmpeg_dir(&self) -> PathBuf {
        self.tools_dir().join("ffmpeg")
    }

    pub fn ffmpeg_bin_path(&self) -> PathBuf {
        let mut path = self.ffmpeg_dir().join("ffmpeg");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    /// Directory handed to yt-dlp via `--ffmpeg-location` when a managed
    /// ffmpeg build is present. `None` leaves yt-dlp to find its own.
    pub fn ffmpeg_location(&self) -> Option<PathBuf> {
        if self.ffmpeg_bin_path().exists() {
            Some(self.ffmpeg_dir())
        } else {
            None
        }
    }

    /// The platform's Downloads folder, with a home-relative fallback.
    pub fn default_download_dir() -> PathBuf {
        if let Some(dir) = dirs::download_dir() {
            return dir;
        }
        if let Some(home) = dirs::home_dir() {
            return home.join("Downloads");
        }
        PathBuf::from("Downloads")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.download_logs_dir())?;
        std::fs::create_dir_all(self.tools_dir())?;
        Ok(())
    }
}
