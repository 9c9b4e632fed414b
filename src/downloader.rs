use crate::config::{self, DownloaderConfig};
use crate::paths::AppPaths;
use crate::process::{self, ChildHandle};
use crate::session::{self, DownloadRequest, DownloadSession, SessionSnapshot};
use crate::ytdlp;
use crate::{EngineError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DOWNLOAD_LOG_ROTATE_BYTES: u64 = 4 * 1024 * 1024;
const DOWNLOAD_LOG_MAX_BACKUPS: usize = 2;
const DOWNLOAD_LOG_MAX_AGE_DAYS: u64 = 30;
const DOWNLOAD_LOG_TOTAL_CAP_BYTES: u64 = 64 * 1024 * 1024;

struct ActiveDownload {
    stop: Arc<AtomicBool>,
    child_slot: Arc<Mutex<Option<Arc<ChildHandle>>>>,
    worker: JoinHandle<()>,
}

/// Engine entry point: owns the stored configuration, at most one live
/// download session, and the last snapshot published to the front end.
pub struct Downloader {
    paths: AppPaths,
    config: Mutex<DownloaderConfig>,
    active: Mutex<Option<ActiveDownload>>,
    last_snapshot: Arc<Mutex<SessionSnapshot>>,
}

impl Downloader {
    /// Opens the engine rooted at `paths`, loading the stored config and
    /// pruning stale per-session logs in the background.
    pub fn new(paths: AppPaths) -> Result<Self> {
        paths.ensure_dirs()?;
        let config = config::load_downloader_config(&paths)?;

        let prune_paths = paths.clone();
        thread::spawn(move || {
            let _ = prune_download_logs(&prune_paths);
        });

        Ok(Self {
            paths,
            config: Mutex::new(config),
            active: Mutex::new(None),
            last_snapshot: Arc::new(Mutex::new(SessionSnapshot::idle())),
        })
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config(&self) -> DownloaderConfig {
        self.config
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn set_config(&self, next: DownloaderConfig) -> Result<DownloaderConfig> {
        config::save_downloader_config(&self.paths, &next)?;
        *self.config.lock().unwrap_or_else(|p| p.into_inner()) = next.clone();
        Ok(next)
    }

    /// Last state published by the worker, or the idle state before any
    /// download has started.
    pub fn last_snapshot(&self) -> SessionSnapshot {
        self.last_snapshot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn is_busy(&self) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        reap_finished(&mut active);
        active.is_some()
    }

    /// Validates the URL, prepares the destination directory, and starts
    /// the worker thread for one download session. `on_update` receives a
    /// snapshot after every state change, called from the worker thread.
    ///
    /// Fails with [`EngineError::Busy`] while a previous session is still
    /// live; validation and directory errors are reported before any
    /// process is spawned.
    pub fn start(
        &self,
        url: &str,
        on_update: impl Fn(SessionSnapshot) + Send + 'static,
    ) -> Result<SessionSnapshot> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        reap_finished(&mut active);
        if active.is_some() {
            return Err(EngineError::Busy);
        }

        let url = ytdlp::validate_url(url)?;
        let config = self.config();
        let dest_dir = config.effective_download_dir();
        std::fs::create_dir_all(&dest_dir).map_err(|source| {
            EngineError::DownloadDirUnavailable {
                dir: dest_dir.clone(),
                source,
            }
        })?;

        let session = DownloadSession::new(DownloadRequest {
            url,
            dest_dir,
            output_template: config.effective_output_template(),
        });
        let initial = session.snapshot();
        *self.last_snapshot.lock().unwrap_or_else(|p| p.into_inner()) = initial.clone();

        let stop = Arc::new(AtomicBool::new(false));
        let child_slot: Arc<Mutex<Option<Arc<ChildHandle>>>> = Arc::new(Mutex::new(None));

        let worker = {
            let paths = self.paths.clone();
            let stop = stop.clone();
            let child_slot = child_slot.clone();
            let last_snapshot = self.last_snapshot.clone();
            thread::spawn(move || {
                run_download(paths, session, stop, child_slot, last_snapshot, on_update)
            })
        };

        *active = Some(ActiveDownload {
            stop,
            child_slot,
            worker,
        });
        Ok(initial)
    }

    /// Requests cancellation of the live session. Fire-and-forget: sets
    /// the stop flag and tells the child to exit, never blocks on process
    /// death.
    pub fn cancel(&self) {
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(active) = active.as_ref() {
            active.stop.store(true, Ordering::SeqCst);
            let child = active
                .child_slot
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone();
            if let Some(child) = child {
                child.terminate();
            }
        }
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn reap_finished(active: &mut Option<ActiveDownload>) {
    let finished = active.as_ref().is_some_and(|a| a.worker.is_finished());
    if finished {
        if let Some(done) = active.take() {
            let _ = done.worker.join();
        }
    }
}

fn run_download(
    paths: AppPaths,
    mut session: DownloadSession,
    stop: Arc<AtomicBool>,
    child_slot: Arc<Mutex<Option<Arc<ChildHandle>>>>,
    last_snapshot: Arc<Mutex<SessionSnapshot>>,
    on_update: impl Fn(SessionSnapshot) + Send + 'static,
) {
    let session_id = session.id.to_string();
    let push = |session: &DownloadSession| {
        let snapshot = session.snapshot();
        *last_snapshot.lock().unwrap_or_else(|p| p.into_inner()) = snapshot.clone();
        on_update(snapshot);
    };

    let _ = log_line(
        &paths,
        &session_id,
        "info",
        "session_started",
        serde_json::json!({
            "url": session.request.url,
            "dest_dir": session.request.dest_dir.to_string_lossy(),
        }),
    );

    let tool = paths.yt_dlp_cmd();

    // Best-effort probe; any failure simply leaves the title empty.
    session.status_line = session::STATUS_FETCHING_INFO.to_string();
    push(&session);
    let title = ytdlp::fetch_title(&tool, &session.request.url);
    session.status_line = session::STATUS_STARTING.to_string();
    if let Some(title) = title {
        let _ = log_line(
            &paths,
            &session_id,
            "info",
            "title_resolved",
            serde_json::json!({ "title": title }),
        );
        session.video_title = Some(title);
    }
    push(&session);

    if stop.load(Ordering::SeqCst) {
        session.cancel();
        push(&session);
        let _ = log_line(
            &paths,
            &session_id,
            "info",
            "session_finished",
            serde_json::json!({ "phase": session.phase.as_str() }),
        );
        return;
    }

    let command = ytdlp::download_command(
        &tool,
        &session.request,
        paths.ffmpeg_location().as_deref(),
    );
    let (child, lines) = match process::spawn_streaming(command, "yt-dlp") {
        Ok(v) => v,
        Err(e) => {
            let _ = log_line(
                &paths,
                &session_id,
                "error",
                "spawn_failed",
                serde_json::json!({ "error": e.to_string() }),
            );
            session.fail(e.to_string());
            push(&session);
            return;
        }
    };

    *child_slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(child.clone());
    // Cancellation may have raced the spawn; never leave the child behind.
    if stop.load(Ordering::SeqCst) {
        child.terminate();
    }

    while let Some(line) = lines.next_line() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let _ = log_line(
            &paths,
            &session_id,
            "info",
            "tool_line",
            serde_json::json!({ "line": line }),
        );
        session.feed_line(&line, child.is_running());
        push(&session);
    }

    let exit_code = match child.wait() {
        Ok(status) => status.code(),
        Err(_) => None,
    };

    if stop.load(Ordering::SeqCst) {
        session.cancel();
    } else {
        session.finalize(exit_code);
    }
    push(&session);

    let _ = log_line(
        &paths,
        &session_id,
        "info",
        "session_finished",
        serde_json::json!({
            "phase": session.phase.as_str(),
            "exit_code": exit_code,
            "progress": session.progress_percent,
            "detected_filename": session.detected_filename,
        }),
    );

    *child_slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
}

fn log_line(
    paths: &AppPaths,
    session_id: &str,
    level: &str,
    event: &str,
    data: serde_json::Value,
) -> Result<()> {
    let line = serde_json::json!({
        "ts_ms": now_ms(),
        "session_id": session_id,
        "level": level,
        "event": event,
        "data": data
    })
    .to_string();

    let path = paths
        .download_logs_dir()
        .join(format!("{session_id}.jsonl"));
    std::fs::create_dir_all(paths.download_logs_dir())?;
    rotate_download_log_if_needed(&path)?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?
        .write_all(format!("{line}\n").as_bytes())?;
    Ok(())
}

fn rotate_download_log_if_needed(path: &Path) -> Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };

    if len < DOWNLOAD_LOG_ROTATE_BYTES {
        return Ok(());
    }

    rotate_file_backups(path, DOWNLOAD_LOG_MAX_BACKUPS)?;
    Ok(())
}

fn rotate_file_backups(path: &Path, max_backups: usize) -> std::io::Result<()> {
    if max_backups == 0 {
        let _ = std::fs::remove_file(path);
        return Ok(());
    }

    for i in (1..=max_backups).rev() {
        let dst = path_with_suffix(path, &format!(".{i}"));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            path_with_suffix(path, &format!(".{}", i - 1))
        };

        if !src.exists() {
            continue;
        }

        if dst.exists() {
            let _ = std::fs::remove_file(&dst);
        }
        std::fs::rename(src, dst)?;
    }
    Ok(())
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_string(),
        None => suffix.to_string(),
    };
    path.with_file_name(format!("{file_name}{suffix}"))
}

fn prune_download_logs(paths: &AppPaths) -> Result<()> {
    let dir = paths.download_logs_dir();
    if !dir.exists() {
        return Ok(());
    }

    let now = SystemTime::now();
    let cutoff = now
        .checked_sub(Duration::from_secs(DOWNLOAD_LOG_MAX_AGE_DAYS * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut candidates: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = match entry {
            Ok(v) => v,
            Err(_) => continue,
        };
        let meta = match entry.metadata() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let path = entry.path();
        let size = meta.len();

        if modified < cutoff {
            let _ = std::fs::remove_file(&path);
            continue;
        }

        candidates.push((path, modified, size));
    }

    candidates.sort_by_key(|(_, modified, _)| *modified);
    let mut total: u64 = candidates.iter().map(|(_, _, size)| *size).sum();
    for (path, _modified, size) in candidates {
        if total <= DOWNLOAD_LOG_TOTAL_CAP_BYTES {
            break;
        }
        let _ = std::fs::remove_file(&path);
        total = total.saturating_sub(size);
    }

    Ok(())
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
