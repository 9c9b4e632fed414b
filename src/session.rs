//! Download session state and the line-folding rules that drive it.
//!
//! A session is a plain value. The worker feeds it one output line at a
//! time together with a liveness snapshot of the child; everything else
//! (UI, logs) renders from [`SessionSnapshot`] copies.

use crate::ytdlp::{self, LineSignal};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

pub const STATUS_READY: &str = "Ready to download";
pub const STATUS_FETCHING_INFO: &str = "Fetching video info...";
pub const STATUS_STARTING: &str = "Starting download...";
pub const STATUS_FINISHING: &str = "Stand by - finishing up...";
pub const STATUS_COMPLETED: &str = "Download completed successfully!";
pub const STATUS_FAILED: &str = "Download failed";
pub const STATUS_CANCELLED: &str = "Download cancelled";

/// Cap for raw-line echoes so one noisy line cannot blow up the status row.
const STATUS_ECHO_MAX_CHARS: usize = 60;

/// What the user asked for. Immutable for the life of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub url: String,
    pub dest_dir: PathBuf,
    pub output_template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Finishing,
    Completed,
    Cancelled,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Cancelled | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Finishing => "finishing",
            Phase::Completed => "completed",
            Phase::Cancelled => "cancelled",
            Phase::Failed => "failed",
        }
    }
}

/// One download attempt from start to a terminal phase.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSession {
    pub id: Uuid,
    pub request: DownloadRequest,
    pub phase: Phase,
    pub progress_percent: Option<f32>,
    pub detected_path: Option<PathBuf>,
    pub detected_filename: Option<String>,
    pub video_title: Option<String>,
    pub status_line: String,
    pub failure: Option<String>,
}

impl DownloadSession {
    pub fn new(request: DownloadRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            phase: Phase::Running,
            progress_percent: None,
            detected_path: None,
            detected_filename: None,
            video_title: None,
            status_line: STATUS_STARTING.to_string(),
            failure: None,
        }
    }

    /// Folds one merged-output line into the session.
    ///
    /// `still_running` is the child liveness observed when the line was
    /// read; it disambiguates "100% and muxing" from "100% and exited"
    /// (the latter is settled by [`DownloadSession::finalize`], not here).
    pub fn feed_line(&mut self, line: &str, still_running: bool) {
        if self.phase.is_terminal() {
            return;
        }
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let mut matched = false;

        // Progress and path extraction are independent scans; a single
        // line can legitimately carry both.
        if let Some(percent) = ytdlp::percent_in_line(line) {
            matched = true;
            if self.phase == Phase::Running {
                self.progress_percent = Some(percent);
                self.status_line = format!("Downloading... {percent:.1}%");
                if percent >= 100.0 && still_running {
                    self.enter_finishing();
                }
            }
        }

        match ytdlp::classify_line(line) {
            Some(LineSignal::Destination(target)) => {
                matched = true;
                self.record_output_path(&target);
            }
            Some(LineSignal::AlreadyDownloaded(name)) => {
                matched = true;
                self.record_output_path(&name);
            }
            Some(LineSignal::PostProcess(target)) => {
                matched = true;
                if let Some(target) = target {
                    self.record_output_path(&target);
                }
                if still_running && self.phase == Phase::Running {
                    self.enter_finishing();
                }
            }
            None => {}
        }

        if matched {
            return;
        }
        if self.phase == Phase::Finishing && still_running {
            // Muxing emits terse continuation lines that are useless
            // verbatim; show one steady message instead.
            self.status_line = STATUS_FINISHING.to_string();
        } else if self.phase == Phase::Running && ytdlp::has_download_marker(line) {
            self.status_line = truncate_status(line);
        }
    }

    /// Settles the session once the child has fully exited. Not called on
    /// the cancellation path.
    pub fn finalize(&mut self, exit_code: Option<i32>) {
        if self.phase.is_terminal() {
            return;
        }
        if exit_code == Some(0) {
            self.progress_percent = Some(100.0);
            if self.detected_path.is_none() {
                if let Some(path) = latest_modified_file(&self.request.dest_dir) {
                    if let Some(name) = path.file_name() {
                        self.detected_filename = Some(name.to_string_lossy().to_string());
                    }
                    self.detected_path = Some(path);
                }
            }
            if self.video_title.is_none() {
                if let Some(name) = &self.detected_filename {
                    self.video_title = Some(strip_extension(name));
                }
            }
            self.phase = Phase::Completed;
            self.status_line = STATUS_COMPLETED.to_string();
        } else {
            self.phase = Phase::Failed;
            self.status_line = STATUS_FAILED.to_string();
            if self.failure.is_none() {
                self.failure = Some(match exit_code {
                    Some(code) => format!("tool exited with status {code}"),
                    None => "tool was terminated by a signal".to_string(),
                });
            }
        }
    }

    pub fn cancel(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = Phase::Cancelled;
        self.status_line = STATUS_CANCELLED.to_string();
    }

    /// Marks the session failed before or outside the exit path, e.g. when
    /// the child could not be spawned at all.
    pub fn fail(&mut self, detail: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = Phase::Failed;
        self.status_line = STATUS_FAILED.to_string();
        self.failure = Some(detail.into());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.to_string(),
            phase: self.phase,
            progress_percent: self.progress_percent,
            status_line: self.status_line.clone(),
            video_title: self.video_title.clone(),
            detected_filename: self.detected_filename.clone(),
            detected_path: self
                .detected_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            dest_dir: self.request.dest_dir.to_string_lossy().to_string(),
            error: self.failure.clone(),
        }
    }

    fn enter_finishing(&mut self) {
        self.phase = Phase::Finishing;
        self.status_line = STATUS_FINISHING.to_string();
    }

    fn record_output_path(&mut self, raw: &str) {
        let candidate = Path::new(raw);
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.request.dest_dir.join(candidate)
        };
        if let Some(name) = path.file_name() {
            self.detected_filename = Some(name.to_string_lossy().to_string());
        }
        self.detected_path = Some(path);
    }
}

/// Immutable copy of everything a front end needs to render one state:
/// progress bar, status row, and the completion summary fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub phase: Phase,
    pub progress_percent: Option<f32>,
    pub status_line: String,
    pub video_title: Option<String>,
    pub detected_filename: Option<String>,
    pub detected_path: Option<String>,
    pub dest_dir: String,
    pub error: Option<String>,
}

impl SessionSnapshot {
    /// State shown before any download has been started.
    pub fn idle() -> Self {
        Self {
            session_id: String::new(),
            phase: Phase::Idle,
            progress_percent: None,
            status_line: STATUS_READY.to_string(),
            video_title: None,
            detected_filename: None,
            detected_path: None,
            dest_dir: String::new(),
            error: None,
        }
    }
}

/// Most recently modified immediate file in `dir`, if any. Missing or
/// unreadable directories read as "nothing found".
fn latest_modified_file(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        let modified = match meta.modified() {
            Ok(t) => t,
            Err(_) => continue,
        };
        let newer = match &newest {
            Some((best, _)) => modified > *best,
            None => true,
        };
        if newer {
            newest = Some((modified, entry.path()));
        }
    }
    newest.map(|(_, path)| path)
}

fn strip_extension(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string())
}

fn truncate_status(line: &str) -> String {
    if line.chars().count() > STATUS_ECHO_MAX_CHARS {
        let cut: String = line.chars().take(STATUS_ECHO_MAX_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;

    fn request(dest: &Path) -> DownloadRequest {
        DownloadRequest {
            url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            dest_dir: dest.to_path_buf(),
            output_template: "%(title)s.%(ext)s".to_string(),
        }
    }

    #[test]
    fn fresh_session_starts_running_with_no_progress() {
        let session = DownloadSession::new(request(Path::new("/d")));
        assert_eq!(session.phase, Phase::Running);
        assert_eq!(session.progress_percent, None);
        assert_eq!(session.detected_path, None);
        assert_eq!(session.detected_filename, None);
        assert_eq!(session.video_title, None);
        assert_eq!(session.status_line, STATUS_STARTING);
    }

    #[test]
    fn percent_lines_update_progress_and_status() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download]   0.0% of 10.00MiB at 1.00MiB/s", true);
        assert_eq!(session.progress_percent, Some(0.0));
        assert_eq!(session.status_line, "Downloading... 0.0%");

        session.feed_line("[download]  55.3% of 10.00MiB at 2.50MiB/s", true);
        assert_eq!(session.progress_percent, Some(55.3));
        assert_eq!(session.status_line, "Downloading... 55.3%");
        assert_eq!(session.phase, Phase::Running);
    }

    #[test]
    fn percent_updates_assign_directly_for_new_fragments() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download]  55.3% of 10.00MiB", true);
        session.feed_line("[download]  12.5% of 3.00MiB (frag 2/4)", true);
        assert_eq!(session.progress_percent, Some(12.5));
        assert_eq!(session.phase, Phase::Running);
    }

    #[test]
    fn reaching_full_percent_while_alive_enters_finishing_and_pins_progress() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download] 100.0% of 10.00MiB", true);
        assert_eq!(session.phase, Phase::Finishing);
        assert_eq!(session.progress_percent, Some(100.0));
        assert_eq!(session.status_line, STATUS_FINISHING);

        // Later percent lines no longer move progress once finishing.
        session.feed_line("[download]   0.5% of 2.00MiB (frag 2/2)", true);
        assert_eq!(session.phase, Phase::Finishing);
        assert_eq!(session.progress_percent, Some(100.0));
    }

    #[test]
    fn reaching_full_percent_after_exit_stays_running_for_finalize() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download] 100.0% of 10.00MiB", false);
        assert_eq!(session.phase, Phase::Running);
        assert_eq!(session.progress_percent, Some(100.0));
    }

    #[test]
    fn destination_resolves_relative_paths_against_the_request_dir() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download] Destination: foo/bar.mp4", true);
        assert_eq!(session.detected_path, Some(PathBuf::from("/d/foo/bar.mp4")));
        assert_eq!(session.detected_filename, Some("bar.mp4".to_string()));
    }

    #[test]
    fn destination_keeps_absolute_paths_as_given() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download] Destination: /elsewhere/clip.webm", true);
        assert_eq!(
            session.detected_path,
            Some(PathBuf::from("/elsewhere/clip.webm"))
        );
        assert_eq!(session.detected_filename, Some("clip.webm".to_string()));
    }

    #[test]
    fn one_line_can_carry_both_a_percent_and_a_destination() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download]  42.0% Destination: part.mp4", true);
        assert_eq!(session.progress_percent, Some(42.0));
        assert_eq!(session.detected_filename, Some("part.mp4".to_string()));
    }

    #[test]
    fn already_downloaded_lines_record_the_existing_file() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download] video.mp4 has already been downloaded", true);
        assert_eq!(session.detected_path, Some(PathBuf::from("/d/video.mp4")));
        assert_eq!(session.detected_filename, Some("video.mp4".to_string()));
    }

    #[test]
    fn merger_line_enters_finishing_and_records_the_target() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[Merger] Merging formats into \"clip.mp4\"", true);
        assert_eq!(session.phase, Phase::Finishing);
        assert_eq!(session.detected_path, Some(PathBuf::from("/d/clip.mp4")));
        assert_eq!(session.status_line, STATUS_FINISHING);
    }

    #[test]
    fn merger_line_after_exit_records_the_target_without_finishing() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[Merger] Merging formats into \"clip.mp4\"", false);
        assert_eq!(session.phase, Phase::Running);
        assert_eq!(session.detected_filename, Some("clip.mp4".to_string()));
    }

    #[test]
    fn unmatched_lines_while_finishing_show_the_steady_message() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download] 100.0% of 10.00MiB", true);
        session.status_line = "something else".to_string();
        session.feed_line("Deleting original file video.f137.mp4 (pass -k to keep)", true);
        assert_eq!(session.phase, Phase::Finishing);
        assert_eq!(session.status_line, STATUS_FINISHING);
    }

    #[test]
    fn unmatched_download_lines_echo_truncated_while_running() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download] Resuming download at byte 12345", true);
        assert_eq!(session.status_line, "[download] Resuming download at byte 12345");

        let long = format!("[download] {}", "x".repeat(70));
        session.feed_line(&long, true);
        assert_eq!(session.status_line, format!("{}...", &long[..60]));
    }

    #[test]
    fn lines_that_match_nothing_change_nothing() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download]  55.3% of 10.00MiB", true);
        let before = session.clone();
        session.feed_line("[youtube] dQw4w9WgXcQ: Downloading webpage", true);
        session.feed_line("", true);
        assert_eq!(session, before);
    }

    #[test]
    fn terminal_sessions_ignore_further_lines() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download]  55.3% of 10.00MiB", true);
        session.cancel();
        session.feed_line("[download]  99.0% of 10.00MiB", true);
        assert_eq!(session.phase, Phase::Cancelled);
        assert_eq!(session.progress_percent, Some(55.3));
    }

    #[test]
    fn successful_exit_completes_with_full_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = DownloadSession::new(request(dir.path()));
        session.feed_line("[download]  55.3% of 10.00MiB", true);
        session.feed_line("[download] Destination: video.mp4", true);
        session.finalize(Some(0));
        assert_eq!(session.phase, Phase::Completed);
        assert_eq!(session.progress_percent, Some(100.0));
        assert_eq!(session.status_line, STATUS_COMPLETED);
        assert_eq!(session.video_title, Some("video".to_string()));
    }

    #[test]
    fn completion_with_an_empty_destination_leaves_detection_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = DownloadSession::new(request(dir.path()));
        session.finalize(Some(0));
        assert_eq!(session.phase, Phase::Completed);
        assert_eq!(session.detected_path, None);
        assert_eq!(session.detected_filename, None);
        assert_eq!(session.video_title, None);
    }

    #[test]
    fn completion_falls_back_to_the_newest_file_in_the_destination() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old = dir.path().join("older.mp4");
        let new = dir.path().join("newest.mp4");
        std::fs::write(&old, b"a").expect("write older");
        std::fs::write(&new, b"b").expect("write newest");
        filetime::set_file_mtime(&old, FileTime::from_unix_time(1_000_000, 0)).expect("mtime");
        filetime::set_file_mtime(&new, FileTime::from_unix_time(2_000_000, 0)).expect("mtime");
        std::fs::create_dir(dir.path().join("sub")).expect("subdir");

        let mut session = DownloadSession::new(request(dir.path()));
        session.finalize(Some(0));
        assert_eq!(session.detected_path, Some(new));
        assert_eq!(session.detected_filename, Some("newest.mp4".to_string()));
        assert_eq!(session.video_title, Some("newest".to_string()));
    }

    #[test]
    fn failed_exit_keeps_the_last_observed_progress() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download]  55.3% of 10.00MiB", true);
        session.finalize(Some(1));
        assert_eq!(session.phase, Phase::Failed);
        assert_eq!(session.progress_percent, Some(55.3));
        assert_eq!(session.status_line, STATUS_FAILED);
        assert_eq!(session.failure, Some("tool exited with status 1".to_string()));
    }

    #[test]
    fn cancel_keeps_whatever_was_detected() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.feed_line("[download] Destination: video.mp4", true);
        session.cancel();
        assert_eq!(session.phase, Phase::Cancelled);
        assert_eq!(session.status_line, STATUS_CANCELLED);
        assert_eq!(session.detected_filename, Some("video.mp4".to_string()));
    }

    #[test]
    fn full_stream_folds_to_a_completed_session() {
        let mut session = DownloadSession::new(request(Path::new("/tmp/out")));
        let lines = [
            "[download]   0.0% of 10.00MiB",
            "[download]  55.3% of 10.00MiB",
            "[download] Destination: video.mp4",
            "[download] 100.0% of 10.00MiB",
            "[Merger] Merging formats into \"video.mp4\"",
        ];
        for line in lines {
            session.feed_line(line, true);
        }
        assert_eq!(session.phase, Phase::Finishing);

        session.finalize(Some(0));
        assert_eq!(session.phase, Phase::Completed);
        assert_eq!(session.progress_percent, Some(100.0));
        assert_eq!(session.detected_filename, Some("video.mp4".to_string()));
        assert_eq!(
            session.detected_path,
            Some(PathBuf::from("/tmp/out/video.mp4"))
        );
    }

    #[test]
    fn snapshot_carries_the_render_fields() {
        let mut session = DownloadSession::new(request(Path::new("/d")));
        session.video_title = Some("A Title".to_string());
        session.feed_line("[download]  55.3% of 10.00MiB", true);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.session_id, session.id.to_string());
        assert_eq!(snapshot.phase, Phase::Running);
        assert_eq!(snapshot.progress_percent, Some(55.3));
        assert_eq!(snapshot.status_line, "Downloading... 55.3%");
        assert_eq!(snapshot.video_title, Some("A Title".to_string()));
        assert_eq!(snapshot.dest_dir, "/d");
        assert_eq!(snapshot.error, None);

        let idle = SessionSnapshot::idle();
        assert_eq!(idle.phase, Phase::Idle);
        assert_eq!(idle.status_line, STATUS_READY);
    }
}
