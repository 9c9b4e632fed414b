use crate::{EngineError, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

pub const CHILD_POLL_INTERVAL_MS: u64 = 200;

/// Shared control side of a supervised child process. Cloneable via `Arc` so
/// a UI thread can request termination while a worker owns the line stream.
#[derive(Debug)]
pub struct ChildHandle {
    child: Mutex<Child>,
}

impl ChildHandle {
    fn lock_child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Non-blocking liveness check.
    pub fn is_running(&self) -> bool {
        matches!(self.lock_child().try_wait(), Ok(None))
    }

    /// Requests termination of the child (and its process tree on Windows,
    /// where yt-dlp spawns ffmpeg as a grandchild). Idempotent; does not
    /// block waiting for the exit.
    pub fn terminate(&self) {
        let mut child = self.lock_child();
        #[cfg(windows)]
        {
            let pid = child.id().to_string();
            let _ = crate::cmd::command("taskkill")
                .args(["/PID", &pid, "/T", "/F"])
                .status();
        }
        let _ = child.kill();
    }

    /// Blocks until the child has fully exited. Implemented as a short poll
    /// so `terminate` and `is_running` stay responsive from other threads.
    pub fn wait(&self) -> Result<ExitStatus> {
        loop {
            {
                let mut child = self.lock_child();
                if let Some(status) = child.try_wait()? {
                    return Ok(status);
                }
            }
            thread::sleep(Duration::from_millis(CHILD_POLL_INTERVAL_MS));
        }
    }
}

/// Receiving side of the merged stdout+stderr line stream.
#[derive(Debug)]
pub struct LineStream {
    rx: Receiver<String>,
}

impl LineStream {
    /// Blocks until a line is available; `None` once both pipes have closed
    /// and the buffered lines are drained. Never errors on ordinary exit.
    pub fn next_line(&self) -> Option<String> {
        self.rx.recv().ok()
    }
}

/// Spawns `command` with stdout and stderr merged into one line-buffered
/// stream. The returned handle controls the process; the stream yields its
/// output lines in arrival order.
pub fn spawn_streaming(mut command: Command, tool: &str) -> Result<(Arc<ChildHandle>, LineStream)> {
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| spawn_error(tool, e))?;

    let stdout = child.stdout.take().ok_or_else(|| pipe_missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| pipe_missing("stderr"))?;

    let (tx, rx) = mpsc::channel();
    spawn_line_pump(stdout, tx.clone());
    spawn_line_pump(stderr, tx);

    let handle = Arc::new(ChildHandle {
        child: Mutex::new(child),
    });
    Ok((handle, LineStream { rx }))
}

/// Runs `command` to completion with captured output, killing it once
/// `timeout` elapses. Exit status is reported as-is; only the deadline and
/// plumbing failures produce errors.
pub fn run_capture_timeout(mut command: Command, tool: &str, timeout: Duration) -> Result<Output> {
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| spawn_error(tool, e))?;

    let mut stdout = child.stdout.take().ok_or_else(|| pipe_missing("stdout"))?;
    let mut stderr = child.stderr.take().ok_or_else(|| pipe_missing("stderr"))?;

    let stdout_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let started = Instant::now();
    loop {
        if started.elapsed() >= timeout {
            kill_child_tree(&mut child);
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(EngineError::ToolFailed {
                tool: tool.to_string(),
                code: None,
                detail: format!("timed out after {}s", timeout.as_secs()),
            });
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let stdout = stdout_handle.join().unwrap_or_default();
                let stderr = stderr_handle.join().unwrap_or_default();
                return Ok(Output {
                    status,
                    stdout,
                    stderr,
                });
            }
            Ok(None) => thread::sleep(Duration::from_millis(CHILD_POLL_INTERVAL_MS)),
            Err(err) => {
                kill_child_tree(&mut child);
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(EngineError::Io(err));
            }
        }
    }
}

fn spawn_line_pump<R: Read + Send + 'static>(stream: R, tx: Sender<String>) {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

fn kill_child_tree(child: &mut Child) {
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        let _ = crate::cmd::command("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_error(tool: &str, err: std::io::Error) -> EngineError {
    match err.kind() {
        std::io::ErrorKind::NotFound => EngineError::ToolMissing {
            tool: tool.to_string(),
        },
        _ => EngineError::Io(err),
    }
}

fn pipe_missing(which: &str) -> EngineError {
    EngineError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{which} pipe missing"),
    ))
}
