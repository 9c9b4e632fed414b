use std::ffi::OsStr;
use std::process::{Command, Stdio};

/// Builds a `Command` suitable for running external tools behind a desktop
/// app: no console window on Windows, and stdin detached so the child never
/// inherits the host's input handle.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null());
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    // Keep tool processes from flashing a console window over the UI.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}
