//! Deadline-bounded subprocess execution.
//!
//! Every agent action that reaches an external process runs through
//! [`run_with_deadline`]. The deadline is a hard wall-clock bound: when it
//! expires the direct child is killed and the caller gets [`ShellError::TimedOut`]
//! back. Grandchildren spawned by `sh -c` are not tracked and may outlive the
//! step; the observation returned to the agent does not claim otherwise.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of a completed shell command.
#[derive(Debug)]
pub struct ShellOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, derive_more::Display)]
pub enum ShellError {
    /// The command did not finish before the deadline and was killed.
    #[display("timed out")]
    TimedOut,

    /// The command could not be started or waited on.
    #[display("{_0}")]
    Io(std::io::Error),
}

/// Run `sh -c command` in `cwd`, capturing stdout and stderr, killing the
/// child if it is still running after `limit`.
pub fn run_with_deadline(command: &str, cwd: &Path, limit: Duration) -> Result<ShellOutput, ShellError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ShellError::Io)?;

    // Drain pipes on separate threads so a chatty child never blocks on a
    // full pipe while we poll for exit.
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_reader = thread::spawn(move || drain(stdout_pipe));
    let stderr_reader = thread::spawn(move || drain(stderr_pipe));

    let deadline = Instant::now() + limit;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ShellError::TimedOut);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                return Err(ShellError::Io(e));
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(ShellOutput {
        success: status.success(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}
