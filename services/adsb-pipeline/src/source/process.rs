//! External decoder process - spawns rtl_adsb (or a compatible program) and
//! reads its output line by line

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Split};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{text_line, Acquired};
use crate::error::SourceError;
use crate::frame::{FrameRecord, RawFrame};

/// Grace period between SIGTERM and a forced kill.
pub const PROCESS_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a program producing `*<hex>;` lines on stdout is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProcessSource {
    program: PathBuf,
    args: Vec<String>,
}

impl ExternalProcessSource {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.display().to_string()
        } else {
            format!("{} {}", self.program.display(), self.args.join(" "))
        }
    }

    pub fn spawn(&self) -> Result<DecoderProcess, SourceError> {
        info!("Starting {}", self.describe());
        let (child, stdout) = spawn_piped(&self.program, &self.args)?;

        Ok(DecoderProcess {
            child,
            lines: BufReader::new(stdout).split(b'\n'),
            origin: self.program.display().to_string(),
        })
    }
}

/// Spawn `program` with stdout piped and stderr forwarded to the log.
///
/// The child is killed when its handle is dropped, so a worker that gets
/// aborted never leaves its decoder behind.
pub(crate) fn spawn_piped(program: &Path, args: &[String]) -> Result<(Child, ChildStdout), SourceError> {
    let spawn_error = |source| SourceError::Spawn {
        program: program.display().to_string(),
        source,
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // keep terminal Ctrl+C away from the child; shutdown stops it explicitly
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(spawn_error)?;

    let stdout = child.stdout.take().ok_or_else(|| {
        spawn_error(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "stdout was not captured",
        ))
    })?;

    if let Some(stderr) = child.stderr.take() {
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| program.display().to_string());
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    // rtl tools print status to stderr, not just errors
                    info!("[{}] {}", name, line.trim());
                }
            }
        });
    }

    Ok((child, stdout))
}

/// Ask a child to exit (SIGTERM on Unix), then kill it if it has not exited
/// within `timeout`.
pub(crate) async fn terminate_child(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    request_exit(child)?;
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Could not terminate within {:?}, trying kill", timeout);
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

/// A running decoder process.
pub struct DecoderProcess {
    child: Child,
    lines: Split<BufReader<ChildStdout>>,
    origin: String,
}

impl DecoderProcess {
    /// Next raw output line without its line ending. `None` once stdout is
    /// closed.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let line = self
            .lines
            .next_segment()
            .await
            .map_err(|source| SourceError::Read {
                origin: self.origin.clone(),
                source,
            })?;

        Ok(line.map(|mut bytes| {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            bytes
        }))
    }

    /// Next frame. A closed pipe is a failure: the decoder is expected to run
    /// until it is told to stop.
    pub(crate) async fn next(&mut self) -> Result<Option<Acquired>, SourceError> {
        loop {
            let Some(bytes) = self.next_line().await? else {
                return Err(self.closed_error().await);
            };

            match text_line(bytes) {
                Ok(line) => {
                    if let Some(frame) = RawFrame::from_line(&line) {
                        return Ok(Some(Acquired::Frame(FrameRecord::now(frame))));
                    }
                }
                Err(e) => return Ok(Some(Acquired::Malformed(e))),
            }
        }
    }

    /// Error describing why the output ended, with the exit status when the
    /// process is already gone.
    pub async fn closed_error(&mut self) -> SourceError {
        let detail = match tokio::time::timeout(Duration::from_millis(200), self.child.wait()).await {
            Ok(Ok(status)) => status.to_string(),
            Ok(Err(e)) => format!("exit status unavailable: {}", e),
            Err(_) => "stdout closed while the process is still running".to_string(),
        };
        SourceError::Closed {
            origin: self.origin.clone(),
            detail,
        }
    }

    pub async fn terminate(&mut self, timeout: Duration) -> std::io::Result<ExitStatus> {
        let status = terminate_child(&mut self.child, timeout).await?;
        debug!("{} exited: {}", self.origin, status);
        Ok(status)
    }
}
