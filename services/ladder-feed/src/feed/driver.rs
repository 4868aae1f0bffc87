//! Tokio driver for the feed backend process
//!
//! Executes the process-facing [`FeedAction`]s and turns child process
//! activity and timers into [`FeedEvent`]s for the connection.

use std::future::pending;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, warn};

use crate::events::ControlCommand;
use crate::feed::connection::{ExitKind, FeedAction, FeedEvent, ProcessErrorKind};
use crate::feed::launch::LaunchSpec;

const READ_CHUNK_BYTES: usize = 64 * 1024;

struct Backend {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
}

enum Wake {
    Stdout(io::Result<usize>),
    Stderr(io::Result<Option<String>>),
    Exited(io::Result<ExitStatus>),
    Watchdog,
    Restart,
}

/// Owns the child process and the watchdog and restart timers.
pub struct FeedDriver {
    backend: Option<Backend>,
    watchdog: Option<Instant>,
    restart_at: Option<Instant>,
    kill_timeout: Duration,
    buf: Vec<u8>,
}

impl FeedDriver {
    pub fn new(kill_timeout: Duration) -> Self {
        Self {
            backend: None,
            watchdog: None,
            restart_at: None,
            kill_timeout,
            buf: vec![0; READ_CHUNK_BYTES],
        }
    }

    /// Whether a child process is attached.
    pub fn is_alive(&self) -> bool {
        self.backend.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.backend.as_ref().and_then(|b| b.child.id())
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog
    }

    pub fn restart_deadline(&self) -> Option<Instant> {
        self.restart_at
    }

    /// Wait for the next process or timer event.
    ///
    /// Never resolves while there is no process and no timer armed. The exit
    /// status is only collected once both output streams are drained, so
    /// every line the backend wrote is delivered before its exit.
    pub async fn next_event(&mut self) -> FeedEvent {
        loop {
            let (stdout, stderr, child) = match self.backend.as_mut() {
                Some(b) => {
                    let drained = b.stdout.is_none() && b.stderr.is_none();
                    (
                        b.stdout.as_mut(),
                        b.stderr.as_mut(),
                        drained.then_some(&mut b.child),
                    )
                }
                None => (None, None, None),
            };

            let wake = tokio::select! {
                n = read_stdout(stdout, &mut self.buf) => Wake::Stdout(n),
                line = next_stderr_line(stderr) => Wake::Stderr(line),
                status = wait_child(child) => Wake::Exited(status),
                _ = sleep_until_opt(self.watchdog) => Wake::Watchdog,
                _ = sleep_until_opt(self.restart_at) => Wake::Restart,
            };

            match wake {
                Wake::Stdout(Ok(0)) => self.close_stdout(),
                Wake::Stdout(Ok(n)) => return FeedEvent::Stdout(self.buf[..n].to_vec()),
                Wake::Stdout(Err(err)) => {
                    self.close_stdout();
                    return FeedEvent::Error {
                        kind: ProcessErrorKind::ReadError,
                        message: err.to_string(),
                    };
                }
                Wake::Stderr(Ok(Some(line))) => return FeedEvent::StderrLine(line),
                Wake::Stderr(Ok(None)) => self.close_stderr(),
                Wake::Stderr(Err(err)) => {
                    self.close_stderr();
                    return FeedEvent::Error {
                        kind: ProcessErrorKind::ReadError,
                        message: err.to_string(),
                    };
                }
                Wake::Exited(result) => {
                    self.backend = None;
                    return exit_event(result);
                }
                Wake::Watchdog => {
                    self.watchdog = None;
                    return FeedEvent::WatchdogFired;
                }
                Wake::Restart => {
                    self.restart_at = None;
                    return FeedEvent::RestartDue;
                }
            }
        }
    }

    /// Execute one action. Actions that are not about the process are
    /// ignored. Returns the event the action produced synchronously, if any.
    pub async fn apply(&mut self, action: &FeedAction) -> Option<FeedEvent> {
        match action {
            FeedAction::Launch(spec) => Some(self.launch(spec)),
            FeedAction::Terminate => self.terminate().await,
            FeedAction::Send(command) => self.send(command).await,
            FeedAction::ArmWatchdog(deadline) => {
                self.watchdog = Some(Instant::from_std(*deadline));
                None
            }
            FeedAction::DisarmWatchdog => {
                self.watchdog = None;
                None
            }
            FeedAction::ScheduleRestart(delay) => {
                self.restart_at = Some(Instant::now() + *delay);
                None
            }
            FeedAction::Reset
            | FeedAction::Deliver(_)
            | FeedAction::Status(_)
            | FeedAction::Failure(_) => None,
        }
    }

    fn launch(&mut self, spec: &LaunchSpec) -> FeedEvent {
        if self.backend.is_some() {
            // kill_on_drop reaps the previous child.
            warn!("Launching over a live backend");
            self.backend = None;
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        match command.spawn() {
            Ok(mut child) => {
                debug!(pid = ?child.id(), program = %spec.program.display(), "Backend spawned");
                let stdin = child.stdin.take();
                let stdout = child.stdout.take();
                let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
                self.backend = Some(Backend {
                    child,
                    stdin,
                    stdout,
                    stderr,
                });
                FeedEvent::Started
            }
            Err(err) => FeedEvent::Error {
                kind: ProcessErrorKind::FailedToStart,
                message: err.to_string(),
            },
        }
    }

    async fn terminate(&mut self) -> Option<FeedEvent> {
        let mut backend = self.backend.take()?;
        if let Err(err) = backend.child.start_kill() {
            debug!(error = %err, "Backend kill failed");
        }
        match timeout(self.kill_timeout, backend.child.wait()).await {
            Ok(result) => Some(exit_event(result)),
            Err(_) => Some(FeedEvent::Error {
                kind: ProcessErrorKind::Timedout,
                message: format!(
                    "backend did not exit within {}ms",
                    self.kill_timeout.as_millis()
                ),
            }),
        }
    }

    async fn send(&mut self, command: &ControlCommand) -> Option<FeedEvent> {
        let Some(stdin) = self.backend.as_mut().and_then(|b| b.stdin.as_mut()) else {
            debug!(?command, "No backend stdin, dropping command");
            return None;
        };
        let line = match command.to_line() {
            Ok(line) => line,
            Err(err) => {
                return Some(FeedEvent::Error {
                    kind: ProcessErrorKind::WriteError,
                    message: err.to_string(),
                })
            }
        };
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.err().map(|err| FeedEvent::Error {
            kind: ProcessErrorKind::WriteError,
            message: err.to_string(),
        })
    }

    fn close_stdout(&mut self) {
        if let Some(b) = self.backend.as_mut() {
            b.stdout = None;
        }
    }

    fn close_stderr(&mut self) {
        if let Some(b) = self.backend.as_mut() {
            b.stderr = None;
        }
    }
}

fn exit_event(result: io::Result<ExitStatus>) -> FeedEvent {
    match result {
        Ok(status) => {
            let code = status.code();
            FeedEvent::Exited {
                code,
                kind: ExitKind::classify(code),
            }
        }
        Err(err) => {
            warn!(error = %err, "Waiting for backend failed");
            FeedEvent::Exited {
                code: None,
                kind: ExitKind::Crash,
            }
        }
    }
}

async fn read_stdout(stdout: Option<&mut ChildStdout>, buf: &mut [u8]) -> io::Result<usize> {
    match stdout {
        Some(stdout) => stdout.read(buf).await,
        None => pending().await,
    }
}

async fn next_stderr_line(
    stderr: Option<&mut Lines<BufReader<ChildStderr>>>,
) -> io::Result<Option<String>> {
    match stderr {
        Some(lines) => lines.next_line().await,
        None => pending().await,
    }
}

async fn wait_child(child: Option<&mut Child>) -> io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
