//! Supervises one worker process and relays its events.
//!
//! The relay reads the worker's stdout line by line and forwards each parsed
//! event into a bounded channel as soon as it arrives. It enforces the
//! wall-clock timeout, terminates the worker when the consumer goes away, and
//! releases the request's workspace once the worker has exited.

use crate::config::Config;
use crate::defaults::EVENT_CHANNEL_CAPACITY;
use crate::error::{Result, SubflowError};
use crate::ipc::protocol::{ProgressEvent, parse_line};
use crate::ipc::worker::WorkerArgs;
use crate::sys::signal_process_group;
use crate::workspace::ResourceArena;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lines of worker stderr kept for error reporting.
const STDERR_TAIL_LINES: usize = 20;

/// How to start a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-run `program` (normally the current executable) as a worker.
    pub fn worker(program: impl Into<OsString>, args: &WorkerArgs) -> Self {
        Self::new(program, args.to_cli_args())
    }
}

/// Limits applied to one relayed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayOptions {
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL on cancellation
    pub kill_grace: Duration,
    pub channel_capacity: usize,
}

impl RelayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.pipeline.timeout_secs),
            kill_grace: Duration::from_millis(config.pipeline.kill_grace_ms),
            channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What happened during a relayed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayStats {
    pub forwarded: usize,
    /// Non-protocol lines on the worker's stdout
    pub dropped_lines: usize,
    pub terminal_forwarded: bool,
    pub timed_out: bool,
    pub cancelled: bool,
    pub exit_code: Option<i32>,
}

/// Consumer side of a relayed run.
///
/// Dropping the handle cancels the run.
#[derive(Debug)]
pub struct RelayHandle {
    events: mpsc::Receiver<ProgressEvent>,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<RelayStats>,
}

impl RelayHandle {
    /// Next event, or `None` once the run is over.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Ask the relay to terminate the worker. Events already queued stay readable.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take()
            && cancel.send(()).is_err()
        {
            tracing::debug!("Relay already finished");
        }
    }

    /// Discard unread events and wait until the worker has exited and the
    /// workspace is gone.
    pub async fn finish(mut self) -> RelayStats {
        while self.events.recv().await.is_some() {}
        match (&mut self.task).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Relay task failed");
                RelayStats::default()
            }
        }
    }
}

pub struct Relay;

impl Relay {
    /// Start `command` and relay its events.
    ///
    /// The arena is released after the worker exits, whatever the outcome.
    pub fn spawn(
        command: &WorkerCommand,
        arena: ResourceArena,
        options: RelayOptions,
    ) -> Result<RelayHandle> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SubflowError::Worker {
                message: format!(
                    "Failed to start worker {}: {}",
                    command.program.to_string_lossy(),
                    e
                ),
            })?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                return Err(SubflowError::Worker {
                    message: "Worker stdio was not captured".to_string(),
                });
            }
        };

        tracing::debug!(pid = child.id(), workspace = %arena.dir().display(), "Worker started");

        // One slot beyond the capacity stays reserved for the relay's own
        // terminal event, so it is delivered even to a consumer that stalled.
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1) + 1);
        let terminal_slot = tx.clone().try_reserve_owned().ok();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let stderr_task = tokio::spawn(collect_stderr(stderr));

        let supervisor = Supervisor {
            tx,
            terminal_slot,
            options,
            stats: RelayStats::default(),
        };
        let task = tokio::spawn(supervisor.run(
            child,
            BufReader::new(stdout),
            stderr_task,
            cancel_rx,
            arena,
        ));

        Ok(RelayHandle {
            events: rx,
            cancel: Some(cancel_tx),
            task,
        })
    }
}

enum StreamEnd {
    Closed,
    TimedOut,
    Cancelled,
}

/// Result of handing one stdout line to the consumer.
enum Forwarded {
    Done,
    TimedOut,
    Cancelled,
}

struct Supervisor {
    tx: mpsc::Sender<ProgressEvent>,
    terminal_slot: Option<mpsc::OwnedPermit<ProgressEvent>>,
    options: RelayOptions,
    stats: RelayStats,
}

impl Supervisor {
    async fn run<R>(
        mut self,
        mut child: Child,
        stdout: R,
        stderr_task: JoinHandle<VecDeque<String>>,
        mut cancel: oneshot::Receiver<()>,
        arena: ResourceArena,
    ) -> RelayStats
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        let deadline = Instant::now() + self.options.timeout;
        let mut lines = stdout.lines();

        let end = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match self.forward_line(&line, deadline, &mut cancel).await {
                        Forwarded::Done => {}
                        Forwarded::TimedOut => break StreamEnd::TimedOut,
                        Forwarded::Cancelled => break StreamEnd::Cancelled,
                    },
                    Ok(None) => break StreamEnd::Closed,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read worker output");
                        break StreamEnd::Closed;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => break StreamEnd::TimedOut,
                _ = &mut cancel => break StreamEnd::Cancelled,
                _ = self.tx.closed() => break StreamEnd::Cancelled,
            }
        };

        let failure = match end {
            StreamEnd::Closed => match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) => {
                    self.stats.exit_code = status.code();
                    tracing::debug!(%status, "Worker exited");
                    Some(status.to_string())
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to wait for worker");
                    Some(e.to_string())
                }
                Err(_) => {
                    self.stats.timed_out = true;
                    kill(&mut child).await;
                    None
                }
            },
            StreamEnd::TimedOut => {
                self.stats.timed_out = true;
                tracing::warn!(
                    timeout_secs = self.options.timeout.as_secs(),
                    "Worker timed out"
                );
                kill(&mut child).await;
                None
            }
            StreamEnd::Cancelled => {
                self.stats.cancelled = !self.stats.terminal_forwarded;
                terminate(&mut child, self.options.kill_grace).await;
                None
            }
        };

        let stderr_tail = join_stderr(stderr_task, self.options.kill_grace).await;

        if !self.stats.terminal_forwarded && !self.stats.cancelled {
            let message = if self.stats.timed_out {
                SubflowError::Timeout {
                    secs: self.options.timeout.as_secs(),
                }
                .to_string()
            } else {
                let detail = if stderr_tail.is_empty() {
                    format!(
                        "exited without a result ({})",
                        failure.unwrap_or_else(|| "unknown status".to_string())
                    )
                } else {
                    stderr_tail
                };
                SubflowError::Worker { message: detail }.to_string()
            };
            let event = ProgressEvent::Error { message };
            match self.terminal_slot.take() {
                Some(permit) => {
                    permit.send(event);
                    self.stats.terminal_forwarded = true;
                }
                None => {
                    if self.tx.send(event).await.is_ok() {
                        self.stats.terminal_forwarded = true;
                    }
                }
            }
        }

        arena.release();
        tracing::debug!(
            forwarded = self.stats.forwarded,
            dropped = self.stats.dropped_lines,
            "Relay finished"
        );
        self.stats
    }

    /// Forward one stdout line.
    ///
    /// Waiting for channel space still honours the deadline and cancellation.
    async fn forward_line(
        &mut self,
        line: &str,
        deadline: Instant,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Forwarded {
        let Some(event) = parse_line(line) else {
            if !line.trim().is_empty() {
                self.stats.dropped_lines += 1;
                tracing::debug!(line, "Dropped non-protocol worker output");
            }
            return Forwarded::Done;
        };

        if self.stats.terminal_forwarded {
            tracing::debug!(kind = event.kind(), "Ignoring event after terminal event");
            return Forwarded::Done;
        }

        let terminal = event.is_terminal();
        tokio::select! {
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    return Forwarded::Cancelled;
                }
            }
            _ = tokio::time::sleep_until(deadline) => return Forwarded::TimedOut,
            _ = cancel => {
                tracing::debug!("Cancelled while the consumer was not reading");
                return Forwarded::Cancelled;
            }
        }
        self.stats.forwarded += 1;
        self.stats.terminal_forwarded = terminal;
        Forwarded::Done
    }
}

/// Keep the last lines of the worker's stderr, logging each at debug level.
async fn collect_stderr(stderr: ChildStderr) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = strip_ansi(&line);
        tracing::debug!(target: "subflow::worker", "{}", line);
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}

/// Remove terminal escape sequences (colours, cursor moves) from a log line.
fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        if chars.next_if_eq(&'[').is_some() {
            // CSI: parameters and intermediates up to a final byte in @..=~
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        } else {
            chars.next();
        }
    }
    out
}

/// Wait briefly for the stderr reader; a leftover grandchild may hold the pipe open.
async fn join_stderr(mut task: JoinHandle<VecDeque<String>>, wait: Duration) -> String {
    match tokio::time::timeout(wait, &mut task).await {
        Ok(Ok(tail)) => tail.into_iter().collect::<Vec<_>>().join("\n"),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Stderr reader failed");
            String::new()
        }
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

/// SIGTERM the worker's group, then SIGKILL if it outlives the grace period.
async fn terminate(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id()
        && let Err(e) = signal_process_group(pid, libc::SIGTERM)
    {
        tracing::debug!(pid, error = %e, "SIGTERM failed");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(%status, "Worker terminated"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for worker"),
        Err(_) => {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "Worker ignored SIGTERM, killing"
            );
            kill(child).await;
        }
    }
}

/// SIGKILL the worker's group and reap the worker.
async fn kill(child: &mut Child) {
    if let Some(pid) = child.id()
        && let Err(e) = signal_process_group(pid, libc::SIGKILL)
    {
        tracing::debug!(pid, error = %e, "SIGKILL failed");
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Worker already gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh", ["-c", script])
    }

    fn options(timeout_ms: u64) -> RelayOptions {
        RelayOptions {
            timeout: Duration::from_millis(timeout_ms),
            kill_grace: Duration::from_millis(500),
            channel_capacity: 8,
        }
    }

    async fn collect(mut handle: RelayHandle) -> (Vec<ProgressEvent>, RelayStats) {
        let mut events = Vec::new();
        while let Some(event) = handle.next().await {
            events.push(event);
        }
        (events, handle.finish().await)
    }

    #[test]
    fn strip_ansi_removes_colour_codes() {
        let line = "\u{1b}[2m2024-01-01T00:00:00Z\u{1b}[0m \u{1b}[31mERROR\u{1b}[0m model missing";
        assert_eq!(strip_ansi(line), "2024-01-01T00:00:00Z ERROR model missing");
        assert_eq!(strip_ansi("plain text"), "plain text");
        assert_eq!(strip_ansi("dangling \u{1b}"), "dangling ");
    }

    #[tokio::test]
    async fn stderr_colours_do_not_reach_the_error_message() {
        let root = TempDir::new().unwrap();
        let arena = ResourceArena::acquire(root.path(), "relay-8").unwrap();
        let script = r#"
printf '\033[31mERROR\033[0m model file is corrupt\n' >&2
exit 1
"#;

        let handle = Relay::spawn(&sh(script), arena, options(5_000)).unwrap();
        let (events, _) = collect(handle).await;

        match events.last() {
            Some(ProgressEvent::Error { message }) => {
                assert!(!message.contains('\u{1b}'), "{:?}", message);
                assert!(message.contains("ERROR model file is corrupt"), "{}", message);
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[test]
    fn worker_command_from_args() {
        let args = WorkerArgs {
            url: "https://example.com".to_string(),
            model_size: crate::stt::engine::ModelSize::Base,
            chunk_duration: 30.0,
            workspace: "/tmp/run-x".into(),
            backend: None,
            models_dir: "/models".into(),
            language: "auto".to_string(),
            threads: None,
            downloader: "yt-dlp".to_string(),
            downloader_args: Vec::new(),
        };
        let command = WorkerCommand::worker("/usr/bin/subflow", &args);
        assert_eq!(command.program, OsString::from("/usr/bin/subflow"));
        assert_eq!(command.args[0], OsString::from("worker"));
    }

    #[tokio::test]
    async fn forwards_events_and_drops_noise() {
        let root = TempDir::new().unwrap();
        let arena = ResourceArena::acquire(root.path(), "relay-1").unwrap();
        let workspace = arena.dir().to_path_buf();
        let script = r#"
echo '{"type":"status","message":"Downloading audio..."}'
echo 'whisper_init: loading model'
echo '{"type":"chunk_completed","index":0}'
echo '{"type":"completed","final_text":"","total_segments":0}'
echo '{"type":"status","message":"late"}'
"#;

        let handle = Relay::spawn(&sh(script), arena, options(5_000)).unwrap();
        let (events, stats) = collect(handle).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[1], ProgressEvent::ChunkCompleted { index: 0 });
        assert!(events[2].is_terminal());
        assert_eq!(stats.dropped_lines, 1);
        assert_eq!(stats.forwarded, 3);
        assert_eq!(stats.exit_code, Some(0));
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn exit_without_terminal_event_reports_stderr() {
        let root = TempDir::new().unwrap();
        let arena = ResourceArena::acquire(root.path(), "relay-2").unwrap();
        let script = r#"
echo '{"type":"status","message":"Loading model"}'
echo 'fatal: model file is corrupt' >&2
exit 3
"#;

        let handle = Relay::spawn(&sh(script), arena, options(5_000)).unwrap();
        let (events, stats) = collect(handle).await;

        assert_eq!(stats.exit_code, Some(3));
        match events.last() {
            Some(ProgressEvent::Error { message }) => {
                assert!(message.contains("model file is corrupt"), "{}", message)
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeout_kills_worker_and_reports() {
        let root = TempDir::new().unwrap();
        let arena = ResourceArena::acquire(root.path(), "relay-3").unwrap();
        let workspace = arena.dir().to_path_buf();
        let script = r#"
echo '{"type":"status","message":"Downloading audio..."}'
sleep 30
"#;

        let started = std::time::Instant::now();
        let handle = Relay::spawn(&sh(script), arena, options(300)).unwrap();
        let (events, stats) = collect(handle).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(stats.timed_out);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Error {
                message: "Transcription timed out after 0 seconds".to_string()
            })
        );
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn cancel_terminates_worker_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let arena = ResourceArena::acquire(root.path(), "relay-4").unwrap();
        let workspace = arena.dir().to_path_buf();
        std::fs::write(workspace.join("audio.wav"), b"partial").unwrap();
        let script = r#"
echo '{"type":"status","message":"Downloading audio..."}'
sleep 30
"#;

        let mut handle = Relay::spawn(&sh(script), arena, options(60_000)).unwrap();
        assert!(matches!(
            handle.next().await,
            Some(ProgressEvent::Status { .. })
        ));

        let started = std::time::Instant::now();
        handle.cancel();
        let stats = handle.finish().await;

        assert!(stats.cancelled);
        assert!(!stats.terminal_forwarded);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!workspace.exists());
    }

    const CHATTY_THEN_STALL: &str = r#"
for i in 1 2 3 4 5; do
  echo '{"type":"status","message":"step"}'
done
sleep 30
"#;

    async fn wait_until_gone(path: &std::path::Path, within: Duration) {
        let deadline = std::time::Instant::now() + within;
        while path.exists() {
            assert!(
                std::time::Instant::now() < deadline,
                "workspace still present: {}",
                path.display()
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn timeout_fires_while_consumer_is_not_reading() {
        let root = TempDir::new().unwrap();
        let arena = ResourceArena::acquire(root.path(), "relay-6").unwrap();
        let workspace = arena.dir().to_path_buf();
        let limits = RelayOptions {
            channel_capacity: 1,
            ..options(300)
        };

        let handle = Relay::spawn(&sh(CHATTY_THEN_STALL), arena, limits).unwrap();
        // Nobody reads while the relay is blocked on a full channel
        wait_until_gone(&workspace, Duration::from_secs(5)).await;

        let (events, stats) = collect(handle).await;
        assert!(stats.timed_out);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Error {
                message: "Transcription timed out after 0 seconds".to_string()
            })
        );
    }

    #[tokio::test]
    async fn cancel_works_while_consumer_is_not_reading() {
        let root = TempDir::new().unwrap();
        let arena = ResourceArena::acquire(root.path(), "relay-7").unwrap();
        let workspace = arena.dir().to_path_buf();
        let limits = RelayOptions {
            channel_capacity: 1,
            ..options(60_000)
        };

        let mut handle = Relay::spawn(&sh(CHATTY_THEN_STALL), arena, limits).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel();
        wait_until_gone(&workspace, Duration::from_secs(5)).await;

        let stats = handle.finish().await;
        assert!(stats.cancelled);
        assert!(!stats.timed_out);
    }

    #[tokio::test]
    async fn missing_program_is_a_worker_error() {
        let root = TempDir::new().unwrap();
        let arena = ResourceArena::acquire(root.path(), "relay-5").unwrap();
        let command = WorkerCommand::new("/nonexistent/subflow-worker", Vec::<String>::new());

        let result = Relay::spawn(&command, arena, options(1_000));
        assert!(matches!(result, Err(SubflowError::Worker { .. })));
        // The arena was dropped with the failed spawn
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
