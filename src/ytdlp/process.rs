use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::ytdlp::progress::{self, ProgressFn};

/// How often the watchdog wakes up to check deadlines while waiting for
/// output. Keeps stuck-detection responsive without busy-waiting.
const WATCHDOG_INTERVAL: Duration = Duration::from_millis(100);
/// Grace period for the process to exit after both streams close.
const EXIT_GRACE: Duration = Duration::from_secs(10);
/// Bounded reap after a kill; a process that survives this is logged and
/// abandoned to the kill-on-drop backstop.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Cumulative wall-clock budget for one logical download, shared across
/// every attempt and strategy.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    pub started: Instant,
    pub max_total: Duration,
}

impl RunBudget {
    pub fn start(max_total: Duration) -> Self {
        RunBudget { started: Instant::now(), max_total }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.max_total.saturating_sub(self.elapsed())
    }

    pub fn exhausted(&self) -> bool {
        self.elapsed() > self.max_total
    }
}

/// Result of one subprocess execution, streams kept separate.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best available diagnostic text for a failed attempt.
    pub fn diagnostic(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.clone()
        } else if !self.stdout.trim().is_empty() {
            self.stdout.clone()
        } else {
            format!("downloader exited with code {}", self.exit_code)
        }
    }
}

/// Ways a run can fail before producing an exit code. `BudgetExhausted`
/// is distinct from `AttemptTimeout` so the orchestrator knows not to
/// retry further.
#[derive(Debug)]
pub enum RunError {
    AttemptTimeout { limit: Duration },
    BudgetExhausted { limit: Duration },
    Stalled { idle: Duration },
    WouldNotExit,
    Spawn(std::io::Error),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::AttemptTimeout { limit } => {
                write!(f, "download attempt timed out after {}s", limit.as_secs())
            }
            RunError::BudgetExhausted { limit } => {
                write!(f, "maximum total time ({}s) exceeded", limit.as_secs())
            }
            RunError::Stalled { idle } => {
                write!(f, "download appears stuck (no output for {}s)", idle.as_secs())
            }
            RunError::WouldNotExit => {
                write!(f, "process did not terminate after its streams closed")
            }
            RunError::Spawn(e) => write!(f, "failed to spawn downloader: {e}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

enum StreamLine {
    Out(String),
    Err(String),
}

/// Execute one command with live progress reporting and stuck detection.
///
/// Both output streams are drained by independent tasks feeding one
/// channel, so a chatty stream can never block the other. The consumer
/// loop doubles as the watchdog: per-attempt timeout, cumulative budget
/// and inactivity are checked every tick, and the child is killed on the
/// way out of every failure path.
pub async fn run_command(
    program: &Path,
    args: &[String],
    attempt_timeout: Duration,
    budget: &RunBudget,
    stall_timeout: Duration,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<CommandOutput, RunError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(RunError::Spawn)?;

    let stdout = child.stdout.take().expect("stdout not captured");
    let stderr = child.stderr.take().expect("stderr not captured");

    let (tx, mut rx) = mpsc::channel::<StreamLine>(64);
    let out_tx = tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if out_tx.send(StreamLine::Out(line)).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(StreamLine::Err(line)).await.is_err() {
                break;
            }
        }
    });

    let attempt_started = Instant::now();
    let mut last_activity = Instant::now();
    let mut ticker = time::interval(WATCHDOG_INTERVAL);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let mut stdout_lines: Vec<String> = Vec::new();
    let mut stderr_lines: Vec<String> = Vec::new();
    let mut last_percent = 0.0_f64;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(StreamLine::Out(line)) => {
                    last_activity = Instant::now();
                    handle_line(&line, &mut last_percent, &mut progress);
                    stdout_lines.push(line);
                }
                Some(StreamLine::Err(line)) => {
                    last_activity = Instant::now();
                    handle_line(&line, &mut last_percent, &mut progress);
                    stderr_lines.push(line);
                }
                // Both reader tasks are done: the streams closed.
                None => break,
            },
            _ = ticker.tick() => {
                if attempt_started.elapsed() > attempt_timeout {
                    kill_process(&mut child).await;
                    return Err(RunError::AttemptTimeout { limit: attempt_timeout });
                }
                if budget.exhausted() {
                    kill_process(&mut child).await;
                    return Err(RunError::BudgetExhausted { limit: budget.max_total });
                }
                if last_activity.elapsed() > stall_timeout {
                    // Silence only counts as stuck while the child is alive.
                    if matches!(child.try_wait(), Ok(None)) {
                        kill_process(&mut child).await;
                        return Err(RunError::Stalled { idle: stall_timeout });
                    }
                }
            }
        }
    }

    let status = match time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return Err(RunError::Spawn(e)),
        Err(_) => {
            kill_process(&mut child).await;
            return Err(RunError::WouldNotExit);
        }
    };

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: stdout_lines.join("\n"),
        stderr: stderr_lines.join("\n"),
    })
}

/// Classify one output line, forwarding at most one event to the callback.
/// Percent-bearing events are gated so percent never goes backwards within
/// an attempt; status-only events always pass through.
fn handle_line(line: &str, last_percent: &mut f64, progress: &mut Option<&mut ProgressFn<'_>>) {
    log::trace!("downloader output: {}", line);
    let Some(update) = progress::parse_progress_line(line) else {
        return;
    };
    let report = update.message.is_some() || update.percent >= *last_percent;
    if update.percent > *last_percent {
        *last_percent = update.percent;
    }
    if report {
        if let Some(callback) = progress.as_deref_mut() {
            callback(&update);
        }
    }
}

async fn kill_process(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        log::warn!("failed to kill downloader process: {}", e);
    }
    if time::timeout(KILL_REAP_TIMEOUT, child.wait()).await.is_err() {
        log::warn!("downloader process did not terminate after kill");
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::ytdlp::progress::ProgressUpdate;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("sh")
    }

    fn args(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn generous_budget() -> RunBudget {
        RunBudget::start(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn captures_streams_separately() {
        let output = run_command(
            &sh(),
            &args("echo hello; echo oops >&2"),
            Duration::from_secs(10),
            &generous_budget(),
            Duration::from_secs(10),
            None,
        )
        .await
        .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_an_error() {
        let output = run_command(
            &sh(),
            &args("echo 'ERROR: Video unavailable' >&2; exit 3"),
            Duration::from_secs(10),
            &generous_budget(),
            Duration::from_secs(10),
            None,
        )
        .await
        .unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(output.diagnostic().contains("Video unavailable"));
    }

    #[tokio::test]
    async fn diagnostic_falls_back_to_stdout_then_exit_code() {
        let output = run_command(
            &sh(),
            &args("echo 'stdout only'; exit 1"),
            Duration::from_secs(10),
            &generous_budget(),
            Duration::from_secs(10),
            None,
        )
        .await
        .unwrap();
        assert_eq!(output.diagnostic().trim(), "stdout only");

        let silent = run_command(
            &sh(),
            &args("exit 7"),
            Duration::from_secs(10),
            &generous_budget(),
            Duration::from_secs(10),
            None,
        )
        .await
        .unwrap();
        assert!(silent.diagnostic().contains("code 7"));
    }

    #[tokio::test]
    async fn attempt_timeout_kills_the_process() {
        let started = Instant::now();
        let result = run_command(
            &sh(),
            &args("sleep 30"),
            Duration::from_millis(300),
            &generous_budget(),
            Duration::from_secs(30),
            None,
        )
        .await;
        assert!(matches!(result, Err(RunError::AttemptTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn stalled_process_is_detected() {
        let result = run_command(
            &sh(),
            &args("echo started; sleep 30"),
            Duration::from_secs(30),
            &generous_budget(),
            Duration::from_millis(300),
            None,
        )
        .await;
        assert!(matches!(result, Err(RunError::Stalled { .. })));
    }

    #[tokio::test]
    async fn exhausted_budget_stops_the_attempt() {
        let budget = RunBudget {
            started: Instant::now() - Duration::from_secs(5),
            max_total: Duration::from_secs(1),
        };
        let result = run_command(
            &sh(),
            &args("sleep 30"),
            Duration::from_secs(30),
            &budget,
            Duration::from_secs(30),
            None,
        )
        .await;
        assert!(matches!(result, Err(RunError::BudgetExhausted { .. })));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let result = run_command(
            Path::new("/nonexistent/definitely-not-a-binary"),
            &[],
            Duration::from_secs(5),
            &generous_budget(),
            Duration::from_secs(5),
            None,
        )
        .await;
        assert!(matches!(result, Err(RunError::Spawn(_))));
    }

    #[tokio::test]
    async fn progress_events_arrive_in_order_and_never_regress() {
        let script = "echo '[download]  10.0% of 1.0MiB' >&2; \
                      echo '[download]   5.0% of 1.0MiB' >&2; \
                      echo '[download]  20.0% of 1.0MiB' >&2";
        let mut percents: Vec<f64> = Vec::new();
        let mut callback = |update: &ProgressUpdate| percents.push(update.percent);
        let output = run_command(
            &sh(),
            &args(script),
            Duration::from_secs(10),
            &generous_budget(),
            Duration::from_secs(10),
            Some(&mut callback),
        )
        .await
        .unwrap();
        assert!(output.success());
        assert_eq!(percents, vec![10.0, 20.0]);
    }

    #[tokio::test]
    async fn status_lines_reach_the_callback() {
        let mut messages: Vec<String> = Vec::new();
        let mut callback = |update: &ProgressUpdate| {
            if let Some(message) = &update.message {
                messages.push(message.clone());
            }
        };
        run_command(
            &sh(),
            &args("echo '[ExtractAudio] Destination: x.mp3' >&2"),
            Duration::from_secs(10),
            &generous_budget(),
            Duration::from_secs(10),
            Some(&mut callback),
        )
        .await
        .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Destination"));
    }
}
