use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ReplayError {
    /// The replayer process could not be started at all. Fatal for the
    /// whole triage pass, unlike a timeout or an uneventful replay.
    #[error("failed to spawn replayer {replayer:?}: {source}")]
    Spawn {
        replayer: PathBuf,
        source: std::io::Error,
    },

    #[error("error waiting for replay of {test_case:?}: {detail}")]
    Wait { test_case: PathBuf, detail: String },
}

/// How one replay ended. Captured standard-error text is the sole signal
/// channel for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStatus {
    Exited {
        exit_code: Option<i32>,
        stderr_lines: Vec<String>,
    },
    /// The replay exceeded its budget and was killed. Expected for inputs
    /// that hang the instrumented program; contributes no finding.
    TimedOut,
}

/// Replays recorded test cases against one instrumented artifact, one
/// bounded subprocess per test case.
#[derive(Debug, Clone)]
pub struct ReplayRunner {
    replayer: PathBuf,
    instrumented_artifact: PathBuf,
    timeout: Duration,
}

impl ReplayRunner {
    pub fn new(replayer: PathBuf, instrumented_artifact: PathBuf, timeout: Duration) -> Self {
        Self {
            replayer,
            instrumented_artifact,
            timeout,
        }
    }

    pub fn instrumented_artifact(&self) -> &Path {
        &self.instrumented_artifact
    }

    /// Runs `<replayer> <instrumented-artifact> <test-case>` under the
    /// configured timeout, capturing stderr.
    pub fn replay(&self, test_case: &Path) -> Result<ReplayStatus, ReplayError> {
        let mut child = Command::new(&self.replayer)
            .arg(&self.instrumented_artifact)
            .arg(test_case)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ReplayError::Spawn {
                replayer: self.replayer.clone(),
                source: e,
            })?;

        let wait_err = |detail: String| ReplayError::Wait {
            test_case: test_case.to_path_buf(),
            detail,
        };

        // Drain stderr on its own thread so a chatty replay cannot fill the
        // pipe and stall before the deadline check runs.
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| wait_err("child stderr was not piped".to_string()))?;
        let drain = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        });

        let start_time = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let captured = drain.join().unwrap_or_default();
                    let stderr_lines = String::from_utf8_lossy(&captured)
                        .lines()
                        .map(str::to_string)
                        .collect();
                    return Ok(ReplayStatus::Exited {
                        exit_code: status.code(),
                        stderr_lines,
                    });
                }
                Ok(None) => {
                    if start_time.elapsed() > self.timeout {
                        if let Err(e) = child.kill() {
                            return Err(wait_err(format!(
                                "failed to kill timed-out replay: {e}"
                            )));
                        }
                        let _ = child.wait();
                        let _ = drain.join();
                        return Ok(ReplayStatus::TimedOut);
                    }
                    thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(e) => return Err(wait_err(e.to_string())),
            }
        }
    }
}
