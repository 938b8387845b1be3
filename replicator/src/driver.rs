//! Sequential stage driver for the `pipeline` subcommand.
//!
//! Each stage is an external command. A stage is retried after a fixed delay when it exits
//! unsuccessfully, fails to start or exceeds its timeout. The driver stops at the first stage
//! that exhausts its retries.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, info_span, warn, Instrument};

/// Retries after the first attempt of a default stage.
const DEFAULT_RETRIES: u32 = 3;

/// Delay between two attempts of a default stage.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

/// Upper bound on the running time of a single attempt of a default stage.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A command run by the driver.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub program: OsString,
    pub args: Vec<String>,
    /// Variables added to the inherited environment.
    pub env: Vec<(String, String)>,
    pub retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Stage {
    pub fn new(name: impl Into<String>, program: impl Into<OsString>) -> Self {
        Stage {
            name: name.into(),
            program: program.into(),
            args: vec![],
            env: vec![],
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn retries(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Why a single attempt of a stage failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to wait for command: {0}")]
    Wait(#[source] io::Error),

    #[error("command exited with {0}")]
    ExitStatus(ExitStatus),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// A stage failed on every attempt.
#[derive(Debug, Error)]
#[error("stage `{stage}` failed after {attempts} attempt(s): {last}")]
pub struct StageError {
    pub stage: String,
    pub attempts: u32,
    #[source]
    pub last: AttemptError,
}

/// Returns the extract-load, transform and test stages.
///
/// `replicator` is the path of the extract-load binary, normally the current executable.
/// The transform and test stages run dbt from the working directory.
pub fn default_stages(replicator: PathBuf) -> Vec<Stage> {
    vec![
        Stage::new("extract_load", replicator).args(["run"]),
        Stage::new("transform", "dbt").args(["run", "--profiles-dir", "."]),
        Stage::new("test", "dbt").args(["test", "--profiles-dir", "."]),
    ]
}

/// Runs `stages` in order, stopping at the first one that fails all of its attempts.
pub async fn run_stages(stages: &[Stage]) -> Result<(), StageError> {
    for stage in stages {
        let span = info_span!("stage", stage = %stage.name);
        run_stage(stage).instrument(span).await?;
    }

    Ok(())
}

/// Runs `stage` until an attempt succeeds or its retries are exhausted.
pub async fn run_stage(stage: &Stage) -> Result<(), StageError> {
    let max_attempts = stage.retries.saturating_add(1);
    let mut attempt = 1;

    loop {
        info!(attempt, max_attempts, "running stage");

        match run_attempt(stage).await {
            Ok(()) => {
                info!(attempt, "stage succeeded");
                return Ok(());
            }
            Err(err) if attempt < max_attempts => {
                warn!(
                    attempt,
                    error = %err,
                    retry_in = ?stage.retry_delay,
                    "stage attempt failed, retrying"
                );
                tokio::time::sleep(stage.retry_delay).await;
                attempt += 1;
            }
            Err(err) => {
                error!(attempts = attempt, error = %err, "stage failed");
                return Err(StageError {
                    stage: stage.name.clone(),
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}

async fn run_attempt(stage: &Stage) -> Result<(), AttemptError> {
    let mut child = Command::new(&stage.program)
        .args(&stage.args)
        .envs(stage.env.iter().map(|(k, v)| (k, v)))
        .kill_on_drop(true)
        .spawn()
        .map_err(AttemptError::Spawn)?;

    match tokio::time::timeout(stage.timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(AttemptError::ExitStatus(status)),
        Ok(Err(err)) => Err(AttemptError::Wait(err)),
        Err(_) => {
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill timed out stage");
            }
            Err(AttemptError::Timeout(stage.timeout))
        }
    }
}
