/*!
 * Worker Processes
 * Spawning, polling, and output capture for isolated worker processes
 */

use super::batch::{Batch, Request};
use crate::core::errors::{HarnessError, Result};
use crate::core::types::Token;
use log::{info, warn};
use std::fs;
use std::process::{Child, Command, ExitStatus, Stdio};
use tempfile::NamedTempFile;

/// Launch-command template for worker processes
///
/// The full command line is `executable safe_flags.. batch_flags.. entry
/// host port token`; the child connects back over the host/port channel and
/// pulls its requests by token.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub executable: String,
    /// Vetted flags applied to every worker
    pub safe_flags: Vec<String>,
    /// Entry-point argument handed to the executable
    pub entry: String,
    pub host: String,
    pub port: u16,
}

impl WorkerConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            safe_flags: Vec::new(),
            entry: "worker".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }

    pub fn with_safe_flags(mut self, flags: Vec<String>) -> Self {
        self.safe_flags = flags;
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Shell-metacharacter screen for the launch command
    ///
    /// `Command` never goes through a shell, but worker launch lines are
    /// logged and replayed by hand during postmortems, so dangerous
    /// arguments are rejected up front.
    fn validate(&self, batch_flags: &[String]) -> Result<()> {
        if self.executable.trim().is_empty() {
            return Err(HarnessError::Spawn("empty worker executable".into()));
        }
        let dangerous = [';', '|', '&', '\n', '\r', '\0', '`', '$'];
        for arg in self
            .safe_flags
            .iter()
            .chain(batch_flags.iter())
            .chain(std::iter::once(&self.executable))
        {
            if dangerous.iter().any(|&c| arg.contains(c)) {
                return Err(HarnessError::Spawn(format!(
                    "launch argument contains dangerous characters: {:?}",
                    arg
                )));
            }
        }
        Ok(())
    }
}

/// One spawned worker process and its batch of requests
///
/// Holds the process, its captured output files, and the admission permits
/// it occupies. Dropping a still-running worker kills and reaps it, so the
/// process and its channel are released together on every exit path.
#[derive(Debug)]
pub struct WorkerProcess {
    token: Token,
    child: Child,
    stdout: NamedTempFile,
    stderr: NamedTempFile,
    permits: usize,
    requests: Vec<Request>,
    done: bool,
}

impl WorkerProcess {
    /// Launch a worker for a batch under a fresh token
    pub fn spawn(
        config: &WorkerConfig,
        batch: &Batch,
        token: Token,
        permits: usize,
    ) -> Result<Self> {
        config.validate(&batch.key.launch_args)?;
        let stdout = NamedTempFile::new()?;
        let stderr = NamedTempFile::new()?;

        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.safe_flags)
            .args(&batch.key.launch_args)
            .arg(&config.entry)
            .arg(&config.host)
            .arg(config.port.to_string())
            .arg(token.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.reopen()?))
            .stderr(Stdio::from(stderr.reopen()?));

        let child = cmd
            .spawn()
            .map_err(|e| HarnessError::Spawn(format!("{}: {}", config.executable, e)))?;

        info!(
            "spawned worker {} (os pid {}) for {} request(s)",
            token,
            child.id(),
            batch.requests.len()
        );

        Ok(Self {
            token,
            child,
            stdout,
            stderr,
            permits,
            requests: batch.requests.clone(),
            done: false,
        })
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Non-blocking liveness check
    pub fn poll(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.done = true;
                Ok(Some(status))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Captured stdout and stderr so far
    pub fn captured_output(&self) -> (String, String) {
        let out = fs::read_to_string(self.stdout.path()).unwrap_or_default();
        let err = fs::read_to_string(self.stderr.path()).unwrap_or_default();
        (out, err)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if !self.done {
            warn!("killing still-running worker {}", self.token);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
