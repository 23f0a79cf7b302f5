//! Shell-command job bodies used by the daemon.

use anyhow::{bail, Context, Result};
use tokio::process::Command;

use crate::config::JobConfig;

/// An external program run as a job body. A non-zero exit is a failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandJob {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandJob {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("failed to spawn '{}'", self.program))?;

        if !status.success() {
            bail!("'{}' exited with {}", self.program, status);
        }
        Ok(())
    }
}

impl From<&JobConfig> for CommandJob {
    fn from(job: &JobConfig) -> Self {
        Self::new(job.command.clone(), job.args.clone())
    }
}
