//! Training task abstraction: spawn the external training entry point,
//! await it with a caller-supplied timeout, capture exit code and output.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// Captured outcome of one training run.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// An external training procedure. The production implementation execs the
/// training binary; tests substitute scripted outcomes.
#[async_trait]
pub trait TrainingTask: Send + Sync {
    async fn run(&self) -> Result<TrainingOutput>;
}

/// Runs the configured training executable with no arguments. The child is
/// killed if the awaiting future is dropped, which is how the trigger's
/// timeout hard-kills a stuck run.
pub struct ProcessTrainingTask {
    command: String,
}

impl ProcessTrainingTask {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TrainingTask for ProcessTrainingTask {
    async fn run(&self) -> Result<TrainingOutput> {
        let output = Command::new(&self.command)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn training command {}", self.command))?;

        Ok(TrainingOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::{TrainingOutput, TrainingTask};
    use anyhow::Result;
    use async_trait::async_trait;

    /// Scripted task for trigger tests: counts runs and replays a fixed
    /// outcome after an optional delay.
    pub(crate) struct ScriptedTrainingTask {
        pub(crate) runs: AtomicUsize,
        outcome: Result<TrainingOutput, String>,
        delay: Duration,
    }

    impl ScriptedTrainingTask {
        pub(crate) fn succeeding(stdout: &str) -> Self {
            Self {
                runs: AtomicUsize::new(0),
                outcome: Ok(TrainingOutput {
                    success: true,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                }),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn failing(stderr: &str) -> Self {
            Self {
                runs: AtomicUsize::new(0),
                outcome: Ok(TrainingOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                }),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn erroring(message: &str) -> Self {
            Self {
                runs: AtomicUsize::new(0),
                outcome: Err(message.to_string()),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn run_count(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TrainingTask for ScriptedTrainingTask {
        async fn run(&self) -> Result<TrainingOutput> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.outcome {
                Ok(output) => Ok(output.clone()),
                Err(message) => Err(anyhow::anyhow!("{message}")),
            }
        }
    }
}
