//! Bounded poll until the database answers a trivial query.

use crate::console::Console;
use crate::engine::ContainerEngine;
use crate::error::{EngineError, Result};
use crate::provisioning::{ShellCommand, exec_cmd, shell_quote};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, info, warn};

/// Pause between two probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VersionProbe: Send + Sync {
    /// Runs a read-only query and returns the server version
    async fn server_version(&self) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready { version: String, attempts: u32 },
    TimedOut { attempts: u32 },
}

impl ReadinessOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessOutcome::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ReadinessOutcome::Ready { attempts, .. } | ReadinessOutcome::TimedOut { attempts } => {
                *attempts
            }
        }
    }
}

/// Probes until the store answers or `timeout` passes.
///
/// Never fails: a timeout is reported on the console and in the outcome.
/// A probe still running at the deadline is abandoned.
pub async fn wait_for_store(
    probe: &dyn VersionProbe,
    console: &dyn Console,
    timeout: Duration,
    interval: Duration,
) -> ReadinessOutcome {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0;

    console.waiting("Waiting for MySQL server starts...");
    info!("⏳ Waiting up to {:?} for the database", timeout);

    loop {
        if Instant::now() >= deadline {
            console.failure("Wait timeout expired. MySQL server does not respond!");
            warn!("Database not ready after {} attempts", attempts);
            return ReadinessOutcome::TimedOut { attempts };
        }

        attempts += 1;
        match timeout_at(deadline, probe.server_version()).await {
            Ok(Ok(version)) => {
                console.success(&format!("MySQL {} is running.", version));
                info!("✅ Database ready after {} attempt(s)", attempts);
                return ReadinessOutcome::Ready { version, attempts };
            }
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", attempts, e);
                sleep_until((Instant::now() + interval).min(deadline)).await;
                console.waiting("Waiting...");
            }
            Err(_) => debug!("Probe {} still pending at the deadline", attempts),
        }
    }
}

/// Asks the database container's own client for the server version
pub struct ExecVersionProbe {
    engine: Arc<dyn ContainerEngine>,
    container: String,
    root_password: String,
}

impl ExecVersionProbe {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        container: impl Into<String>,
        root_password: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            container: container.into(),
            root_password: root_password.into(),
        }
    }

    fn command(&self) -> ShellCommand {
        ShellCommand::Single(format!(
            "MYSQL_PWD={} mysql -uroot -N -e 'SELECT VERSION()'",
            shell_quote(&self.root_password)
        ))
    }
}

#[async_trait]
impl VersionProbe for ExecVersionProbe {
    async fn server_version(&self) -> Result<String> {
        let mut output = exec_cmd(self.engine.as_ref(), &self.container, &self.command()).await?;
        let mut version = None;
        while let Some(chunk) = output.next().await {
            let chunk = chunk?;
            if !chunk.trim().is_empty() {
                version = Some(chunk.trim().to_string());
            }
        }

        version.ok_or_else(|| {
            EngineError::Decode {
                reason: format!("{} returned no version", self.container),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{MemoryConsole, Tone};
    use crate::error::{DeployError, EngineError};

    fn refused() -> DeployError {
        EngineError::CommandFailed {
            command: "mysql".to_string(),
            code: Some(1),
            stderr: "Can't connect to local MySQL server".to_string(),
        }
        .into()
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_store_times_out_without_failing() {
        let mut probe = MockVersionProbe::new();
        probe.expect_server_version().returning(|| Err(refused()));
        let console = MemoryConsole::new();

        let outcome = wait_for_store(
            &probe,
            &console,
            Duration::from_secs(2),
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(outcome, ReadinessOutcome::TimedOut { .. }));
        assert!(outcome.attempts() >= 2);
        let last = console.lines().pop().unwrap();
        assert_eq!(last.0, Tone::Failure);
        assert!(last.1.contains("Wait timeout expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn version_is_reported_once_the_store_answers() {
        let mut probe = MockVersionProbe::new();
        let mut seq = mockall::Sequence::new();
        probe
            .expect_server_version()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| Err(refused()));
        probe
            .expect_server_version()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok("5.7.44".to_string()));
        let console = MemoryConsole::new();

        let outcome = wait_for_store(
            &probe,
            &console,
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(
            outcome,
            ReadinessOutcome::Ready {
                version: "5.7.44".to_string(),
                attempts: 3
            }
        );
        assert!(console.contains("MySQL 5.7.44 is running."));
        assert_eq!(
            console.text().iter().filter(|l| *l == "Waiting...").count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn long_interval_does_not_outlast_the_timeout() {
        let mut probe = MockVersionProbe::new();
        probe.expect_server_version().returning(|| Err(refused()));
        let console = MemoryConsole::new();
        let started = Instant::now();

        let outcome = wait_for_store(
            &probe,
            &console,
            Duration::from_secs(2),
            Duration::from_secs(10),
        )
        .await;

        assert_eq!(outcome, ReadinessOutcome::TimedOut { attempts: 1 });
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_never_probes() {
        let mut probe = MockVersionProbe::new();
        probe.expect_server_version().never();
        let console = MemoryConsole::new();

        let outcome =
            wait_for_store(&probe, &console, Duration::ZERO, DEFAULT_POLL_INTERVAL).await;
        assert_eq!(outcome, ReadinessOutcome::TimedOut { attempts: 0 });
    }
}
