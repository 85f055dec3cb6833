//! Container runtime driven through docker compose

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::exec::{self, CommandRunner, Invocation};

/// Attempts made by [`Runtime::verify_running`].
const VERIFY_ATTEMPTS: u32 = 3;

/// Flavor of compose available on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeTool {
    /// `docker compose` plugin
    V2,
    /// Standalone `docker-compose`
    V1,
}

impl ComposeTool {
    /// Prefers the plugin, falls back to the standalone binary.
    pub async fn detect<R: CommandRunner>(runner: &R) -> Option<Self> {
        if runner.exists("docker")
            && exec::unchecked(runner, &Invocation::new("docker").args(["compose", "version"]))
                .await
                .is_ok_and(|output| output.success())
        {
            debug!("Using `docker compose`");
            return Some(ComposeTool::V2);
        }
        if runner.exists("docker-compose")
            && exec::unchecked(runner, &Invocation::new("docker-compose").arg("--version"))
                .await
                .is_ok_and(|output| output.success())
        {
            debug!("Using `docker-compose`");
            return Some(ComposeTool::V1);
        }
        None
    }

    fn invocation(self) -> Invocation {
        match self {
            ComposeTool::V2 => Invocation::new("docker").arg("compose"),
            ComposeTool::V1 => Invocation::new("docker-compose"),
        }
    }
}

/// Compose commands run in the service working directory.
pub struct Runtime<'a, R> {
    runner: &'a R,
    tool: ComposeTool,
    workdir: PathBuf,
    pull_attempts: u32,
    retry_delay: Duration,
}

impl<'a, R: CommandRunner> Runtime<'a, R> {
    pub fn new(runner: &'a R, tool: ComposeTool, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            tool,
            workdir: workdir.into(),
            pull_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_pull_attempts(mut self, attempts: u32) -> Self {
        self.pull_attempts = attempts.max(1);
        self
    }

    /// Base delay between retries; attempt `n` waits `n` times this long.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn compose<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool.invocation().args(args).current_dir(&self.workdir)
    }

    /// Pulls the image, retrying with a linear backoff.
    pub async fn pull(&self) -> Result<()> {
        let invocation = self.compose(["pull"]);
        for attempt in 1..=self.pull_attempts {
            info!("Pulling image (attempt {}/{})", attempt, self.pull_attempts);
            let output = exec::unchecked(self.runner, &invocation).await?;
            if output.success() {
                return Ok(());
            }
            exec::log_output(&invocation, &output);
            if attempt < self.pull_attempts {
                let delay = self.retry_delay * attempt;
                warn!("Image pull failed, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }
        Err(Error::Transient {
            what: "image pull".to_string(),
            attempts: self.pull_attempts,
        })
    }

    /// Stops and removes the container. Nothing running is fine.
    pub async fn down(&self) -> bool {
        exec::best_effort(self.runner, &self.compose(["down"])).await
    }

    /// Like [`Runtime::down`], also removing volumes.
    pub async fn down_volumes(&self) -> bool {
        exec::best_effort(self.runner, &self.compose(["down", "--volumes"])).await
    }

    /// Like [`Runtime::down`], failing when compose does.
    pub async fn stop(&self) -> Result<()> {
        exec::checked(self.runner, &self.compose(["down"])).await?;
        Ok(())
    }

    pub async fn up(&self) -> Result<()> {
        exec::checked(self.runner, &self.compose(["up", "-d"])).await?;
        Ok(())
    }

    /// Follows the container logs until interrupted.
    pub async fn logs(&self) -> Result<()> {
        exec::streamed(self.runner, &self.compose(["logs", "-f"])).await
    }

    /// `docker ps` status line of `container`, `None` if it does not exist.
    pub async fn container_status(&self, container: &str) -> Result<Option<String>> {
        let filter = format!("name=^{}$", container);
        let invocation = Invocation::new("docker").args([
            "ps",
            "-a",
            "--filter",
            filter.as_str(),
            "--format",
            "{{.Status}}",
        ]);
        let output = exec::checked(self.runner, &invocation).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }

    /// Waits for `container` to report `Up`.
    pub async fn verify_running(&self, container: &str) -> Result<()> {
        let mut last = String::new();
        for attempt in 1..=VERIFY_ATTEMPTS {
            match self.container_status(container).await? {
                Some(status) if status.starts_with("Up") => {
                    info!("Container {} is running ({})", container, status);
                    return Ok(());
                }
                status => {
                    last = status.unwrap_or_else(|| "not found".to_string());
                    debug!(
                        "Container {} status: {} (check {}/{})",
                        container, last, attempt, VERIFY_ATTEMPTS
                    );
                }
            }
            if attempt < VERIFY_ATTEMPTS {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(Error::ServiceNotRunning {
            container: container.to_string(),
            status: last,
        })
    }

    /// Pull, replace the running container and check it came up.
    pub async fn start_fresh(&self, container: &str) -> Result<()> {
        self.pull().await?;
        self.down().await;
        self.up().await?;
        self.verify_running(container).await
    }
}
