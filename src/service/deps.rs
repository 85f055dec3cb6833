//! Host dependencies: docker, a compose tool and certbot
//!
//! Missing tools are installed once. A process that installed something asks
//! to be relaunched, and the relaunched copy enters at [`DependencyPhase::Ready`]
//! where it only verifies.

use tracing::{debug, info, warn};

use crate::error::{Precondition, Result};
use crate::exec::{self, CommandRunner, Invocation};

use super::runtime::ComposeTool;

/// Set on the relaunched process.
pub const PHASE_ENV: &str = "HEYHY_DEPENDENCY_PHASE";

const SYSCTL_CONF: &str = "/etc/sysctl.conf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyPhase {
    /// Nothing checked yet
    Missing,
    Installing,
    /// Relaunched after installing; verify only
    Ready,
    Proceeding,
}

impl DependencyPhase {
    /// `Ready` when [`PHASE_ENV`] says so, `Missing` otherwise.
    pub fn from_env() -> Self {
        match std::env::var(PHASE_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("ready") => DependencyPhase::Ready,
            _ => DependencyPhase::Missing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyOutcome {
    Proceed(ComposeTool),
    /// Something was installed; relaunch before continuing
    RestartRequired,
}

/// Checks dependencies for `phase`, installing what is missing outside `Ready`.
pub async fn ensure<R: CommandRunner>(
    runner: &R,
    phase: DependencyPhase,
) -> Result<DependencyOutcome> {
    let compose = ComposeTool::detect(runner).await;
    let have_docker = runner.exists("docker");
    let have_certbot = runner.exists("certbot");

    if let (true, Some(tool), true) = (have_docker, compose, have_certbot) {
        debug!("Dependencies present ({:?})", phase);
        return Ok(DependencyOutcome::Proceed(tool));
    }

    if phase == DependencyPhase::Ready {
        let tool = if !have_docker {
            "docker"
        } else if compose.is_none() {
            "docker compose"
        } else {
            "certbot"
        };
        return Err(Precondition::DependencyUnavailable { tool: tool.into() }.into());
    }

    info!("Dependency phase: {:?} -> {:?}", phase, DependencyPhase::Installing);
    if !have_docker || compose.is_none() {
        install_docker(runner).await?;
    }
    if !have_certbot {
        install_certbot(runner).await?;
    }
    info!("Dependencies installed, relaunching");
    Ok(DependencyOutcome::RestartRequired)
}

async fn install_docker<R: CommandRunner>(runner: &R) -> Result<()> {
    info!("Installing docker");
    let script = Invocation::shell("curl -fsSL https://get.docker.com | sh");
    if !exec::best_effort(runner, &script).await {
        return Err(Precondition::DependencyUnavailable {
            tool: "docker".into(),
        }
        .into());
    }
    Ok(())
}

async fn install_certbot<R: CommandRunner>(runner: &R) -> Result<()> {
    info!("Installing certbot");
    if !runner.exists("snap") {
        exec::best_effort(runner, &Invocation::new("apt-get").args(["update", "-y"])).await;
        exec::best_effort(
            runner,
            &Invocation::new("apt-get").args(["install", "-y", "snapd"]),
        )
        .await;
    }
    let steps = [
        Invocation::new("snap").args(["install", "core"]),
        Invocation::new("snap").args(["refresh", "core"]),
        Invocation::new("snap").args(["install", "--classic", "certbot"]),
    ];
    for step in &steps {
        if !exec::best_effort(runner, step).await {
            return Err(Precondition::DependencyUnavailable {
                tool: "certbot".into(),
            }
            .into());
        }
    }
    // Already linked on hosts that had certbot before.
    exec::best_effort(
        runner,
        &Invocation::new("ln").args(["-sf", "/snap/bin/certbot", "/usr/bin/certbot"]),
    )
    .await;
    Ok(())
}

/// Switches the host to fq + BBR if it is not already. Never fatal.
pub async fn enable_bbr<R: CommandRunner>(runner: &R) {
    let wanted = [("net.core.default_qdisc", "fq"), ("net.ipv4.tcp_congestion_control", "bbr")];

    let mut changed = false;
    for (key, value) in wanted {
        let current = exec::unchecked(runner, &Invocation::new("sysctl").args(["-n", key]))
            .await
            .ok()
            .filter(|output| output.success())
            .map(|output| output.stdout.trim().to_string());
        if current.as_deref() == Some(value) {
            debug!("{} is already {}", key, value);
            continue;
        }
        let line = format!("{}={}", key, value);
        let script = format!(
            "grep -qxF '{line}' {conf} || echo '{line}' | tee -a {conf} > /dev/null",
            line = line,
            conf = SYSCTL_CONF
        );
        changed |= exec::best_effort(runner, &Invocation::shell(script)).await;
    }

    if changed {
        if exec::best_effort(runner, &Invocation::new("sysctl").arg("-p")).await {
            info!("Enabled BBR congestion control");
        } else {
            warn!("Failed to apply {}, BBR stays disabled until reboot", SYSCTL_CONF);
        }
    }
}
