//! Scripted collaborators for driving the orchestrator without a host.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use heyhy::config::{DomainCheck, Settings};
use heyhy::exec::{CommandOutput, CommandRunner, Invocation};
use heyhy::host::Operator;
use heyhy::port::PortProbe;
use heyhy::service::{InstallRequest, Orchestrator};

pub const DOMAIN: &str = "example.com";
pub const QUOTA_STDERR: &str = "An unexpected error occurred:\n\
    too many certificates (5) already issued for this exact set of domains in the \
    last 168 hours: example.com, retry after 2026-10-20T00:00:00Z";

// ============================================================================
// Runner
// ============================================================================

/// Records every invocation and answers from overrides, then defaults.
///
/// Defaults: every command succeeds, `docker ps` reports the container up and
/// `certbot certonly` writes the certificate files it would issue.
pub struct FakeRunner {
    letsencrypt_dir: PathBuf,
    tools: HashSet<String>,
    overrides: Vec<(String, CommandOutput)>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new(letsencrypt_dir: &Path) -> Self {
        Self {
            letsencrypt_dir: letsencrypt_dir.to_path_buf(),
            tools: ["docker", "certbot", "snap", "sh", "systemctl"]
                .into_iter()
                .map(String::from)
                .collect(),
            overrides: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers commands whose command line starts with `prefix`.
    pub fn on(mut self, prefix: &str, output: CommandOutput) -> Self {
        self.overrides.push((prefix.to_string(), output));
        self
    }

    pub fn without_tool(mut self, tool: &str) -> Self {
        self.tools.remove(tool);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn issue(&self, invocation: &Invocation) -> CommandOutput {
        let Some(domain) = invocation.args.last() else {
            return CommandOutput::failed(2, "no domain");
        };
        let live = self.letsencrypt_dir.join("live").join(domain);
        std::fs::create_dir_all(&live).unwrap();
        std::fs::write(live.join("fullchain.pem"), "chain").unwrap();
        std::fs::write(live.join("privkey.pem"), "key").unwrap();
        CommandOutput::ok("Successfully received certificate.")
    }
}

impl CommandRunner for FakeRunner {
    async fn output(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let line = invocation.command_line();

        if let Some((_, output)) = self.overrides.iter().find(|(p, _)| line.starts_with(p)) {
            return Ok(output.clone());
        }
        if line.starts_with("certbot certonly") {
            return Ok(self.issue(invocation));
        }
        if line.starts_with("docker ps") {
            return Ok(CommandOutput::ok("Up 3 seconds\n"));
        }
        Ok(CommandOutput::ok(""))
    }

    async fn stream(&self, invocation: &Invocation) -> io::Result<Option<i32>> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok(Some(0))
    }

    fn exists(&self, program: &str) -> bool {
        self.tools.contains(program)
    }
}

// ============================================================================
// Probe & Operator
// ============================================================================

/// Every port is free except the listed ones.
#[derive(Default)]
pub struct FakeProbe {
    pub udp_taken: HashSet<u16>,
    pub tcp_taken: HashSet<u16>,
}

impl FakeProbe {
    pub fn taken(ports: &[u16]) -> Self {
        Self {
            udp_taken: ports.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn tcp_taken(ports: &[u16]) -> Self {
        Self {
            tcp_taken: ports.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl PortProbe for FakeProbe {
    fn udp_free(&self, port: u16) -> bool {
        !self.udp_taken.contains(&port)
    }

    fn tcp_free(&self, port: u16) -> bool {
        !self.tcp_taken.contains(&port)
    }
}

/// Answers confirmations from a queue; an empty queue declines.
#[derive(Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Operator for ScriptedOperator {
    fn confirm(&self, prompt: &str) -> heyhy::error::Result<bool> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or(false))
    }

    fn ask_domain(&self) -> heyhy::error::Result<String> {
        Ok(DOMAIN.to_string())
    }
}

// ============================================================================
// Host
// ============================================================================

/// Temporary host layout: working directory and certbot directory.
pub struct TestHost {
    pub dir: tempfile::TempDir,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn workdir(&self) -> PathBuf {
        self.dir.path().join("hysteria2")
    }

    pub fn letsencrypt_dir(&self) -> PathBuf {
        self.dir.path().join("letsencrypt")
    }

    pub fn settings(&self) -> Settings {
        Settings {
            workdir: self.workdir(),
            letsencrypt_dir: self.letsencrypt_dir(),
            domain_check: DomainCheck::Off,
            ..Settings::default()
        }
    }

    pub fn runner(&self) -> FakeRunner {
        FakeRunner::new(&self.letsencrypt_dir())
    }

    pub fn orchestrator(
        &self,
        runner: FakeRunner,
        probe: FakeProbe,
        operator: ScriptedOperator,
    ) -> Orchestrator<FakeRunner, FakeProbe, ScriptedOperator> {
        Orchestrator::new(runner, probe, operator, self.settings())
            .with_retry_delay(Duration::ZERO)
    }

    /// Default runner, every port free, prompts declined.
    pub fn default_orchestrator(&self) -> Orchestrator<FakeRunner, FakeProbe, ScriptedOperator> {
        self.with_runner(self.runner())
    }

    pub fn with_runner(
        &self,
        runner: FakeRunner,
    ) -> Orchestrator<FakeRunner, FakeProbe, ScriptedOperator> {
        self.orchestrator(runner, FakeProbe::default(), ScriptedOperator::default())
    }

    pub fn with_probe(
        &self,
        probe: FakeProbe,
    ) -> Orchestrator<FakeRunner, FakeProbe, ScriptedOperator> {
        self.orchestrator(self.runner(), probe, ScriptedOperator::default())
    }
}

/// Install request that needs no network.
pub fn request(domain: &str) -> InstallRequest {
    InstallRequest {
        ip: Some("1.2.3.4".parse().unwrap()),
        domain_check: Some(DomainCheck::Off),
        ..InstallRequest::new(domain)
    }
}
