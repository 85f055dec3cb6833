//! Lifecycle orchestration of the managed Hysteria2 service
//!
//! This module provides functionality for:
//! - Installing the service, from dependency checks to the first start
//! - Updating password, port and image in place
//! - start / stop / restart / log passthrough to docker compose
//! - Removing the service and its certificate
//! - Reporting status and rebuilding the client descriptor
//!
//! Every operation after `install` is driven by the persisted
//! [`ServiceRecord`].

pub mod compose;
pub mod deps;
pub mod record;
pub mod runtime;
pub mod state;

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info, warn};

use crate::cert::{CertBot, CertificateRecord};
use crate::config::{DomainCheck, Settings};
use crate::descriptor::Descriptor;
use crate::error::{Error, Precondition, Result};
use crate::exec::CommandRunner;
use crate::export;
use crate::host::{self, Operator};
use crate::port::{PortAllocator, PortProbe};

pub use deps::{DependencyOutcome, DependencyPhase};
pub use record::ServiceRecord;
pub use runtime::{ComposeTool, Runtime};
pub use state::ServiceState;

/// Length of generated passwords.
const PASSWORD_LEN: usize = 16;

// ============================================================================
// Workspace
// ============================================================================

/// Files of the service working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(compose::CONFIG_FILE)
    }

    pub fn compose_path(&self) -> PathBuf {
        self.root.join(compose::COMPOSE_FILE)
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(record::RECORD_FILE)
    }

    pub fn clients_dir(&self) -> PathBuf {
        self.root.join(export::CLIENTS_DIR)
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    async fn read(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::file(path, e))
    }
}

// ============================================================================
// Requests & Outcomes
// ============================================================================

/// Parameters of `install`. Unset fields fall back to the previous record,
/// then to settings.
#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub domain: String,
    pub password: Option<String>,
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub image: Option<String>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    /// Skip confirmation prompts
    pub assume_yes: bool,
    pub domain_check: Option<DomainCheck>,
}

impl InstallRequest {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed {
        record: ServiceRecord,
        descriptor: Descriptor,
    },
    /// Dependencies were installed; the process must be relaunched
    RestartRequired,
    /// The operator declined to overwrite an existing install
    Cancelled,
}

/// Parameters of `update`
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub password: Option<String>,
    pub port: Option<u16>,
    pub image: Option<String>,
    /// Only ever rejected
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub domain: Option<String>,
    pub state: ServiceState,
    pub container_status: Option<String>,
    pub config_present: bool,
    /// Rebuilt from `config.yaml` when it is readable
    pub descriptor: Option<Descriptor>,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator<R, P, O> {
    runner: R,
    probe: P,
    operator: O,
    settings: Settings,
    workspace: Workspace,
    phase: DependencyPhase,
    retry_delay: Duration,
}

impl<R: CommandRunner, P: PortProbe, O: Operator> Orchestrator<R, P, O> {
    pub fn new(runner: R, probe: P, operator: O, settings: Settings) -> Self {
        let workspace = Workspace::new(&settings.workdir);
        Self {
            runner,
            probe,
            operator,
            settings,
            workspace,
            phase: DependencyPhase::Missing,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn with_dependency_phase(mut self, phase: DependencyPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Delay between pull retries and container status checks.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn runtime(&self, tool: ComposeTool) -> Runtime<'_, R> {
        Runtime::new(&self.runner, tool, self.workspace.root())
            .with_pull_attempts(self.settings.pull_attempts)
            .with_retry_delay(self.retry_delay)
    }

    async fn compose_tool(&self) -> Result<ComposeTool> {
        ComposeTool::detect(&self.runner)
            .await
            .ok_or_else(|| Error::ToolMissing {
                tool: "docker compose".to_string(),
            })
    }

    async fn require_record(&self) -> Result<ServiceRecord> {
        ServiceRecord::load(self.workspace.root())
            .await?
            .ok_or_else(|| Precondition::NotInstalled.into())
    }

    fn cert_bot(&self) -> CertBot<'_, R, P> {
        CertBot::new(&self.runner, &self.probe, &self.settings.letsencrypt_dir)
    }

    // ------------------------------------------------------------------------
    // install
    // ------------------------------------------------------------------------

    pub async fn install(&self, request: InstallRequest) -> Result<InstallOutcome> {
        let domain = request.domain.trim().to_string();
        let supplied_cert = match (&request.cert, &request.key) {
            (Some(cert), Some(key)) => Some(CertificateRecord::from_paths(&domain, cert, key)?),
            (None, None) => None,
            _ => return Err(Precondition::IncompleteCertificatePair.into()),
        };

        let tool = match deps::ensure(&self.runner, self.phase).await? {
            DependencyOutcome::Proceed(tool) => tool,
            DependencyOutcome::RestartRequired => return Ok(InstallOutcome::RestartRequired),
        };
        debug!("Dependency phase: {:?}", DependencyPhase::Proceeding);
        deps::enable_bbr(&self.runner).await;

        let existing = ServiceRecord::load(self.workspace.root()).await?;
        if let Some(record) = &existing
            && record.domain != domain
        {
            return Err(Precondition::DomainMismatch {
                installed: record.domain.clone(),
                requested: domain,
            }
            .into());
        }
        let current = state::derive(self.workspace.exists(), existing.as_ref(), None);
        if current != ServiceState::Absent && !request.assume_yes {
            let prompt = match &existing {
                Some(_) => format!("{} is already installed. Reinstall it?", domain),
                None => format!(
                    "{} exists from an unfinished install. Overwrite it?",
                    self.workspace.root().display()
                ),
            };
            if !self.operator.confirm(&prompt)? {
                info!("Install cancelled");
                return Ok(InstallOutcome::Cancelled);
            }
        }
        state::transition(current, ServiceState::Installing);

        let public_ip = match request.ip {
            Some(ip) => ip,
            None => host::public_ip(&self.settings.ip_services).await?,
        };
        let policy = request.domain_check.unwrap_or(self.settings.domain_check);
        host::check_domain(policy, &domain, public_ip).await?;

        let port = PortAllocator::new(
            &self.probe,
            self.settings.default_port,
            self.settings.port_range(),
        )
        .allocate(request.port.or(existing.as_ref().map(|r| r.port)))?;
        let password = request
            .password
            .or_else(|| existing.as_ref().map(|r| r.password.clone()))
            .unwrap_or_else(random_password);
        let image = request
            .image
            .or_else(|| existing.as_ref().map(|r| r.image.clone()))
            .unwrap_or_else(|| self.settings.image.clone());
        validate_endpoint(&public_ip.to_string(), port, &password, &domain)?;

        let certificate = match supplied_cert {
            Some(certificate) => {
                info!("Using supplied certificate {}", certificate.fullchain.display());
                certificate
            }
            None => self.cert_bot().issue(&domain).await?,
        };

        let record = ServiceRecord {
            domain,
            port,
            password,
            image,
            workdir: self.workspace.root().to_path_buf(),
            public_ip: Some(public_ip.to_string()),
            certificate,
        };
        self.write_service_files(&record).await?;

        self.runtime(tool)
            .start_fresh(&record.container_name())
            .await?;
        record.save(self.workspace.root()).await?;

        let descriptor = self.export(&record).await?;
        state::transition(ServiceState::Installing, ServiceState::Active);
        info!("Installed {} on UDP port {}", record.domain, record.port);
        Ok(InstallOutcome::Installed { record, descriptor })
    }

    async fn write_service_files(&self, record: &ServiceRecord) -> Result<()> {
        let root = self.workspace.root();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| Error::file(root, e))?;

        let listener = compose::Listener::new(
            record.port,
            &record.password,
            &self.settings.masquerade,
            &record.certificate,
        );
        record::write_atomic(
            &self.workspace.config_path(),
            compose::render_config(listener)?.as_bytes(),
        )
        .await?;

        let mount =
            compose::certificate_mount(&record.certificate, &self.settings.letsencrypt_dir);
        let service =
            compose::ComposeService::new(&record.domain, &record.image, record.port, &mount);
        record::write_atomic(
            &self.workspace.compose_path(),
            compose::render_compose(service)?.as_bytes(),
        )
        .await?;
        debug!("Wrote service files to {}", root.display());
        Ok(())
    }

    async fn export(&self, record: &ServiceRecord) -> Result<Descriptor> {
        let descriptor = record.descriptor(Some(self.settings.masquerade.as_str()))?;
        export::write_all(&descriptor, &self.workspace.clients_dir()).await?;
        Ok(descriptor)
    }

    // ------------------------------------------------------------------------
    // update
    // ------------------------------------------------------------------------

    /// Patches password, port and image in place, then restarts with a fresh
    /// image pull.
    pub async fn update(&self, request: UpdateRequest) -> Result<(ServiceRecord, Descriptor)> {
        if request.domain.is_some() {
            return Err(Precondition::DomainImmutable.into());
        }
        let mut record = self.require_record().await?;
        let tool = self.compose_tool().await?;

        if let Some(port) = request.port {
            info!("Port: {} -> {}", record.port, port);
            record.port = port;
        }
        if let Some(password) = &request.password {
            info!("Password updated");
            record.password.clone_from(password);
        }
        if let Some(image) = &request.image {
            info!("Image: {} -> {}", record.image, image);
            record.image.clone_from(image);
        }
        record.descriptor(None)?;

        let config_path = self.workspace.config_path();
        let config = self.workspace.read(&config_path).await?;
        let patched = compose::patch_config(
            &config_path,
            &config,
            request.port,
            request.password.as_deref(),
        )?;
        if patched != config {
            record::write_atomic(&config_path, patched.as_bytes()).await?;
        }

        let compose_path = self.workspace.compose_path();
        let compose_text = self.workspace.read(&compose_path).await?;
        let patched = compose::patch_compose(
            &compose_path,
            &compose_text,
            request.port,
            request.image.as_deref(),
        )?;
        if patched != compose_text {
            record::write_atomic(&compose_path, patched.as_bytes()).await?;
        }
        record.save(self.workspace.root()).await?;

        self.runtime(tool)
            .start_fresh(&record.container_name())
            .await?;
        let descriptor = self.export(&record).await?;
        Ok((record, descriptor))
    }

    // ------------------------------------------------------------------------
    // start / stop / restart / log
    // ------------------------------------------------------------------------

    pub async fn start(&self) -> Result<()> {
        let record = self.require_record().await?;
        let runtime = self.runtime(self.compose_tool().await?);
        runtime.up().await?;
        runtime.verify_running(&record.container_name()).await?;
        state::transition(ServiceState::Stopped, ServiceState::Active);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.require_record().await?;
        self.runtime(self.compose_tool().await?).stop().await?;
        state::transition(ServiceState::Active, ServiceState::Stopped);
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        let record = self.require_record().await?;
        let runtime = self.runtime(self.compose_tool().await?);
        runtime.down().await;
        runtime.up().await?;
        runtime.verify_running(&record.container_name()).await?;
        info!("Restarted {}", record.container_name());
        Ok(())
    }

    /// Follows container logs until interrupted.
    pub async fn log(&self) -> Result<()> {
        self.require_record().await?;
        self.runtime(self.compose_tool().await?).logs().await
    }

    // ------------------------------------------------------------------------
    // remove
    // ------------------------------------------------------------------------

    pub async fn remove(&self) -> Result<()> {
        let root = self.workspace.root();
        if !self.workspace.exists() {
            warn!("{} does not exist, nothing to remove", root.display());
            return Ok(());
        }

        let record = ServiceRecord::load(root).await.unwrap_or_else(|e| {
            warn!("Ignoring unreadable service record: {}", e);
            None
        });
        let domain = match &record {
            Some(record) => Some(record.domain.clone()),
            None => self.domain_from_compose().await,
        };
        let current = state::derive(true, record.as_ref(), None);

        match ComposeTool::detect(&self.runner).await {
            Some(tool) => {
                self.runtime(tool).down_volumes().await;
            }
            None => warn!("docker compose not found, skipping container teardown"),
        }

        tokio::fs::remove_dir_all(root)
            .await
            .map_err(|e| Error::file(root, e))?;
        info!("Removed {}", root.display());

        let issued_by_certbot = record.as_ref().is_none_or(|r| {
            r.certificate
                .fullchain
                .starts_with(&self.settings.letsencrypt_dir)
        });
        match domain {
            Some(domain) if issued_by_certbot => self.cert_bot().remove(&domain).await?,
            Some(domain) => debug!("Keeping operator-supplied certificate of {}", domain),
            None => warn!("Domain unknown, certificate left in place"),
        }

        state::transition(current, ServiceState::Removed);
        Ok(())
    }

    async fn domain_from_compose(&self) -> Option<String> {
        let text = tokio::fs::read_to_string(self.workspace.compose_path())
            .await
            .ok()?;
        compose::domain_from_compose(&text)
    }

    // ------------------------------------------------------------------------
    // status
    // ------------------------------------------------------------------------

    /// Read-only view of the service.
    pub async fn status(&self) -> Result<StatusReport> {
        let record = ServiceRecord::load(self.workspace.root()).await?;
        let domain = match &record {
            Some(record) => Some(record.domain.clone()),
            None => self.domain_from_compose().await,
        };

        let container_status = match (&domain, ComposeTool::detect(&self.runner).await) {
            (Some(domain), Some(tool)) => {
                self.runtime(tool)
                    .container_status(&compose::container_name(domain))
                    .await?
            }
            _ => None,
        };

        let config_path = self.workspace.config_path();
        let config_present = config_path.is_file();
        let descriptor = match (&domain, config_present) {
            (Some(domain), true) => self.descriptor_from_config(domain, record.as_ref()).await,
            _ => None,
        };

        Ok(StatusReport {
            state: state::derive(
                self.workspace.exists(),
                record.as_ref(),
                container_status.as_deref(),
            ),
            domain,
            container_status,
            config_present,
            descriptor,
        })
    }

    /// Descriptor rebuilt from what the listener actually serves.
    async fn descriptor_from_config(
        &self,
        domain: &str,
        record: Option<&ServiceRecord>,
    ) -> Option<Descriptor> {
        let path = self.workspace.config_path();
        let listener = match self.workspace.read(&path).await {
            Ok(text) => compose::parse_listener(&path, &text),
            Err(e) => Err(e),
        };
        let listener = match listener {
            Ok(listener) => listener,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };
        let password = listener.password()?;
        let host = record
            .and_then(|r| r.public_ip.as_deref())
            .unwrap_or(domain);
        Descriptor::builder(host, listener.port, password, domain)
            .masquerade(Some(listener.masquerade.as_str()))
            .build()
            .ok()
    }
}

/// Rejects endpoint parameters no client could connect with, before anything
/// touches the host.
fn validate_endpoint(host: &str, port: u16, password: &str, domain: &str) -> Result<()> {
    Descriptor::builder(host, port, password, domain)
        .build()
        .map(drop)
        .map_err(|e| Error::Decode(e.into()))
}

fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}
