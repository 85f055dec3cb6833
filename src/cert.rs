//! Certificate issuance through certbot
//!
//! Certificates are issued with the standalone authenticator, which needs TCP
//! port 80. Whatever holds the port is stopped for the duration of the run and
//! nginx is restarted afterwards if it was stopped.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Precondition, Result};
use crate::exec::{self, CommandRunner, Invocation};
use crate::port::PortProbe;

/// certbot prints this when the weekly duplicate-certificate limit is hit.
const QUOTA_MARKER: &str = "168 hours";

/// Paths of an issued certificate. Key material is never read.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub domain: String,
    pub fullchain: PathBuf,
    pub privkey: PathBuf,
}

impl CertificateRecord {
    /// Where certbot places the certificate of `domain`.
    pub fn for_domain(letsencrypt_dir: &Path, domain: &str) -> Self {
        let live = letsencrypt_dir.join("live").join(domain);
        Self {
            domain: domain.to_string(),
            fullchain: live.join("fullchain.pem"),
            privkey: live.join("privkey.pem"),
        }
    }

    /// Operator-supplied certificate files. Both must be absolute paths to
    /// existing files.
    pub fn from_paths(domain: &str, fullchain: &Path, privkey: &Path) -> Result<Self> {
        for path in [fullchain, privkey] {
            if !path.is_absolute() {
                return Err(Precondition::InvalidCertificatePath {
                    path: path.to_path_buf(),
                    reason: "path must be absolute",
                }
                .into());
            }
            if !path.is_file() {
                return Err(Precondition::InvalidCertificatePath {
                    path: path.to_path_buf(),
                    reason: "file does not exist",
                }
                .into());
            }
        }
        Ok(Self {
            domain: domain.to_string(),
            fullchain: fullchain.to_path_buf(),
            privkey: privkey.to_path_buf(),
        })
    }

    pub fn exists(&self) -> bool {
        self.fullchain.is_file()
    }

    /// Directory to bind-mount into the container so both files resolve.
    pub fn mount_root(&self) -> PathBuf {
        common_ancestor(&self.fullchain, &self.privkey)
    }
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    let mut ancestor = PathBuf::new();
    for (x, y) in a.components().zip(b.components()) {
        if x != y {
            break;
        }
        ancestor.push(x);
    }
    if ancestor.as_os_str().is_empty() {
        PathBuf::from("/")
    } else {
        ancestor
    }
}

// ============================================================================
// certbot
// ============================================================================

/// Issues and removes certificates with certbot.
pub struct CertBot<'a, R, P> {
    runner: &'a R,
    probe: &'a P,
    letsencrypt_dir: PathBuf,
}

impl<'a, R: CommandRunner, P: PortProbe> CertBot<'a, R, P> {
    pub fn new(runner: &'a R, probe: &'a P, letsencrypt_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            probe,
            letsencrypt_dir: letsencrypt_dir.into(),
        }
    }

    /// Returns the certificate of `domain`, issuing one only if none exists.
    /// certbot runs at most once per call.
    pub async fn issue(&self, domain: &str) -> Result<CertificateRecord> {
        let record = CertificateRecord::for_domain(&self.letsencrypt_dir, domain);
        if record.exists() {
            info!("Reusing existing certificate for {}", domain);
            return Ok(record);
        }

        self.prune_stale_lineages(domain).await;
        let revive_port_80 = self.free_port_80().await;

        info!("Requesting a certificate for {}", domain);
        let invocation = Invocation::new("certbot").args([
            "certonly",
            "--standalone",
            "--register-unsafely-without-email",
            "--agree-tos",
            "--keep",
            "--non-interactive",
            "-d",
            domain,
        ]);
        let result = exec::unchecked(self.runner, &invocation).await;

        if revive_port_80 {
            info!("Restarting nginx");
            let revive = Invocation::new("systemctl").args(["restart", "nginx"]);
            exec::best_effort(self.runner, &revive).await;
        }

        let output = result?;
        if !output.success() {
            exec::log_output(&invocation, &output);
            if output.stderr.contains(QUOTA_MARKER) || output.stdout.contains(QUOTA_MARKER) {
                return Err(Error::QuotaExceeded {
                    domain: domain.to_string(),
                });
            }
            return Err(Error::CertificateIssuance {
                domain: domain.to_string(),
            });
        }
        if !record.exists() {
            warn!(
                "certbot reported success but {} is missing",
                record.fullchain.display()
            );
            return Err(Error::CertificateIssuance {
                domain: domain.to_string(),
            });
        }

        self.enable_renewal().await;
        info!("Certificate issued for {}", domain);
        Ok(record)
    }

    /// Deletes the certificate lineage of `domain`. Missing files are fine.
    pub async fn remove(&self, domain: &str) -> Result<()> {
        info!("Removing certificate for {}", domain);
        exec::best_effort(
            self.runner,
            &Invocation::new("certbot").args([
                "delete",
                "--cert-name",
                domain,
                "--non-interactive",
            ]),
        )
        .await;

        let dirs = [
            self.letsencrypt_dir.join("live").join(domain),
            self.letsencrypt_dir.join("archive").join(domain),
        ];
        for dir in dirs {
            remove_if_exists(&dir, true).await?;
        }
        let renewal = self
            .letsencrypt_dir
            .join("renewal")
            .join(format!("{}.conf", domain));
        remove_if_exists(&renewal, false).await
    }

    /// Leftover `live/<domain>-NNNN` lineages make certbot number the next
    /// one instead of using `live/<domain>`.
    async fn prune_stale_lineages(&self, domain: &str) {
        let live = self.letsencrypt_dir.join("live");
        if live.join(domain).exists() {
            return;
        }
        let Ok(mut entries) = tokio::fs::read_dir(&live).await else {
            return;
        };
        let prefix = format!("{}-", domain);
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_stale = name.strip_prefix(&prefix).is_some_and(|suffix| {
                !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit())
            });
            if is_stale && entry.path().is_dir() {
                info!("Removing stale certificate lineage {}", name);
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!("Failed to remove {}: {}", entry.path().display(), e);
                }
            }
        }
    }

    /// Stops whatever holds TCP port 80. Returns whether nginx should be
    /// restarted afterwards.
    async fn free_port_80(&self) -> bool {
        if self.probe.tcp_free(80) {
            debug!("TCP port 80 is free");
            return false;
        }
        warn!("TCP port 80 is in use, stopping its holders for the certificate challenge");
        exec::best_effort(self.runner, &Invocation::new("systemctl").args(["stop", "nginx"])).await;
        exec::best_effort(self.runner, &Invocation::new("nginx").args(["-s", "stop"])).await;
        exec::best_effort(self.runner, &Invocation::shell("lsof -t -i:80 | xargs -r kill")).await;
        true
    }

    async fn enable_renewal(&self) {
        info!("Enabling certbot.timer for renewals");
        exec::best_effort(self.runner, &Invocation::new("systemctl").arg("daemon-reload")).await;
        exec::best_effort(
            self.runner,
            &Invocation::new("systemctl").args(["enable", "--now", "certbot.timer"]),
        )
        .await;
    }
}

async fn remove_if_exists(path: &Path, is_dir: bool) -> Result<()> {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::file(path, e)),
    }
}
