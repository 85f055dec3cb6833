//! Error taxonomy for lifecycle operations
//!
//! Every failure a lifecycle operation can surface maps onto one of the kinds
//! below. Codec failures have their own type ([`DecodeError`]) because they are
//! per-item and non-fatal inside batch conversions.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::{DecodeError, EncodeError};

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ============================================================================
// Fatal Preconditions
// ============================================================================

/// Conditions that abort an operation immediately, without retry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Precondition {
    #[error("heyhy can only run on Linux")]
    NotLinux,

    #[error("heyhy must run as root")]
    NotRoot,

    #[error("the service is not installed yet, run `heyhy install` first")]
    NotInstalled,

    #[error(
        "the service is bound to {installed}, refusing to install for {requested}; \
         run `heyhy remove` first"
    )]
    DomainMismatch { installed: String, requested: String },

    #[error(
        "`update` cannot change the bound domain; back up your configuration and \
         run `heyhy install` again"
    )]
    DomainImmutable,

    #[error("{domain} resolves to {resolved:?}, which does not include this host ({public_ip})")]
    DomainNotPointingHere {
        domain: String,
        public_ip: String,
        resolved: Vec<String>,
    },

    #[error("the public IP of this host could not be determined, pass it with --ip")]
    PublicIpUnknown,

    #[error("invalid certificate path {}: {reason}", .path.display())]
    InvalidCertificatePath { path: PathBuf, reason: &'static str },

    #[error("`--cert` and `--key` must be used together")]
    IncompleteCertificatePair,

    #[error("`{tool}` is still unavailable after installing it")]
    DependencyUnavailable { tool: String },
}

// ============================================================================
// Error
// ============================================================================

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Precondition(#[from] Precondition),

    #[error("required tool `{tool}` was not found in PATH")]
    ToolMissing { tool: String },

    #[error("{what} still failing after {attempts} attempts")]
    Transient { what: String, attempts: u32 },

    #[error(
        "certificate quota exhausted for {domain}: a domain may only be issued 5 \
         certificates per 168 hours; create a new DNS record for this host and install again"
    )]
    QuotaExceeded { domain: String },

    #[error(
        "certificate issuance for {domain} failed; check that {domain} resolves to this \
         host and that TCP port 80 is reachable"
    )]
    CertificateIssuance { domain: String },

    #[error("no bindable UDP port left in {start}..{end}")]
    PortExhausted { start: u16, end: u16 },

    #[error("`{command}` failed ({})", describe_status(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
    },

    #[error("container {container} is not running after start (status: {status:?})")]
    ServiceNotRunning { container: String, status: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{} has unexpected contents: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("{}: {source}", .path.display())]
    File { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Attach the offending path to an I/O error.
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }

    /// Whether the operator must act before anything is retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Precondition(_) | Error::QuotaExceeded { .. } | Error::PortExhausted { .. }
        )
    }
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}
