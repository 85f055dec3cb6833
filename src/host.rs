//! Host probes and operator interaction
//!
//! This module provides functionality for:
//! - Preflight checks (Linux, root)
//! - Public IP discovery through plain-text echo services
//! - Checking that a domain resolves to this host
//! - Asking the operator for confirmation or a domain

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::DomainCheck;
use crate::error::{Error, Precondition, Result};
use crate::exec::{self, CommandRunner, Invocation};
use crate::get_version;

// ============================================================================
// Preflight
// ============================================================================

/// Fails unless running on Linux as root.
pub async fn preflight<R: CommandRunner>(runner: &R) -> Result<()> {
    if std::env::consts::OS != "linux" {
        return Err(Precondition::NotLinux.into());
    }
    let output = exec::checked(runner, &Invocation::new("id").arg("-u")).await?;
    if output.stdout.trim() != "0" {
        return Err(Precondition::NotRoot.into());
    }
    debug!("Preflight passed");
    Ok(())
}

// ============================================================================
// Public IP
// ============================================================================

/// Asks each echo service in turn for this host's public address.
pub async fn public_ip(services: &[String]) -> Result<IpAddr> {
    let client = reqwest::Client::builder()
        .user_agent(format!("heyhy/{}", get_version()))
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| Error::Io(io::Error::other(e)))?;

    for url in services {
        debug!("Fetching public IP from {}", url);
        let response = match client.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("{} answered {}", url, response.status());
                continue;
            }
            Err(e) => {
                debug!("Failed to reach {}: {}", url, e);
                continue;
            }
        };
        match response.text().await.map(|body| parse_ip(&body)) {
            Ok(Some(ip)) => {
                info!("Public IP: {}", ip);
                return Ok(ip);
            }
            Ok(None) => debug!("{} did not return an IP address", url),
            Err(e) => debug!("Failed to read response from {}: {}", url, e),
        }
    }

    Err(Precondition::PublicIpUnknown.into())
}

fn parse_ip(body: &str) -> Option<IpAddr> {
    body.trim().parse().ok()
}

// ============================================================================
// Domain Check
// ============================================================================

/// Every address `domain` resolves to, both families, deduplicated.
pub async fn resolve(domain: &str) -> io::Result<Vec<IpAddr>> {
    let mut addrs: Vec<IpAddr> = tokio::net::lookup_host((domain, 0))
        .await?
        .map(|addr| addr.ip())
        .collect();
    addrs.sort();
    addrs.dedup();
    Ok(addrs)
}

/// Applies `policy` to the result of resolving `domain`.
pub fn evaluate_domain(
    policy: DomainCheck,
    domain: &str,
    public_ip: IpAddr,
    resolved: &[IpAddr],
) -> Result<()> {
    if policy == DomainCheck::Off || resolved.contains(&public_ip) {
        return Ok(());
    }
    let mismatch = Precondition::DomainNotPointingHere {
        domain: domain.to_string(),
        public_ip: public_ip.to_string(),
        resolved: resolved.iter().map(IpAddr::to_string).collect(),
    };
    match policy {
        DomainCheck::Strict => Err(mismatch.into()),
        _ => {
            warn!("{}; continuing because the domain check policy is `warn`", mismatch);
            Ok(())
        }
    }
}

/// Resolves `domain` and checks it against `public_ip` under `policy`.
pub async fn check_domain(policy: DomainCheck, domain: &str, public_ip: IpAddr) -> Result<()> {
    if policy == DomainCheck::Off {
        debug!("Domain check disabled");
        return Ok(());
    }
    let resolved = resolve(domain).await.unwrap_or_else(|e| {
        debug!("Failed to resolve {}: {}", domain, e);
        Vec::new()
    });
    debug!("{} resolves to {:?}", domain, resolved);
    evaluate_domain(policy, domain, public_ip, &resolved)
}

// ============================================================================
// Operator Prompts
// ============================================================================

/// Questions a lifecycle operation may put to the operator.
pub trait Operator: Send + Sync {
    fn confirm(&self, prompt: &str) -> Result<bool>;

    fn ask_domain(&self) -> Result<String>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalOperator;

impl Operator for TerminalOperator {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        use dialoguer::{Confirm, theme::ColorfulTheme};

        println!();
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| Error::Io(io::Error::other(e)))
    }

    fn ask_domain(&self) -> Result<String> {
        use dialoguer::{Input, theme::ColorfulTheme};

        let domain: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("Domain bound to this host")
            .validate_with(|input: &String| -> std::result::Result<(), &str> {
                if is_plausible_domain(input) {
                    Ok(())
                } else {
                    Err("enter a fully qualified domain name, e.g. hy2.example.com")
                }
            })
            .interact_text()
            .map_err(|e| Error::Io(io::Error::other(e)))?;
        Ok(domain.trim().to_string())
    }
}

/// Cheap shape check: dotted labels of letters, digits and hyphens.
pub fn is_plausible_domain(domain: &str) -> bool {
    let domain = domain.trim().trim_end_matches('.');
    domain.contains('.')
        && domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
