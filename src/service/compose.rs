//! Server-side files: the mihomo listener config and the compose file
//!
//! Both files are generated from typed structs on install. `update` never
//! regenerates them: it patches the parsed YAML tree so keys it does not own
//! come back out exactly as they went in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::cert::CertificateRecord;
use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "config.yaml";
pub const COMPOSE_FILE: &str = "docker-compose.yaml";
pub const SERVICE_NAME: &str = "hysteria2-inbound";

/// Working directory inside the container.
const CONTAINER_WORKDIR: &str = "/app/proxy-inbound/";

pub fn container_name(domain: &str) -> String {
    format!("{}-{}", SERVICE_NAME, domain)
}

// ============================================================================
// mihomo Listener Config
// ============================================================================

/// mihomo config holding only the inbound listener
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MihomoConfig {
    pub listeners: Vec<Listener>,
}

/// Hysteria2 inbound listener
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    pub port: u16,

    pub listen: String,

    /// user name -> password
    pub users: BTreeMap<String, String>,

    /// Site served to unauthenticated clients
    pub masquerade: String,

    pub certificate: String,

    #[serde(rename = "private-key")]
    pub private_key: String,
}

impl Listener {
    pub fn new(
        port: u16,
        password: &str,
        masquerade: &str,
        certificate: &CertificateRecord,
    ) -> Self {
        let mut users = BTreeMap::new();
        users.insert(format!("user_{}", random_id(8)), password.to_string());
        Self {
            name: format!("hysteria2-in-{}", random_id(12)),
            kind: "hysteria2".to_string(),
            port,
            listen: "0.0.0.0".to_string(),
            users,
            masquerade: masquerade.to_string(),
            certificate: certificate.fullchain.display().to_string(),
            private_key: certificate.privkey.display().to_string(),
        }
    }

    /// First user's password.
    pub fn password(&self) -> Option<&str> {
        self.users.values().next().map(String::as_str)
    }
}

fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

pub fn render_config(listener: Listener) -> Result<String> {
    Ok(serde_yaml::to_string(&MihomoConfig {
        listeners: vec![listener],
    })?)
}

/// Reads the listener back from `config.yaml` contents.
pub fn parse_listener(path: &Path, text: &str) -> Result<Listener> {
    let config: MihomoConfig = serde_yaml::from_str(text).map_err(|e| malformed(path, e))?;
    config
        .listeners
        .into_iter()
        .next()
        .ok_or_else(|| malformed(path, "no listener defined"))
}

// ============================================================================
// Compose File
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ComposeFile {
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    pub restart: String,
    pub network_mode: String,
    pub ports: Vec<String>,
    pub working_dir: String,
    pub volumes: Vec<String>,
    pub command: Vec<String>,
}

impl ComposeService {
    pub fn new(domain: &str, image: &str, port: u16, certificate_mount: &Path) -> Self {
        let mount = certificate_mount.display();
        Self {
            image: image.to_string(),
            container_name: container_name(domain),
            restart: "always".to_string(),
            network_mode: "host".to_string(),
            ports: vec![port_mapping(port)],
            working_dir: CONTAINER_WORKDIR.to_string(),
            volumes: vec![
                format!("{}:{}", mount, mount),
                format!("./{}:{}{}", CONFIG_FILE, CONTAINER_WORKDIR, CONFIG_FILE),
            ],
            command: ["-f", CONFIG_FILE, "-d", "/"].map(String::from).to_vec(),
        }
    }
}

fn port_mapping(port: u16) -> String {
    format!("{}:{}", port, port)
}

/// Host directory mounted into the container at the same path.
///
/// certbot's `live/` files are symlinks into `archive/`, so its whole config
/// directory is mounted. Operator-supplied files only need their common parent.
pub fn certificate_mount(certificate: &CertificateRecord, letsencrypt_dir: &Path) -> PathBuf {
    if certificate.fullchain.starts_with(letsencrypt_dir) {
        letsencrypt_dir.to_path_buf()
    } else {
        certificate.mount_root()
    }
}

pub fn render_compose(service: ComposeService) -> Result<String> {
    let mut services = BTreeMap::new();
    services.insert(SERVICE_NAME.to_string(), service);
    Ok(serde_yaml::to_string(&ComposeFile { services })?)
}

/// Domain encoded in the compose file's container name.
pub fn domain_from_compose(text: &str) -> Option<String> {
    let doc: Value = serde_yaml::from_str(text).ok()?;
    doc.get("services")?
        .get(SERVICE_NAME)?
        .get("container_name")?
        .as_str()?
        .strip_prefix(&format!("{}-", SERVICE_NAME))
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Targeted Patches
// ============================================================================

/// Rewrites the listener port and user password in `config.yaml` contents.
pub fn patch_config(
    path: &Path,
    text: &str,
    port: Option<u16>,
    password: Option<&str>,
) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(text).map_err(|e| malformed(path, e))?;
    let listener = doc
        .get_mut("listeners")
        .and_then(|l| l.get_mut(0))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| malformed(path, "no listener defined"))?;

    if let Some(port) = port {
        listener.insert("port".into(), Value::from(port));
    }
    if let Some(password) = password {
        let users = listener
            .get_mut("users")
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| malformed(path, "listener has no users"))?;
        if users.is_empty() {
            users.insert(
                Value::from(format!("user_{}", random_id(8))),
                Value::from(password),
            );
        }
        for value in users.values_mut() {
            *value = Value::from(password);
        }
    }

    Ok(serde_yaml::to_string(&doc)?)
}

/// Rewrites the port mapping and image in compose file contents.
pub fn patch_compose(
    path: &Path,
    text: &str,
    port: Option<u16>,
    image: Option<&str>,
) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(text).map_err(|e| malformed(path, e))?;
    let service: &mut Mapping = doc
        .get_mut("services")
        .and_then(|s| s.get_mut(SERVICE_NAME))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| malformed(path, format!("service `{}` not found", SERVICE_NAME)))?;

    if let Some(port) = port {
        service.insert(
            "ports".into(),
            Value::Sequence(vec![Value::from(port_mapping(port))]),
        );
    }
    if let Some(image) = image {
        service.insert("image".into(), Value::from(image));
    }

    Ok(serde_yaml::to_string(&doc)?)
}

fn malformed(path: &Path, reason: impl ToString) -> Error {
    Error::Malformed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
