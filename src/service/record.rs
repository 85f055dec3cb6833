//! Persisted service record
//!
//! `record.json` is the source of truth for every operation after `install`.
//! It is written atomically (temporary file, then rename) so a crash never
//! leaves a truncated record behind.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cert::CertificateRecord;
use crate::descriptor::Descriptor;
use crate::error::{Error, Result};

use super::compose;

pub const RECORD_FILE: &str = "record.json";

/// What `install` set up, and what `update` may change.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub domain: String,
    pub port: u16,
    pub password: String,
    pub image: String,
    pub workdir: PathBuf,
    /// Shown to clients as the server address; never used for routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    pub certificate: CertificateRecord,
}

impl ServiceRecord {
    pub fn container_name(&self) -> String {
        compose::container_name(&self.domain)
    }

    /// Client descriptor of the endpoint. Clients connect to the public IP
    /// when known, and verify the certificate against the domain.
    pub fn descriptor(&self, masquerade: Option<&str>) -> Result<Descriptor> {
        let host = self.public_ip.as_deref().unwrap_or(&self.domain);
        Descriptor::builder(host, self.port, self.password.as_str(), self.domain.as_str())
            .masquerade(masquerade)
            .build()
            .map_err(|e| Error::Decode(e.into()))
    }

    /// Reads the record of `workdir`. A missing file is `Ok(None)`.
    pub async fn load(workdir: &Path) -> Result<Option<Self>> {
        let path = workdir.join(RECORD_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::file(&path, e)),
        };
        let record = serde_json::from_str(&content).map_err(|e| Error::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!("Loaded service record from {}", path.display());
        Ok(Some(record))
    }

    pub async fn save(&self, workdir: &Path) -> Result<()> {
        let path = workdir.join(RECORD_FILE);
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(&path, content.as_bytes()).await?;
        debug!("Saved service record to {}", path.display());
        Ok(())
    }
}

/// Writes `contents` next to `path` and renames it into place.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| Error::file(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::file(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(workdir: &Path) -> ServiceRecord {
        ServiceRecord {
            domain: "example.com".into(),
            port: 443,
            password: "abc123".into(),
            image: "metacubex/mihomo:latest".into(),
            workdir: workdir.to_path_buf(),
            public_ip: Some("1.2.3.4".into()),
            certificate: CertificateRecord::for_domain(
                Path::new("/etc/letsencrypt"),
                "example.com",
            ),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let original = record(dir.path());
        original.save(dir.path()).await.unwrap();

        assert!(dir.path().join(RECORD_FILE).is_file());
        assert!(!dir.path().join("record.json.tmp").exists());
        let loaded = ServiceRecord::load(dir.path()).await.unwrap();
        assert_eq!(loaded, Some(original));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ServiceRecord::load(dir.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_malformed() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(RECORD_FILE), "{not json")
            .await
            .unwrap();
        assert!(matches!(
            ServiceRecord::load(dir.path()).await,
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_descriptor() {
        let d = record(Path::new("/tmp")).descriptor(None).unwrap();
        assert_eq!(d.server_host(), "1.2.3.4");
        assert_eq!(d.sni(), "example.com");
        assert_eq!(d.name(), "example.com");
        assert_eq!(d.password(), "abc123");
    }

    #[test]
    fn test_descriptor_without_public_ip_uses_domain() {
        let mut r = record(Path::new("/tmp"));
        r.public_ip = None;
        assert_eq!(r.descriptor(None).unwrap().server_host(), "example.com");
    }
}
