//! Client descriptor export
//!
//! After every install or update the endpoint is written out in each client
//! format under `<workdir>/clients/`, and the selected formats are printed.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::codec::{Codec, NekoLink, OutboundJson, ProxyListDocument, ShareLink};
use crate::descriptor::Descriptor;
use crate::error::{Error, Result};

pub const CLIENTS_DIR: &str = "clients";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientFormat {
    ShareLink,
    NekoRay,
    /// mihomo proxy-list document
    Mihomo,
    SingBox,
}

impl ClientFormat {
    pub const ALL: [ClientFormat; 4] = [
        ClientFormat::ShareLink,
        ClientFormat::NekoRay,
        ClientFormat::Mihomo,
        ClientFormat::SingBox,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ClientFormat::ShareLink => "share-link.txt",
            ClientFormat::NekoRay => "nekoray.txt",
            ClientFormat::Mihomo => "mihomo.yaml",
            ClientFormat::SingBox => "sing-box.json",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ClientFormat::ShareLink => "Share link (hy2://)",
            ClientFormat::NekoRay => "NekoRay / NekoBox",
            ClientFormat::Mihomo => "mihomo / Clash Meta",
            ClientFormat::SingBox => "sing-box outbound",
        }
    }

    pub fn encode(self, descriptor: &Descriptor) -> Result<String> {
        let text = match self {
            ClientFormat::ShareLink => ShareLink::default().encode(descriptor)?,
            ClientFormat::NekoRay => NekoLink.encode(descriptor)?,
            ClientFormat::Mihomo => {
                ProxyListDocument::from_descriptors(std::slice::from_ref(descriptor)).to_yaml()?
            }
            ClientFormat::SingBox => OutboundJson.encode(descriptor)?,
        };
        Ok(text)
    }
}

/// Formats picked on the command line. An empty selection means all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSelection(Vec<ClientFormat>);

impl FormatSelection {
    pub fn new(formats: impl IntoIterator<Item = ClientFormat>) -> Self {
        let mut selected = Vec::new();
        for format in formats {
            if !selected.contains(&format) {
                selected.push(format);
            }
        }
        Self(selected)
    }

    pub fn formats(&self) -> &[ClientFormat] {
        if self.0.is_empty() {
            &ClientFormat::ALL
        } else {
            &self.0
        }
    }
}

/// Writes every format of `descriptor` into `dir`, creating it if needed.
pub async fn write_all(descriptor: &Descriptor, dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::file(dir, e))?;

    let mut written = Vec::with_capacity(ClientFormat::ALL.len());
    for format in ClientFormat::ALL {
        let path = dir.join(format.file_name());
        let mut text = format.encode(descriptor)?;
        if !text.ends_with('\n') {
            text.push('\n');
        }
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| Error::file(&path, e))?;
        debug!("Wrote {}", path.display());
        written.push(path);
    }
    info!("Client configurations written to {}", dir.display());
    Ok(written)
}

/// Renders the selected formats, one titled section each.
pub fn render(descriptor: &Descriptor, selection: &FormatSelection) -> Result<String> {
    let mut out = String::new();
    for format in selection.formats() {
        let text = format.encode(descriptor)?;
        out.push_str(&format!("# {}\n{}\n", format.title(), text.trim_end()));
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::LinkRegistry;

    fn descriptor() -> Descriptor {
        Descriptor::builder("1.2.3.4", 443, "abc123", "example.com")
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_selection_means_all() {
        assert_eq!(FormatSelection::default().formats(), &ClientFormat::ALL);
        let selection = FormatSelection::new([ClientFormat::Mihomo, ClientFormat::Mihomo]);
        assert_eq!(selection.formats(), &[ClientFormat::Mihomo]);
    }

    #[test]
    fn test_render_selected() {
        let out = render(&descriptor(), &FormatSelection::new([ClientFormat::ShareLink])).unwrap();
        assert!(out.starts_with("# Share link (hy2://)\nhy2://abc123@1.2.3.4:443"));
        assert!(!out.contains("nekoray://"));
    }

    #[tokio::test]
    async fn test_write_all() {
        let dir = tempfile::tempdir().unwrap();
        let clients = dir.path().join(CLIENTS_DIR);
        let written = write_all(&descriptor(), &clients).await.unwrap();
        assert_eq!(written.len(), 4);

        let link = std::fs::read_to_string(clients.join("share-link.txt")).unwrap();
        let decoded = LinkRegistry::with_builtin_codecs().decode(link.trim()).unwrap();
        assert_eq!(decoded, descriptor());

        let yaml = std::fs::read_to_string(clients.join("mihomo.yaml")).unwrap();
        assert!(yaml.contains("proxy-groups"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(clients.join("sing-box.json")).unwrap())
                .unwrap();
        assert_eq!(json["type"], "hysteria2");
    }
}
