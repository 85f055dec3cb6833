//! mihomo/Clash proxy-list codec
//!
//! A single descriptor encodes to one `proxies` entry. Whole documents
//! (`proxies` plus `proxy-groups`) are built with [`ProxyListDocument`].

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::descriptor::Descriptor;

use super::{Codec, DecodeError, EncodeError, format_mbps, parse_mbps};

/// Proxy `type` this codec accepts.
pub const PROXY_TYPE: &str = "hysteria2";

/// Name of the generated selector group.
pub const SELECTOR_GROUP: &str = "PROXY";

// ============================================================================
// Document Types
// ============================================================================

/// One entry of the `proxies` list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    pub server: String,

    pub port: u16,

    pub password: String,

    /// Falls back to `server` when absent, as mihomo itself does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,

    #[serde(rename = "skip-cert-verify", default)]
    pub skip_cert_verify: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<String>,
}

impl ProxyEntry {
    pub fn from_descriptor(d: &Descriptor) -> Self {
        Self {
            name: d.name().to_string(),
            kind: PROXY_TYPE.to_string(),
            server: d.server_host().to_string(),
            port: d.server_port(),
            password: d.password().to_string(),
            sni: Some(d.sni().to_string()),
            skip_cert_verify: d.skip_cert_verify(),
            up: d.up_mbps().map(format_mbps),
            down: d.down_mbps().map(format_mbps),
        }
    }

    pub fn into_descriptor(self) -> Result<Descriptor, DecodeError> {
        if self.kind != PROXY_TYPE {
            return Err(DecodeError::ProxyList(format!(
                "unsupported proxy type `{}`",
                self.kind
            )));
        }
        let up = parse_bandwidth("up", self.up.as_deref())?;
        let down = parse_bandwidth("down", self.down.as_deref())?;
        let sni = self
            .sni
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.server.clone());

        Ok(Descriptor::builder(self.server, self.port, self.password, sni)
            .name(Some(self.name))
            .skip_cert_verify(self.skip_cert_verify)
            .bandwidth(up, down)
            .build()?)
    }
}

fn parse_bandwidth(key: &str, value: Option<&str>) -> Result<Option<u32>, DecodeError> {
    match value {
        None => Ok(None),
        Some(v) => parse_mbps(v)
            .map(Some)
            .ok_or_else(|| DecodeError::ProxyList(format!("invalid `{}` bandwidth `{}`", key, v))),
    }
}

/// One entry of the `proxy-groups` list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProxyGroup {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub proxies: Vec<String>,
}

impl ProxyGroup {
    /// A `select` group over the given proxy names.
    pub fn selector(name: impl Into<String>, proxies: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: "select".to_string(),
            proxies,
        }
    }
}

/// A proxy-list document.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyListDocument {
    #[serde(default)]
    pub proxies: Vec<ProxyEntry>,

    #[serde(rename = "proxy-groups", default)]
    pub proxy_groups: Vec<ProxyGroup>,
}

impl ProxyListDocument {
    /// Builds a document from descriptors, in the given order, plus one `PROXY`
    /// selector listing every proxy name once.
    pub fn from_descriptors(descriptors: &[Descriptor]) -> Self {
        let proxies: Vec<ProxyEntry> = descriptors
            .iter()
            .map(ProxyEntry::from_descriptor)
            .collect();

        let mut names: Vec<String> = Vec::with_capacity(proxies.len());
        for proxy in &proxies {
            if !names.contains(&proxy.name) {
                names.push(proxy.name.clone());
            }
        }

        Self {
            proxies,
            proxy_groups: vec![ProxyGroup::selector(SELECTOR_GROUP, names)],
        }
    }

    pub fn to_yaml(&self) -> Result<String, EncodeError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Single-entry proxy-list codec.
pub struct ProxyList;

impl Codec for ProxyList {
    fn format(&self) -> &'static str {
        "proxy-list"
    }

    fn encode(&self, d: &Descriptor) -> Result<String, EncodeError> {
        Ok(serde_yaml::to_string(&ProxyEntry::from_descriptor(d))?)
    }

    fn decode(&self, input: &str) -> Result<Descriptor, DecodeError> {
        trace!("Decoding proxy-list entry ({} bytes)", input.len());
        let entry: ProxyEntry =
            serde_yaml::from_str(input).map_err(|e| DecodeError::ProxyList(e.to_string()))?;
        entry.into_descriptor()
    }
}
