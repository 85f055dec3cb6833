//! Client descriptor codecs
//!
//! This module provides functionality for:
//! - Converting a [`Descriptor`] to and from each client format
//!   (ShareLink URI, NekoLink, mihomo proxy-list YAML, sing-box outbound JSON)
//! - Dispatching link lines to the right codec by scheme
//! - Batch conversion of mixed link lists (see [`batch`])

pub mod base64;
pub mod batch;
pub mod neko_link;
pub mod outbound;
pub mod proxy_list;
pub mod share_link;

pub use neko_link::{NekoLink, NekoLinkError};
pub use outbound::OutboundJson;
pub use proxy_list::{ProxyEntry, ProxyGroup, ProxyList, ProxyListDocument};
pub use share_link::ShareLink;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::descriptor::{Descriptor, InvalidDescriptor};

// ============================================================================
// Decode Errors
// ============================================================================

/// Why a client descriptor could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported link scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("invalid share link: {0}")]
    ShareLink(String),

    #[error(transparent)]
    NekoLink(#[from] NekoLinkError),

    #[error("invalid proxy-list entry: {0}")]
    ProxyList(String),

    #[error("invalid outbound descriptor: {0}")]
    Outbound(String),

    #[error("invalid descriptor: {0}")]
    Invalid(#[from] InvalidDescriptor),
}

/// Why a descriptor could not be rendered.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

// ============================================================================
// Codec Trait
// ============================================================================

/// A bidirectional converter between [`Descriptor`] and one external format.
///
/// For every valid descriptor `d`, `decode(&encode(&d))` equals `d` except for
/// fields the format cannot carry, which come back as `None`.
pub trait Codec: Send + Sync {
    /// Short format name used in logs
    fn format(&self) -> &'static str;

    fn encode(&self, descriptor: &Descriptor) -> Result<String, EncodeError>;

    fn decode(&self, input: &str) -> Result<Descriptor, DecodeError>;
}

// ============================================================================
// Link Registry
// ============================================================================

/// Dispatches link lines to codecs by URI scheme.
#[derive(Default)]
pub struct LinkRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Registry with `hy2://`, `hysteria2://` and `nekoray://` registered.
    pub fn with_builtin_codecs() -> Self {
        let mut registry = Self::new();
        for scheme in ShareLink::SCHEMES {
            registry.register(scheme, Arc::new(ShareLink::new(scheme)));
        }
        registry.register(neko_link::SCHEME, Arc::new(NekoLink));
        registry
    }

    pub fn register(&mut self, scheme: &str, codec: Arc<dyn Codec>) {
        self.codecs.insert(scheme.to_string(), codec);
    }

    pub fn get(&self, scheme: &str) -> Option<&Arc<dyn Codec>> {
        self.codecs.get(scheme)
    }

    /// Whether the line starts with a registered scheme.
    pub fn recognizes(&self, line: &str) -> bool {
        extract_scheme(line).is_some_and(|scheme| self.codecs.contains_key(scheme))
    }

    /// Decodes a single link using the codec registered for its scheme.
    pub fn decode(&self, line: &str) -> Result<Descriptor, DecodeError> {
        let line = line.trim();
        let scheme = extract_scheme(line)
            .ok_or_else(|| DecodeError::UnsupportedScheme(String::new()))?;
        let codec = self
            .codecs
            .get(scheme)
            .ok_or_else(|| DecodeError::UnsupportedScheme(scheme.to_string()))?;

        let result = codec.decode(line);
        match &result {
            Ok(d) => debug!("Decoded {} link -> '{}'", codec.format(), d.name()),
            Err(e) => debug!("Failed to decode {} link: {}", codec.format(), e),
        }
        result
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Extracts the scheme of a `scheme://...` string.
pub fn extract_scheme(uri: &str) -> Option<&str> {
    uri.split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|s| !s.is_empty())
}

/// Parses bandwidth strings such as `100`, `100 mbps` or `100Mbps` into Mbps.
pub fn parse_mbps(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(digits_end);
    let unit = unit.trim();
    if !(unit.is_empty() || unit.eq_ignore_ascii_case("mbps")) {
        return None;
    }
    number.parse().ok()
}

/// Renders a bandwidth in the `"<n> Mbps"` form clients accept.
pub fn format_mbps(mbps: u32) -> String {
    format!("{} Mbps", mbps)
}
