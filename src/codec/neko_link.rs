//! NekoLink codec
//!
//! Format: `nekoray://<tag>#<base64(JSON)>`. Two payload shapes exist:
//!
//! - custom core (tag `custom`): an envelope whose `cs` field is a JSON string
//!   holding a hysteria2 client config
//! - native hysteria2 bean (tag `hysteria2`): a flat object
//!
//! The shape is chosen by whether the decoded object carries a `cs` key. The
//! tag is informational only. Encoding always emits the custom shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::descriptor::Descriptor;

use super::base64::{decode_base64, encode_base64};
use super::{Codec, DecodeError, EncodeError, extract_scheme, parse_mbps};

pub const SCHEME: &str = "nekoray";
pub const CUSTOM_TAG: &str = "custom";
pub const NATIVE_TAG: &str = "hysteria2";

/// Which NekoLink layer failed to decode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NekoLinkError {
    #[error("invalid NekoLink envelope: {0}")]
    Envelope(String),

    #[error("invalid NekoLink custom config: {0}")]
    Custom(String),

    #[error("invalid NekoLink hysteria2 bean: {0}")]
    Native(String),
}

// ============================================================================
// Payload Types
// ============================================================================

#[derive(Serialize, Deserialize, Debug)]
struct CustomEnvelope {
    #[serde(rename = "_v", default)]
    version: u32,
    addr: String,
    port: u16,
    #[serde(default)]
    name: String,
    #[serde(default)]
    core: String,
    #[serde(default)]
    cmd: Vec<String>,
    cs: String,
}

/// hysteria2 client config carried in the envelope's `cs` string.
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ClientConfig {
    #[serde(default)]
    server: String,
    auth: String,
    tls: ClientTls,
    #[serde(default = "default_true")]
    fast_open: bool,
    #[serde(default = "default_true")]
    lazy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    socks5: Option<Socks5>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bandwidth: Option<ClientBandwidth>,
}

#[derive(Serialize, Deserialize, Debug)]
struct ClientTls {
    #[serde(default)]
    sni: String,
    #[serde(default)]
    insecure: bool,
}

#[derive(Serialize, Deserialize, Debug)]
struct Socks5 {
    listen: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct ClientBandwidth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    up: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    down: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct NativeBean {
    addr: String,
    port: u16,
    #[serde(default)]
    name: String,
    password: String,
    #[serde(default)]
    sni: String,
    #[serde(default)]
    allow_insecure: bool,
    #[serde(default)]
    upload_mbps: Option<u32>,
    #[serde(default)]
    download_mbps: Option<u32>,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Codec
// ============================================================================

/// NekoRay share link codec.
pub struct NekoLink;

impl Codec for NekoLink {
    fn format(&self) -> &'static str {
        "nekolink"
    }

    fn encode(&self, d: &Descriptor) -> Result<String, EncodeError> {
        let bandwidth = match (d.up_mbps(), d.down_mbps()) {
            (None, None) => None,
            (up, down) => Some(ClientBandwidth {
                up: up.map(|n| format!("{} mbps", n)),
                down: down.map(|n| format!("{} mbps", n)),
            }),
        };
        let config = ClientConfig {
            server: d.endpoint(),
            auth: d.password().to_string(),
            tls: ClientTls {
                sni: d.sni().to_string(),
                insecure: d.skip_cert_verify(),
            },
            fast_open: true,
            lazy: true,
            socks5: Some(Socks5 {
                listen: "127.0.0.1:%socks_port%".to_string(),
            }),
            bandwidth,
        };
        let envelope = CustomEnvelope {
            version: 0,
            addr: d.server_host().to_string(),
            port: d.server_port(),
            name: d.name().to_string(),
            core: NATIVE_TAG.to_string(),
            cmd: ["client", "--disable-update-check", "-c", "%config%"]
                .map(String::from)
                .to_vec(),
            cs: serde_json::to_string(&config)?,
        };
        let payload = serde_json::to_string(&envelope)?;
        Ok(format!("{}://{}#{}", SCHEME, CUSTOM_TAG, encode_base64(payload)))
    }

    fn decode(&self, input: &str) -> Result<Descriptor, DecodeError> {
        let input = input.trim();
        if extract_scheme(input) != Some(SCHEME) {
            return Err(DecodeError::UnsupportedScheme(
                extract_scheme(input).unwrap_or_default().to_string(),
            ));
        }
        let rest = &input[SCHEME.len() + 3..];
        let (tag, payload) = rest
            .split_once('#')
            .ok_or_else(|| NekoLinkError::Envelope("missing `#<payload>` fragment".into()))?;

        let bytes = decode_base64(payload)
            .map_err(|e| NekoLinkError::Envelope(format!("payload is not Base64: {}", e)))?;
        let object: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| NekoLinkError::Envelope(format!("payload is not JSON: {}", e)))?;
        if !object.is_object() {
            return Err(NekoLinkError::Envelope("payload is not a JSON object".into()).into());
        }

        if object.get("cs").is_some() {
            trace!("Decoding NekoLink custom config (tag: {})", tag);
            decode_custom(object)
        } else {
            trace!("Decoding NekoLink hysteria2 bean (tag: {})", tag);
            decode_native(object)
        }
    }
}

fn decode_custom(object: serde_json::Value) -> Result<Descriptor, DecodeError> {
    let envelope: CustomEnvelope =
        serde_json::from_value(object).map_err(|e| NekoLinkError::Custom(e.to_string()))?;
    let config: ClientConfig =
        serde_json::from_str(&envelope.cs).map_err(|e| NekoLinkError::Custom(e.to_string()))?;

    let (up, down) = match &config.bandwidth {
        Some(bw) => (
            bw.up.as_deref().and_then(parse_mbps),
            bw.down.as_deref().and_then(parse_mbps),
        ),
        None => (None, None),
    };

    // envelope addr/port win over `server` inside the client config
    Ok(
        Descriptor::builder(envelope.addr, envelope.port, config.auth, config.tls.sni)
            .name(Some(envelope.name))
            .skip_cert_verify(config.tls.insecure)
            .bandwidth(up, down)
            .build()?,
    )
}

fn decode_native(object: serde_json::Value) -> Result<Descriptor, DecodeError> {
    let bean: NativeBean =
        serde_json::from_value(object).map_err(|e| NekoLinkError::Native(e.to_string()))?;
    Ok(
        Descriptor::builder(bean.addr, bean.port, bean.password, bean.sni)
            .name(Some(bean.name))
            .skip_cert_verify(bean.allow_insecure)
            .bandwidth(
                bean.upload_mbps.filter(|n| *n > 0),
                bean.download_mbps.filter(|n| *n > 0),
            )
            .build()?,
    )
}
