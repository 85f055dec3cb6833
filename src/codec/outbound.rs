//! sing-box outbound JSON codec
//!
//! Schema: <https://sing-box.sagernet.org/configuration/outbound/hysteria2/>

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::descriptor::Descriptor;

use super::{Codec, DecodeError, EncodeError};

/// Hysteria2 outbound configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Hysteria2Outbound {
    /// Always `hysteria2`
    #[serde(rename = "type")]
    pub kind: String,

    /// Tag of the outbound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Server address (required)
    pub server: String,

    /// Server port (required)
    pub server_port: u16,

    /// Authentication password
    pub password: String,

    /// Upload bandwidth in Mbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_mbps: Option<u32>,

    /// Download bandwidth in Mbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_mbps: Option<u32>,

    /// TLS configuration
    #[serde(default)]
    pub tls: OutboundTls,
}

/// Outbound TLS configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct OutboundTls {
    #[serde(default)]
    pub enabled: bool,

    /// Do not send server name in ClientHello
    #[serde(default)]
    pub disable_sni: bool,

    /// Used to verify the hostname on the returned certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Accept any server certificate
    #[serde(default)]
    pub insecure: bool,
}

impl From<&Descriptor> for Hysteria2Outbound {
    fn from(d: &Descriptor) -> Self {
        Self {
            kind: "hysteria2".to_string(),
            tag: Some(d.name().to_string()),
            server: d.server_host().to_string(),
            server_port: d.server_port(),
            password: d.password().to_string(),
            up_mbps: d.up_mbps(),
            down_mbps: d.down_mbps(),
            tls: OutboundTls {
                enabled: true,
                disable_sni: false,
                server_name: Some(d.sni().to_string()),
                insecure: d.skip_cert_verify(),
            },
        }
    }
}

impl TryFrom<Hysteria2Outbound> for Descriptor {
    type Error = DecodeError;

    fn try_from(o: Hysteria2Outbound) -> Result<Self, Self::Error> {
        if o.kind != "hysteria2" {
            return Err(DecodeError::Outbound(format!(
                "unsupported outbound type `{}`",
                o.kind
            )));
        }
        // sing-box verifies against `server` when no server_name is set
        let sni = o
            .tls
            .server_name
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| o.server.clone());

        Ok(Descriptor::builder(o.server, o.server_port, o.password, sni)
            .name(o.tag)
            .skip_cert_verify(o.tls.insecure)
            .bandwidth(o.up_mbps, o.down_mbps)
            .build()?)
    }
}

/// sing-box outbound codec, rendering pretty-printed JSON.
pub struct OutboundJson;

impl Codec for OutboundJson {
    fn format(&self) -> &'static str {
        "sing-box"
    }

    fn encode(&self, d: &Descriptor) -> Result<String, EncodeError> {
        Ok(serde_json::to_string_pretty(&Hysteria2Outbound::from(d))?)
    }

    fn decode(&self, input: &str) -> Result<Descriptor, DecodeError> {
        trace!("Decoding sing-box outbound ({} bytes)", input.len());
        let outbound: Hysteria2Outbound =
            serde_json::from_str(input).map_err(|e| DecodeError::Outbound(e.to_string()))?;
        Descriptor::try_from(outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_fields() {
        let d = Descriptor::builder("1.2.3.4", 443, "abc123", "example.com")
            .build()
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&OutboundJson.encode(&d).unwrap()).unwrap();
        assert_eq!(json["type"], "hysteria2");
        assert_eq!(json["tag"], "example.com");
        assert_eq!(json["server"], "1.2.3.4");
        assert_eq!(json["server_port"], 443);
        assert_eq!(json["tls"]["enabled"], true);
        assert_eq!(json["tls"]["disable_sni"], false);
        assert_eq!(json["tls"]["server_name"], "example.com");
        assert_eq!(json["tls"]["insecure"], false);
        assert!(json.get("up_mbps").is_none());
    }

    #[test]
    fn test_round_trip() {
        let original = Descriptor::builder("node.example.net", 8443, "pw", "example.com")
            .name(Some("hy2-out"))
            .skip_cert_verify(true)
            .bandwidth(None, Some(200))
            .build()
            .unwrap();
        let json = OutboundJson.encode(&original).unwrap();
        assert_eq!(OutboundJson.decode(&json).unwrap(), original);
    }

    #[test]
    fn test_decode_without_tag_or_server_name() {
        let json = r#"{"type":"hysteria2","server":"a.example","server_port":443,"password":"pw"}"#;
        let d = OutboundJson.decode(json).unwrap();
        assert_eq!(d.sni(), "a.example");
        assert_eq!(d.name(), "a.example");
    }

    #[test]
    fn test_rejects_other_type() {
        let json = r#"{"type":"tuic","server":"a","server_port":443,"password":"pw"}"#;
        assert!(matches!(
            OutboundJson.decode(json),
            Err(DecodeError::Outbound(msg)) if msg.contains("tuic")
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            OutboundJson.decode("not json"),
            Err(DecodeError::Outbound(_))
        ));
    }
}
