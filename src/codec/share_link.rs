//! Hysteria2 ShareLink codec
//!
//! Format: `hy2://password@host:port?sni=value[&insecure=1]#name`
//! (`hysteria2://` is accepted as an alias when decoding).
//!
//! Bracketed IPv6 literals are not supported: the host is split from the port
//! on the last `:` and rejected if it still contains one.

use std::collections::HashMap;

use tracing::trace;

use crate::descriptor::Descriptor;

use super::{Codec, DecodeError, EncodeError, extract_scheme};

/// ShareLink encoder/decoder bound to one output scheme.
pub struct ShareLink {
    scheme: &'static str,
}

impl ShareLink {
    /// Schemes recognized when decoding.
    pub const SCHEMES: [&'static str; 2] = ["hy2", "hysteria2"];

    pub fn new(scheme: &'static str) -> Self {
        Self { scheme }
    }
}

impl Default for ShareLink {
    fn default() -> Self {
        Self::new("hy2")
    }
}

impl Codec for ShareLink {
    fn format(&self) -> &'static str {
        "share-link"
    }

    fn encode(&self, d: &Descriptor) -> Result<String, EncodeError> {
        let mut link = format!(
            "{}://{}@{}:{}?sni={}",
            self.scheme,
            urlencoding::encode(d.password()),
            d.server_host(),
            d.server_port(),
            urlencoding::encode(d.sni()),
        );
        if d.skip_cert_verify() {
            link.push_str("&insecure=1");
        }
        link.push('#');
        link.push_str(&urlencoding::encode(d.name()));
        Ok(link)
    }

    fn decode(&self, input: &str) -> Result<Descriptor, DecodeError> {
        let input = input.trim();
        trace!("Decoding share link (scheme: {})", self.scheme);

        let scheme = extract_scheme(input)
            .ok_or_else(|| DecodeError::ShareLink("missing scheme separator `://`".into()))?;
        if !Self::SCHEMES.contains(&scheme) {
            return Err(DecodeError::UnsupportedScheme(scheme.to_string()));
        }
        let rest = &input[scheme.len() + 3..];

        let (rest, fragment) = match rest.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (rest, None),
        };
        let (authority, query) = rest.split_once('?').unwrap_or((rest, ""));
        let authority = authority.strip_suffix('/').unwrap_or(authority);

        let (userinfo, hostport) = authority
            .split_once('@')
            .ok_or_else(|| DecodeError::ShareLink("missing `password@` part".into()))?;
        let password = percent_decode(userinfo)?;
        let (host, port) = split_host_port(hostport)?;

        let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        let sni = params
            .get("sni")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DecodeError::ShareLink("missing `sni` query parameter".into()))?;
        let insecure = params
            .get("insecure")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let name = fragment.map(percent_decode).transpose()?;

        Ok(Descriptor::builder(host, port, password, sni.as_str())
            .name(name)
            .skip_cert_verify(insecure)
            .build()?)
    }
}

fn percent_decode(s: &str) -> Result<String, DecodeError> {
    urlencoding::decode(s)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| DecodeError::ShareLink(format!("invalid percent-encoding: {}", e)))
}

/// Splits `host:port` on the last colon.
fn split_host_port(hostport: &str) -> Result<(&str, u16), DecodeError> {
    let (host, port) = hostport
        .rsplit_once(':')
        .ok_or_else(|| DecodeError::ShareLink("missing `:port`".into()))?;
    if host.starts_with('[') || host.contains(':') {
        return Err(DecodeError::ShareLink(
            "IPv6 literal hosts are not supported".into(),
        ));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| DecodeError::ShareLink(format!("invalid port `{}`", port)))?;
    Ok((host, port))
}
