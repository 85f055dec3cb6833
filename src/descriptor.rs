//! Canonical proxy endpoint descriptor
//!
//! A [`Descriptor`] holds the connection parameters of one Hysteria2 endpoint.
//! Every client format is produced from, and decoded back into, this type.
//! Descriptors are immutable: fields are private and only readable through
//! accessors, and the `with_*` helpers consume the value and return a new one.

use thiserror::Error;

/// Reasons a descriptor fails validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidDescriptor {
    #[error("server host is empty")]
    EmptyHost,
    #[error("server port must be between 1 and 65535")]
    ZeroPort,
    #[error("password is empty")]
    EmptyPassword,
    #[error("SNI is empty")]
    EmptySni,
}

/// Connection parameters of one proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    server_host: String,
    server_port: u16,
    password: String,
    sni: String,
    skip_cert_verify: bool,
    up_mbps: Option<u32>,
    down_mbps: Option<u32>,
    masquerade: Option<String>,
}

impl Descriptor {
    /// Start building a descriptor from its required fields.
    pub fn builder(
        server_host: impl Into<String>,
        server_port: u16,
        password: impl Into<String>,
        sni: impl Into<String>,
    ) -> DescriptorBuilder {
        DescriptorBuilder {
            name: None,
            server_host: server_host.into(),
            server_port,
            password: password.into(),
            sni: sni.into(),
            skip_cert_verify: false,
            up_mbps: None,
            down_mbps: None,
            masquerade: None,
        }
    }

    /// Display label; equals the SNI unless one was given.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn sni(&self) -> &str {
        &self.sni
    }

    pub fn skip_cert_verify(&self) -> bool {
        self.skip_cert_verify
    }

    pub fn up_mbps(&self) -> Option<u32> {
        self.up_mbps
    }

    pub fn down_mbps(&self) -> Option<u32> {
        self.down_mbps
    }

    pub fn masquerade(&self) -> Option<&str> {
        self.masquerade.as_deref()
    }

    /// `host:port` of the endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Same endpoint under a different display name. An empty name falls back
    /// to the SNI.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let name = if name.is_empty() {
            self.sni.clone()
        } else {
            name
        };
        Self { name, ..self }
    }

    pub fn with_bandwidth(self, up_mbps: Option<u32>, down_mbps: Option<u32>) -> Self {
        Self {
            up_mbps,
            down_mbps,
            ..self
        }
    }

    /// Same endpoint without bandwidth hints.
    pub fn without_bandwidth(self) -> Self {
        Self {
            up_mbps: None,
            down_mbps: None,
            ..self
        }
    }
}

/// Builder returned by [`Descriptor::builder`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    name: Option<String>,
    server_host: String,
    server_port: u16,
    password: String,
    sni: String,
    skip_cert_verify: bool,
    up_mbps: Option<u32>,
    down_mbps: Option<u32>,
    masquerade: Option<String>,
}

impl DescriptorBuilder {
    pub fn name(mut self, name: Option<impl Into<String>>) -> Self {
        self.name = name.map(Into::into).filter(|n: &String| !n.is_empty());
        self
    }

    pub fn skip_cert_verify(mut self, skip: bool) -> Self {
        self.skip_cert_verify = skip;
        self
    }

    pub fn bandwidth(mut self, up_mbps: Option<u32>, down_mbps: Option<u32>) -> Self {
        self.up_mbps = up_mbps;
        self.down_mbps = down_mbps;
        self
    }

    pub fn masquerade(mut self, url: Option<impl Into<String>>) -> Self {
        self.masquerade = url.map(Into::into);
        self
    }

    pub fn build(self) -> Result<Descriptor, InvalidDescriptor> {
        if self.server_host.trim().is_empty() {
            return Err(InvalidDescriptor::EmptyHost);
        }
        if self.server_port == 0 {
            return Err(InvalidDescriptor::ZeroPort);
        }
        if self.password.is_empty() {
            return Err(InvalidDescriptor::EmptyPassword);
        }
        if self.sni.trim().is_empty() {
            return Err(InvalidDescriptor::EmptySni);
        }

        Ok(Descriptor {
            name: self.name.unwrap_or_else(|| self.sni.clone()),
            server_host: self.server_host,
            server_port: self.server_port,
            password: self.password,
            sni: self.sni,
            skip_cert_verify: self.skip_cert_verify,
            up_mbps: self.up_mbps,
            down_mbps: self.down_mbps,
            masquerade: self.masquerade,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Descriptor {
        Descriptor::builder("1.2.3.4", 443, "abc123", "example.com")
            .build()
            .unwrap()
    }

    #[test]
    fn test_name_defaults_to_sni() {
        let d = sample();
        assert_eq!(d.name(), "example.com");
        assert!(!d.skip_cert_verify());
        assert_eq!(d.up_mbps(), None);
        assert_eq!(d.masquerade(), None);
    }

    #[test]
    fn test_empty_name_defaults_to_sni() {
        let d = Descriptor::builder("1.2.3.4", 443, "abc123", "example.com")
            .name(Some(""))
            .build()
            .unwrap();
        assert_eq!(d.name(), "example.com");
    }

    #[test]
    fn test_with_name_returns_new_value() {
        let original = sample();
        let renamed = original.clone().with_name("tokyo");
        assert_eq!(renamed.name(), "tokyo");
        assert_eq!(original.name(), "example.com");
        assert_eq!(renamed.endpoint(), original.endpoint());
    }

    #[test]
    fn test_rejects_invalid_fields() {
        assert_eq!(
            Descriptor::builder("", 443, "pw", "sni").build(),
            Err(InvalidDescriptor::EmptyHost)
        );
        assert_eq!(
            Descriptor::builder("h", 0, "pw", "sni").build(),
            Err(InvalidDescriptor::ZeroPort)
        );
        assert_eq!(
            Descriptor::builder("h", 1, "", "sni").build(),
            Err(InvalidDescriptor::EmptyPassword)
        );
        assert_eq!(
            Descriptor::builder("h", 1, "pw", " ").build(),
            Err(InvalidDescriptor::EmptySni)
        );
    }

    #[test]
    fn test_bandwidth_round_trip() {
        let d = sample().with_bandwidth(Some(100), Some(500));
        assert_eq!((d.up_mbps(), d.down_mbps()), (Some(100), Some(500)));
        assert_eq!(d.without_bandwidth(), sample());
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(sample().endpoint(), "1.2.3.4:443");
    }
}
