//! Batch conversion between link lists and proxy-list documents
//!
//! Items decode independently: a malformed line or entry is reported and the
//! rest of the batch still converts.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::descriptor::Descriptor;

use super::proxy_list::{PROXY_TYPE, ProxyEntry, ProxyGroup, ProxyListDocument};
use super::{Codec, DecodeError, EncodeError, LinkRegistry, ShareLink};

/// Group members mihomo resolves without a matching proxy.
const BUILTIN_TARGETS: [&str; 5] = ["DIRECT", "REJECT", "REJECT-DROP", "PASS", "COMPATIBLE"];

// ============================================================================
// Reports
// ============================================================================

/// A link line that failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    /// 1-based line number in the input
    pub line: usize,
    pub error: DecodeError,
}

/// A `proxies` entry that failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError {
    /// 1-based position in the `proxies` list
    pub index: usize,
    pub name: Option<String>,
    pub error: DecodeError,
}

/// Non-fatal findings about a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// Two or more proxies share a display name
    DuplicateName { name: String },
    /// A group references a name that is neither a proxy nor a group
    StaleGroupMember { group: String, member: String },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::DuplicateName { name } => {
                write!(f, "proxy name `{}` is used more than once", name)
            }
            ValidationWarning::StaleGroupMember { group, member } => {
                write!(f, "group `{}` references unknown proxy `{}`", group, member)
            }
        }
    }
}

/// Result of [`links_to_proxy_list`].
#[derive(Debug, Clone)]
pub struct ProxyListReport {
    /// Decoded descriptors, sorted by name
    pub descriptors: Vec<Descriptor>,
    pub document: ProxyListDocument,
    pub errors: Vec<LineError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ProxyListReport {
    pub fn to_yaml(&self) -> Result<String, EncodeError> {
        self.document.to_yaml()
    }
}

/// Result of [`proxy_list_to_links`].
#[derive(Debug, Clone)]
pub struct LinksReport {
    /// Decoded descriptors, sorted by name
    pub descriptors: Vec<Descriptor>,
    /// One ShareLink per descriptor, same order
    pub links: Vec<String>,
    /// Entries of other proxy types that were left out
    pub skipped: usize,
    pub errors: Vec<EntryError>,
    pub warnings: Vec<ValidationWarning>,
}

// ============================================================================
// Links -> Proxy List
// ============================================================================

/// Converts newline-delimited links into one proxy-list document.
///
/// Only `hy2://`, `hysteria2://` and `nekoray://` lines are considered; every
/// other line is skipped without an error.
pub fn links_to_proxy_list(text: &str) -> ProxyListReport {
    let registry = LinkRegistry::with_builtin_codecs();
    let mut descriptors = Vec::new();
    let mut errors = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if !registry.recognizes(line) {
            continue;
        }
        match registry.decode(line) {
            Ok(d) => descriptors.push(d),
            Err(error) => {
                warn!("Line {}: {}", idx + 1, error);
                errors.push(LineError {
                    line: idx + 1,
                    error,
                });
            }
        }
    }

    sort_descriptors(&mut descriptors);
    let warnings = duplicate_names(&descriptors);
    for warning in &warnings {
        warn!("{}", warning);
    }

    let document = ProxyListDocument::from_descriptors(&descriptors);
    info!(
        "Converted {} links into a proxy list ({} failed)",
        descriptors.len(),
        errors.len()
    );

    ProxyListReport {
        descriptors,
        document,
        errors,
        warnings,
    }
}

/// Whether `text` looks like a proxy-list document rather than a link list.
pub fn is_proxy_list_document(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("proxies:")
        || trimmed.starts_with("proxy-groups:")
        || (trimmed.contains("\nproxies:") && trimmed.contains("- name:"))
}

// ============================================================================
// Proxy List -> Links
// ============================================================================

#[derive(serde::Deserialize)]
struct RawDocument {
    #[serde(default)]
    proxies: Vec<serde_yaml::Value>,
    #[serde(rename = "proxy-groups", default)]
    proxy_groups: Vec<ProxyGroup>,
}

/// Converts a proxy-list document into ShareLinks.
///
/// Non-`hysteria2` proxies are counted and skipped. Group references are
/// checked against every proxy and group name in the document.
pub fn proxy_list_to_links(yaml: &str) -> Result<LinksReport, DecodeError> {
    let doc: RawDocument =
        serde_yaml::from_str(yaml).map_err(|e| DecodeError::ProxyList(e.to_string()))?;

    let mut known: HashSet<String> = doc.proxy_groups.iter().map(|g| g.name.clone()).collect();
    let mut descriptors = Vec::new();
    let mut errors = Vec::new();
    let mut skipped = 0;

    for (idx, raw) in doc.proxies.into_iter().enumerate() {
        let name = raw.get("name").and_then(|v| v.as_str()).map(str::to_string);
        if let Some(name) = &name {
            known.insert(name.clone());
        }

        let kind = raw.get("type").and_then(|v| v.as_str()).unwrap_or_default();
        if kind != PROXY_TYPE {
            debug!("Skipping proxy {:?} of type `{}`", name, kind);
            skipped += 1;
            continue;
        }

        let decoded = serde_yaml::from_value::<ProxyEntry>(raw)
            .map_err(|e| DecodeError::ProxyList(e.to_string()))
            .and_then(ProxyEntry::into_descriptor);
        match decoded {
            Ok(d) => descriptors.push(d),
            Err(error) => {
                warn!("Proxy #{} ({:?}): {}", idx + 1, name, error);
                errors.push(EntryError {
                    index: idx + 1,
                    name,
                    error,
                });
            }
        }
    }

    sort_descriptors(&mut descriptors);
    let mut warnings = duplicate_names(&descriptors);
    warnings.extend(stale_members(&doc.proxy_groups, &known));
    for warning in &warnings {
        warn!("{}", warning);
    }

    let share_link = ShareLink::default();
    let links = descriptors
        .iter()
        .map(|d| share_link.encode(d))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DecodeError::ProxyList(e.to_string()))?;

    info!(
        "Converted {} proxies into share links ({} skipped, {} failed)",
        links.len(),
        skipped,
        errors.len()
    );

    Ok(LinksReport {
        descriptors,
        links,
        skipped,
        errors,
        warnings,
    })
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Sorts by name, then endpoint, so output does not depend on input order.
fn sort_descriptors(descriptors: &mut [Descriptor]) {
    descriptors.sort_by(|a, b| {
        a.name()
            .cmp(b.name())
            .then_with(|| a.endpoint().cmp(&b.endpoint()))
    });
}

fn duplicate_names(descriptors: &[Descriptor]) -> Vec<ValidationWarning> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut warnings = Vec::new();
    for d in descriptors {
        if !seen.insert(d.name()) && reported.insert(d.name()) {
            warnings.push(ValidationWarning::DuplicateName {
                name: d.name().to_string(),
            });
        }
    }
    warnings
}

fn stale_members(groups: &[ProxyGroup], known: &HashSet<String>) -> Vec<ValidationWarning> {
    groups
        .iter()
        .flat_map(|group| {
            group
                .proxies
                .iter()
                .filter(|member| {
                    !known.contains(member.as_str()) && !BUILTIN_TARGETS.contains(&member.as_str())
                })
                .map(|member| ValidationWarning::StaleGroupMember {
                    group: group.name.clone(),
                    member: member.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NekoLink;

    fn neko_line() -> String {
        let d = Descriptor::builder("5.6.7.8", 8443, "neko-pw", "b.example")
            .name(Some("beta"))
            .build()
            .unwrap();
        NekoLink.encode(&d).unwrap()
    }

    #[test]
    fn test_is_proxy_list_document() {
        assert!(is_proxy_list_document("proxies:\n  - name: a\n"));
        assert!(is_proxy_list_document("# exported\nmixed-port: 7890\nproxies:\n- name: a\n"));
        assert!(!is_proxy_list_document("hy2://pw@1.1.1.1:443?sni=a.example#a\n"));
    }

    #[test]
    fn test_three_valid_one_malformed() {
        let text = format!(
            "hy2://pw1@1.1.1.1:443?sni=c.example#gamma\n\
             hysteria2://pw2@2.2.2.2:443?sni=a.example#alpha\n\
             {}\n\
             hy2://broken-no-port@host?sni=x#bad\n",
            neko_line()
        );
        let report = links_to_proxy_list(&text);
        assert_eq!(report.descriptors.len(), 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].line, 4);

        let names: Vec<&str> = report.descriptors.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(
            report.document.proxy_groups[0].proxies,
            vec!["alpha", "beta", "gamma"]
        );
    }

    #[test]
    fn test_unrecognized_lines_skipped_silently() {
        let text = "# my nodes\n\nvmess://abc\nhy2://pw@1.1.1.1:443?sni=a.example#a\nrandom text\n";
        let report = links_to_proxy_list(text);
        assert_eq!(report.descriptors.len(), 1);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_output_is_deterministic() {
        let a = "hy2://pw@1.1.1.1:443?sni=a.example#a";
        let b = "hy2://pw@2.2.2.2:443?sni=b.example#b";
        let first = links_to_proxy_list(&format!("{}\n{}", a, b)).to_yaml().unwrap();
        let second = links_to_proxy_list(&format!("{}\n{}", b, a)).to_yaml().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_names_warn() {
        let text = "hy2://pw@1.1.1.1:443?sni=a.example#same\n\
                    hy2://pw@2.2.2.2:443?sni=a.example#same\n\
                    hy2://pw@3.3.3.3:443?sni=a.example#same\n";
        let report = links_to_proxy_list(text);
        assert_eq!(report.descriptors.len(), 3);
        assert_eq!(
            report.warnings,
            vec![ValidationWarning::DuplicateName {
                name: "same".into()
            }]
        );
        assert_eq!(report.document.proxy_groups[0].proxies, vec!["same"]);
    }

    #[test]
    fn test_proxy_list_to_links() {
        let yaml = r#"
proxies:
  - name: zeta
    type: hysteria2
    server: 1.2.3.4
    port: 443
    password: pw
    sni: example.com
    skip-cert-verify: false
  - name: ss-node
    type: ss
    server: 9.9.9.9
    port: 8388
    cipher: aes-128-gcm
    password: pw
  - name: alpha
    type: hysteria2
    server: 5.6.7.8
    port: 8443
    password: pw2
    sni: alpha.example
    skip-cert-verify: true
  - name: broken
    type: hysteria2
    server: 5.6.7.8
proxy-groups:
  - name: PROXY
    type: select
    proxies: [alpha, zeta, ss-node, gone, DIRECT, AUTO]
  - name: AUTO
    type: url-test
    proxies: [zeta]
"#;
        let report = proxy_list_to_links(yaml).unwrap();
        assert_eq!(
            report.links,
            vec![
                "hy2://pw2@5.6.7.8:8443?sni=alpha.example&insecure=1#alpha",
                "hy2://pw@1.2.3.4:443?sni=example.com#zeta",
            ]
        );
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].index, 4);
        assert_eq!(report.errors[0].name.as_deref(), Some("broken"));
        assert_eq!(
            report.warnings,
            vec![ValidationWarning::StaleGroupMember {
                group: "PROXY".into(),
                member: "gone".into()
            }]
        );
    }

    #[test]
    fn test_proxy_list_to_links_rejects_non_document() {
        assert!(proxy_list_to_links("- just\n- a list\n").is_err());
    }

    #[test]
    fn test_round_trip_through_document() {
        let text = "hy2://pw@1.1.1.1:443?sni=a.example#a\n\
                    hy2://pw@2.2.2.2:443?sni=b.example&insecure=1#b\n";
        let yaml = links_to_proxy_list(text).to_yaml().unwrap();
        let report = proxy_list_to_links(&yaml).unwrap();
        assert_eq!(report.links.join("\n") + "\n", text);
        assert!(report.warnings.is_empty());
    }
}
