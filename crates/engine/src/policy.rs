//! Declarative policy file model.
//!
//! A policy names one provider, one sublayer and the full set of filters
//! that should live in that sublayer. Files may be TOML, YAML or JSON.

use std::{
    collections::HashSet,
    fmt,
    net::IpAddr,
    path::Path,
    str::FromStr,
};

use {
    ipnet::IpNet,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    uuid::Uuid,
};

use crate::error::{DomainError, ErrorCode};

/// Provider key used when the policy does not set one.
pub const DEFAULT_PROVIDER_KEY: Uuid = Uuid::from_u128(0x5c1f_9a3e_0d2b_4b8e_9e7a_57a2_1d0f_4e01);

/// Sublayer key used when the policy does not set one.
pub const DEFAULT_SUBLAYER_KEY: Uuid = Uuid::from_u128(0x5c1f_9a3e_0d2b_4b8e_9e7a_57a2_1d0f_4e02);

pub const MAX_FILTERS: usize = 10_000;

/// Root of a policy file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    #[serde(default)]
    pub provider: ProviderSpec,
    #[serde(default)]
    pub sublayer: SublayerSpec,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSpec {
    pub key: Uuid,
    pub name: String,
    pub description: Option<String>,
}

impl Default for ProviderSpec {
    fn default() -> Self {
        Self {
            key: DEFAULT_PROVIDER_KEY,
            name: "Warden".into(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SublayerSpec {
    pub key: Uuid,
    pub name: String,
    pub weight: u16,
}

impl Default for SublayerSpec {
    fn default() -> Self {
        Self {
            key: DEFAULT_SUBLAYER_KEY,
            name: "Warden rules".into(),
            weight: 0x100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Block,
    Permit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Any,
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    fn has_ports(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

/// A single filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    pub name: String,
    pub action: Action,
    pub direction: Direction,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<RemoteAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<PortRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<PortRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(default)]
    pub weight: u8,
}

/// An address or network. A bare address is treated as a host route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteAddress(pub IpNet);

impl FromStr for RemoteAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(Self(net));
        }
        s.parse::<IpAddr>()
            .map(|addr| Self(IpNet::from(addr)))
            .map_err(|_| format!("invalid address or network: {s:?}"))
    }
}

impl TryFrom<String> for RemoteAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RemoteAddress> for String {
    fn from(value: RemoteAddress) -> Self {
        value.0.to_string()
    }
}

/// Inclusive port range. A single port is `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PortRepr", into = "PortRepr")]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Single(u16),
    Range(String),
}

impl TryFrom<PortRepr> for PortRange {
    type Error = String;

    fn try_from(value: PortRepr) -> Result<Self, Self::Error> {
        match value {
            PortRepr::Single(port) => Ok(Self {
                start: port,
                end: port,
            }),
            PortRepr::Range(raw) => {
                let parse = |s: &str| {
                    s.trim()
                        .parse::<u16>()
                        .map_err(|_| format!("invalid port range: {raw:?}"))
                };
                match raw.split_once('-') {
                    Some((a, b)) => Ok(Self {
                        start: parse(a)?,
                        end: parse(b)?,
                    }),
                    None => {
                        let port = parse(&raw)?;
                        Ok(Self {
                            start: port,
                            end: port,
                        })
                    },
                }
            },
        }
    }
}

impl From<PortRange> for PortRepr {
    fn from(value: PortRange) -> Self {
        if value.start == value.end {
            Self::Single(value.start)
        } else {
            Self::Range(value.to_string())
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Supported on-disk encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFormat {
    Toml,
    Yaml,
    Json,
}

impl PolicyFormat {
    /// Pick a format from the file extension. Unknown extensions read as JSON.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::Toml,
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

impl Policy {
    /// Read, parse and validate the policy at `path`.
    pub fn load(path: &Path) -> Result<Self, DomainError> {
        let raw = std::fs::read_to_string(path).map_err(|e| read_error(path, &e))?;
        let policy = Self::parse(&raw, PolicyFormat::from_path(path))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Parse without validating.
    pub fn parse(raw: &str, format: PolicyFormat) -> Result<Self, DomainError> {
        let parsed = match format {
            PolicyFormat::Toml => toml::from_str(raw).map_err(|e| e.to_string()),
            PolicyFormat::Yaml => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
            PolicyFormat::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| DomainError::invalid_argument(format!("policy parse failed: {e}")))
    }

    /// Check semantic rules the type system cannot express.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.provider.name.trim().is_empty() {
            return Err(invalid("provider.name", "must not be empty"));
        }
        if self.sublayer.name.trim().is_empty() {
            return Err(invalid("sublayer.name", "must not be empty"));
        }
        if self.filters.len() > MAX_FILTERS {
            return Err(invalid(
                "filters",
                &format!("{} filters exceeds the limit of {MAX_FILTERS}", self.filters.len()),
            ));
        }

        let mut seen = HashSet::new();
        for (idx, filter) in self.filters.iter().enumerate() {
            let at = format!("filters[{idx}]");
            if filter.name.trim().is_empty() {
                return Err(invalid(&at, "name must not be empty"));
            }
            if !seen.insert(filter.name.as_str()) {
                return Err(invalid(&at, &format!("duplicate filter name {:?}", filter.name)));
            }
            for (field, range) in [
                ("remote_port", filter.remote_port),
                ("local_port", filter.local_port),
            ] {
                let Some(range) = range else { continue };
                if !filter.protocol.has_ports() {
                    return Err(invalid(&at, &format!("{field} requires protocol tcp or udp")));
                }
                if range.start == 0 || range.start > range.end {
                    return Err(invalid(&at, &format!("{field} {range} is not a valid range")));
                }
            }
            if filter
                .application
                .as_deref()
                .is_some_and(|app| app.trim().is_empty())
            {
                return Err(invalid(&at, "application must not be empty"));
            }
        }
        Ok(())
    }

    /// Stable SHA-256 fingerprint of the parsed policy.
    ///
    /// Formatting-only edits to the file produce the same fingerprint.
    pub fn fingerprint(&self) -> Result<String, DomainError> {
        let canonical = serde_json::to_vec(self).map_err(|e| {
            DomainError::invalid_argument(format!("policy could not be serialized: {e}"))
        })?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }
}

fn invalid(at: &str, message: &str) -> DomainError {
    DomainError::invalid_argument(format!("invalid policy: {at}: {message}"))
}

fn read_error(path: &Path, err: &std::io::Error) -> DomainError {
    let code = match err.kind() {
        std::io::ErrorKind::NotFound => ErrorCode::NotFound,
        std::io::ErrorKind::PermissionDenied => ErrorCode::AccessDenied,
        _ => ErrorCode::InvalidArgument,
    };
    let message = match code {
        ErrorCode::NotFound => format!("policy file not found: {}", path.display()),
        _ => format!("failed to read policy {}: {err}", path.display()),
    };
    DomainError::new(code, message)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE_TOML: &str = r#"
[provider]
name = "Corp"

[sublayer]
name = "Corp rules"
weight = 512

[[filters]]
name = "block telnet"
action = "block"
direction = "outbound"
protocol = "tcp"
remote_port = 23

[[filters]]
name = "allow lan"
action = "permit"
direction = "inbound"
remote_address = "10.0.0.0/8"

[[filters]]
name = "high ports"
action = "permit"
direction = "inbound"
protocol = "udp"
local_port = "49152-65535"
"#;

    #[test]
    fn parses_toml_policy() {
        let policy = Policy::parse(SAMPLE_TOML, PolicyFormat::Toml).unwrap();
        policy.validate().unwrap();
        assert_eq!(policy.provider.name, "Corp");
        assert_eq!(policy.provider.key, DEFAULT_PROVIDER_KEY);
        assert_eq!(policy.sublayer.weight, 512);
        assert_eq!(policy.filters.len(), 3);
        assert_eq!(policy.filters[0].remote_port, Some(PortRange { start: 23, end: 23 }));
        assert_eq!(policy.filters[1].protocol, Protocol::Any);
        assert_eq!(
            policy.filters[2].local_port,
            Some(PortRange {
                start: 49152,
                end: 65535
            })
        );
    }

    #[test]
    fn parses_json_and_yaml() {
        let json = r#"{"filters":[{"name":"a","action":"block","direction":"inbound","remote_address":"192.168.1.5"}]}"#;
        let policy = Policy::parse(json, PolicyFormat::Json).unwrap();
        let addr = policy.filters[0].remote_address.unwrap();
        assert_eq!(addr.0.to_string(), "192.168.1.5/32");

        let yaml = "filters:\n  - name: b\n    action: permit\n    direction: outbound\n    protocol: icmp\n";
        let policy = Policy::parse(yaml, PolicyFormat::Yaml).unwrap();
        assert_eq!(policy.filters[0].protocol, Protocol::Icmp);
        assert_eq!(policy.sublayer, SublayerSpec::default());
    }

    #[test]
    fn parse_failure_is_invalid_argument() {
        let err = Policy::parse("filters = [", PolicyFormat::Toml).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.message().starts_with("policy parse failed"));

        let err = Policy::parse(r#"{"bogus": 1}"#, PolicyFormat::Json).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn rejects_bad_address() {
        let json = r#"{"filters":[{"name":"a","action":"block","direction":"inbound","remote_address":"not-an-ip"}]}"#;
        assert!(Policy::parse(json, PolicyFormat::Json).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let mut policy = Policy::parse(SAMPLE_TOML, PolicyFormat::Toml).unwrap();
        policy.filters[1].name = "block telnet".into();
        let err = policy.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.message().contains("duplicate filter name"));
    }

    #[test]
    fn validate_rejects_ports_without_transport() {
        let mut policy = Policy::parse(SAMPLE_TOML, PolicyFormat::Toml).unwrap();
        policy.filters[0].protocol = Protocol::Icmp;
        let err = policy.validate().unwrap_err();
        assert!(err.message().contains("requires protocol tcp or udp"));
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let mut policy = Policy::parse(SAMPLE_TOML, PolicyFormat::Toml).unwrap();
        policy.filters[2].local_port = Some(PortRange {
            start: 2000,
            end: 1000,
        });
        assert!(policy.validate().is_err());
    }

    #[test]
    fn fingerprint_ignores_formatting() {
        let a = Policy::parse(SAMPLE_TOML, PolicyFormat::Toml).unwrap();
        let reformatted = SAMPLE_TOML.replace("\n\n", "\n\n# comment\n");
        let b = Policy::parse(&reformatted, PolicyFormat::Toml).unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let mut c = a.clone();
        c.filters.pop();
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn load_reports_missing_file_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Policy::load(&dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(err.message().contains("policy file not found"));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(PolicyFormat::from_path(Path::new("p.toml")), PolicyFormat::Toml);
        assert_eq!(PolicyFormat::from_path(Path::new("p.yml")), PolicyFormat::Yaml);
        assert_eq!(PolicyFormat::from_path(Path::new("p.json")), PolicyFormat::Json);
        assert_eq!(PolicyFormat::from_path(Path::new("policy")), PolicyFormat::Json);
    }
}
