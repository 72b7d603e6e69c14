use serde::{Deserialize, Serialize};

/// Identity of a relay tunnel (spec.md §3). Immutable once constructed.
///
/// The two tokens scope capabilities independently: `connect_token`
/// permits data-plane traffic, `manage_ports_token` permits control-plane
/// port CRUD. Neither token is ever logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelDescriptor {
    pub tunnel_id: String,
    pub cluster_id: String,
    pub domain: String,
    pub service_uri: String,
    pub connect_token: String,
    pub manage_ports_token: String,
}

/// Protocol of a forwarded port. Only `Http` is exercised by this spec's
/// callers, but the type mirrors the relay's own multi-protocol schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Http,
    Https,
}

/// Tags classifying a forwarded port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PortTag {
    InternalPort,
    UserForwardedPort,
}

impl PortTag {
    fn eq_ignore_case(&self, other: &str) -> bool {
        let name = match self {
            PortTag::InternalPort => "InternalPort",
            PortTag::UserForwardedPort => "UserForwardedPort",
        };
        name.eq_ignore_ascii_case(other)
    }
}

/// Access-control-entry type, as understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessControlEntryType {
    Anonymous,
    Organization,
}

/// A single ACL entry on a tunnel port (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    #[serde(rename = "type")]
    pub entry_type: AccessControlEntryType,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, rename = "isDeny")]
    pub is_deny: bool,
}

/// A port published through the relay (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelPort {
    pub port_number: u16,
    pub protocol: PortProtocol,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "accessControlEntries")]
    pub access_control_entries: Vec<AccessControlEntry>,
}

impl TunnelPort {
    fn has_tag(&self, tag: PortTag) -> bool {
        self.tags.iter().any(|t| tag.eq_ignore_case(t))
    }

    /// `IsInternalPort` (spec.md §4.4): any tag case-insensitively equal to
    /// `InternalPort`. If both `InternalPort` and `UserForwardedPort` are
    /// present (stale remote state) this still returns `true` — the safer
    /// of the two classifications wins.
    pub fn is_internal(&self) -> bool {
        self.has_tag(PortTag::InternalPort)
    }
}

/// In-memory handle to a tunnel after its metadata has been fetched
/// (spec.md §3). Lifetime: created at connection build, destroyed at close.
#[derive(Debug, Clone)]
pub struct Tunnel {
    pub descriptor: TunnelDescriptor,
    pub ports: Vec<TunnelPort>,
}

impl Tunnel {
    pub fn new(descriptor: TunnelDescriptor) -> Self {
        Self {
            descriptor,
            ports: Vec::new(),
        }
    }
}
