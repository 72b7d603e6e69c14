use crate::acl::PortVisibility;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a codespace, as reported by the codespaces REST API.
/// Only `Available` is relevant to readiness; the rest exist so the
/// descriptor round-trips whatever the external collaborator hands us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CodespaceState {
    Available,
    Created,
    Starting,
    ShuttingDown,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelProperties {
    pub service_uri: String,
    pub tunnel_id: String,
    pub cluster_id: String,
    pub domain: String,
    pub connect_access_token: String,
    pub manage_ports_access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub session_token: String,
    #[serde(default)]
    pub relay_endpoint: String,
    #[serde(default)]
    pub relay_sas: String,
    #[serde(default)]
    pub host_public_keys: Vec<String>,
    pub tunnel_properties: TunnelProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConstraints {
    #[serde(default)]
    pub allowed_port_privacy_settings: Vec<String>,
}

/// Opaque record supplied by the external collaborator (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodespaceDescriptor {
    pub state: CodespaceState,
    pub connection: ConnectionInfo,
    #[serde(default)]
    pub runtime_constraints: RuntimeConstraints,
}

impl CodespaceDescriptor {
    /// A codespace is "connection-ready" iff `state == Available` AND the
    /// connection record's `session_id`, `session_token`, `relay_endpoint`,
    /// `relay_sas` are all non-empty (spec.md §6).
    pub fn is_connection_ready(&self) -> bool {
        self.state == CodespaceState::Available
            && !self.connection.session_id.is_empty()
            && !self.connection.session_token.is_empty()
            && !self.connection.relay_endpoint.is_empty()
            && !self.connection.relay_sas.is_empty()
    }

    /// Visibilities the codespace's owning organization permits, parsed
    /// from the runtime constraints. Unparseable entries are dropped
    /// rather than failing descriptor construction — an allow-list that
    /// can't parse one setting should still enforce the ones it can.
    pub fn allowed_port_visibilities(&self) -> Vec<PortVisibility> {
        self.runtime_constraints
            .allowed_port_privacy_settings
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_descriptor() -> CodespaceDescriptor {
        CodespaceDescriptor {
            state: CodespaceState::Available,
            connection: ConnectionInfo {
                session_id: "sess".into(),
                session_token: "token".into(),
                relay_endpoint: "wss://relay.example.com".into(),
                relay_sas: "sas".into(),
                host_public_keys: vec![],
                tunnel_properties: TunnelProperties {
                    service_uri: "https://global.rel.tunnels.api.visualstudio.com".into(),
                    tunnel_id: "tun".into(),
                    cluster_id: "usw2".into(),
                    domain: "tunnels.example.com".into(),
                    connect_access_token: "connect".into(),
                    manage_ports_access_token: "manage".into(),
                },
            },
            runtime_constraints: RuntimeConstraints {
                allowed_port_privacy_settings: vec!["private".into(), "public".into()],
            },
        }
    }

    #[test]
    fn ready_when_available_and_fully_populated() {
        assert!(ready_descriptor().is_connection_ready());
    }

    #[test]
    fn not_ready_when_state_is_not_available() {
        let mut d = ready_descriptor();
        d.state = CodespaceState::Starting;
        assert!(!d.is_connection_ready());
    }

    #[test]
    fn not_ready_when_session_token_missing() {
        let mut d = ready_descriptor();
        d.connection.session_token = String::new();
        assert!(!d.is_connection_ready());
    }

    #[test]
    fn allowed_visibilities_skips_unparseable_entries() {
        let mut d = ready_descriptor();
        d.runtime_constraints.allowed_port_privacy_settings = vec!["public".into(), "bogus".into()];
        assert_eq!(d.allowed_port_visibilities(), vec![PortVisibility::Public]);
    }
}
