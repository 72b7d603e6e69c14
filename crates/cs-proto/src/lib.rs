//! Shared wire and data types for the codespace remote access core.
//!
//! This crate has no async runtime dependency of its own beyond what
//! `tonic`'s generated client/server code pulls in; it is the one crate
//! every other component in the workspace depends on.

pub mod acl;
pub mod descriptor;
pub mod error;
pub mod tunnel;

pub use acl::{access_control_entries_to_visibility, visibility_to_access_control_entries, PortVisibility};
pub use descriptor::{CodespaceDescriptor, CodespaceState, ConnectionInfo, RuntimeConstraints, TunnelProperties};
pub use error::{ErrorKind, HasErrorKind};
pub use tunnel::{
    AccessControlEntry, AccessControlEntryType, PortProtocol, PortTag, Tunnel, TunnelDescriptor,
    TunnelPort,
};

/// Well-known internal RPC port and session name (spec.md §6).
pub const INTERNAL_RPC_PORT: u16 = 16_634;
pub const INTERNAL_RPC_SESSION_NAME: &str = "CodespacesInternal";

/// Generated gRPC stubs for the codespace host control service.
pub mod rpc {
    tonic::include_proto!("codespace.rpc.v1");
}
