use crate::tunnel::{AccessControlEntry, AccessControlEntryType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Port visibility policy (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortVisibility {
    Private,
    Organization,
    Public,
}

impl fmt::Display for PortVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortVisibility::Private => "private",
            PortVisibility::Organization => "organization",
            PortVisibility::Public => "public",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PortVisibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(PortVisibility::Private),
            "organization" | "org" => Ok(PortVisibility::Organization),
            "public" => Ok(PortVisibility::Public),
            other => Err(format!("unknown port visibility: {other}")),
        }
    }
}

const GITHUB_PROVIDER: &str = "github";

/// Translates a visibility into the ACL entries the relay expects
/// (spec.md §6 table).
pub fn visibility_to_access_control_entries(visibility: PortVisibility) -> Vec<AccessControlEntry> {
    match visibility {
        PortVisibility::Private => vec![AccessControlEntry {
            entry_type: AccessControlEntryType::Organization,
            subjects: vec![],
            scopes: vec![],
            provider: Some(GITHUB_PROVIDER.to_string()),
            is_deny: true,
        }],
        PortVisibility::Organization => vec![AccessControlEntry {
            entry_type: AccessControlEntryType::Organization,
            subjects: vec!["1".to_string()],
            scopes: vec!["connect".to_string()],
            provider: Some(GITHUB_PROVIDER.to_string()),
            is_deny: false,
        }],
        PortVisibility::Public => vec![AccessControlEntry {
            entry_type: AccessControlEntryType::Anonymous,
            subjects: vec![],
            scopes: vec!["connect".to_string()],
            provider: None,
            is_deny: false,
        }],
    }
}

/// Reverse mapping for display (spec.md §6): any non-deny anonymous entry
/// wins over any non-deny organization+github entry, which wins over the
/// default of private. A port with no entries at all is private.
pub fn access_control_entries_to_visibility(entries: &[AccessControlEntry]) -> PortVisibility {
    let has_public = entries
        .iter()
        .any(|e| e.entry_type == AccessControlEntryType::Anonymous && !e.is_deny);
    if has_public {
        return PortVisibility::Public;
    }

    let has_org = entries.iter().any(|e| {
        e.entry_type == AccessControlEntryType::Organization
            && !e.is_deny
            && e.provider.as_deref() == Some(GITHUB_PROVIDER)
    });
    if has_org {
        return PortVisibility::Organization;
    }

    PortVisibility::Private
}
