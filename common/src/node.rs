use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of node kinds making up the metadata tree.
///
/// The kind decides which child-loading routine applies to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    Server,
    Database,
    Procedure,
    Parameter,
    Domain,
    PrivilegeHolder,
}

impl NodeKind {
    /// Catalog type name, as used in generated statements and labels.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Root => "ROOT",
            NodeKind::Server => "SERVER",
            NodeKind::Database => "DATABASE",
            NodeKind::Procedure => "PROCEDURE",
            NodeKind::Parameter => "PARAMETER",
            NodeKind::Domain => "DOMAIN",
            NodeKind::PrivilegeHolder => "PRIVILEGE",
        }
    }

    /// Whether nodes of this kind load their children from a remote catalog
    /// rather than from the local registry.
    pub fn is_catalog_backed(&self) -> bool {
        matches!(
            self,
            NodeKind::Database | NodeKind::Procedure | NodeKind::Domain
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}
