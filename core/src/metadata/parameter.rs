use std::fmt;

use common::ident::Identifier;
use common::node::NodeKind;
use common::value::Row;
use serde::Serialize;

use crate::engine::children::ChildNode;
use crate::engine::lock::Lockable;
use crate::engine::subject::Subject;
use crate::metadata::visitor::MetadataVisitor;
use crate::metadata::{MetadataNode, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterDirection {
    Input,
    Output,
}

impl ParameterDirection {
    /// Maps `rdb$parameter_type`: 1 is an output parameter, anything else input.
    pub fn from_catalog(value: Option<i64>) -> Self {
        match value {
            Some(1) => ParameterDirection::Output,
            _ => ParameterDirection::Input,
        }
    }
}

/// How a parameter takes its type from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterMechanism {
    /// Typed by the source domain.
    Value,
    /// `TYPE OF` the source domain.
    TypeOf,
    /// Catalog too old to say.
    Unspecified,
}

impl ParameterMechanism {
    pub fn from_catalog(value: Option<i64>) -> Self {
        match value {
            Some(0) => ParameterMechanism::Value,
            Some(1) => ParameterMechanism::TypeOf,
            _ => ParameterMechanism::Unspecified,
        }
    }
}

/// One input or output parameter of a stored procedure.
pub struct Parameter {
    subject: Subject,
    source: Identifier,
    direction: ParameterDirection,
    mechanism: ParameterMechanism,
    default_source: Option<String>,
}

impl Parameter {
    pub fn new(
        name: Identifier,
        source: Identifier,
        direction: ParameterDirection,
        mechanism: ParameterMechanism,
        default_source: Option<String>,
    ) -> Self {
        Self {
            subject: Subject::new(NodeKind::Parameter, name),
            source,
            direction,
            mechanism,
            default_source,
        }
    }

    /// Builds a parameter from a row of the procedure parameter query:
    /// name, field source, parameter type, default source, mechanism.
    pub fn from_row(row: &Row) -> Self {
        let default_source = match row.text(3).trim() {
            "" => None,
            text => Some(text.to_owned()),
        };
        let mechanism = match row.integer(4) {
            Some(-1) | None => ParameterMechanism::Unspecified,
            other => ParameterMechanism::from_catalog(other),
        };
        Self::new(
            row.identifier(0),
            row.identifier(1),
            ParameterDirection::from_catalog(row.integer(2)),
            mechanism,
            default_source,
        )
    }

    /// Name of the domain the parameter is declared with.
    pub fn source(&self) -> &Identifier {
        &self.source
    }

    pub fn direction(&self) -> ParameterDirection {
        self.direction
    }

    pub fn is_output(&self) -> bool {
        self.direction == ParameterDirection::Output
    }

    pub fn mechanism(&self) -> ParameterMechanism {
        self.mechanism
    }

    /// Raw default clause as stored in the catalog, e.g. `DEFAULT 0`.
    pub fn default_source(&self) -> Option<&str> {
        self.default_source.as_deref()
    }

    /// Default expression without the leading `DEFAULT` or `=` keyword.
    pub fn default_value(&self) -> Option<&str> {
        let source = self.default_source.as_deref()?.trim_start();
        let keyword = source
            .get(..7)
            .is_some_and(|head| head.eq_ignore_ascii_case("default"));
        let rest = if keyword {
            source.get(7..).unwrap_or_default()
        } else if let Some(rest) = source.strip_prefix('=') {
            rest
        } else {
            source
        };
        Some(rest.trim())
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.subject.name() == other.subject.name()
            && self.source == other.source
            && self.direction == other.direction
            && self.mechanism == other.mechanism
            && self.default_source == other.default_source
    }
}

impl Lockable for Parameter {
    fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl ChildNode for Parameter {
    fn key(&self) -> Identifier {
        self.subject.name()
    }
}

impl MetadataNode for Parameter {
    fn loaded_children(&self) -> Vec<NodeRef> {
        Vec::new()
    }

    fn accept(&self, visitor: &mut dyn MetadataVisitor) {
        visitor.visit_parameter(self);
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.subject.name())
            .field("source", &self.source)
            .field("direction", &self.direction)
            .field("mechanism", &self.mechanism)
            .field("default_source", &self.default_source)
            .finish()
    }
}
