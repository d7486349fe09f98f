//! Composite identifiers for resources without a single native vendor ID
//!
//! Child objects are addressed as `<parent>/<child>` (a rule inside a policy,
//! a route inside a route table) and triply-nested objects as
//! `<parent>/<tag>/<child>`.

use std::fmt;

use thiserror::Error;

const SEPARATOR: char = '/';

/// Expected layout of an import identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdShape {
    Simple,
    Nested,
    Typed,
}

impl IdShape {
    fn describe(self) -> &'static str {
        match self {
            IdShape::Simple => "<id>",
            IdShape::Nested => "<parent_id>/<child_id>",
            IdShape::Typed => "<parent_id>/<type>/<child_id>",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,

    #[error("invalid identifier '{input}', expected {expected}")]
    WrongShape {
        input: String,
        expected: &'static str,
    },
}

/// Cloud identifier of a managed object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Simple(String),
    Nested {
        parent: String,
        child: String,
    },
    Typed {
        parent: String,
        tag: String,
        child: String,
    },
}

impl Identifier {
    pub fn nested(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Identifier::Nested {
            parent: parent.into(),
            child: child.into(),
        }
    }

    pub fn typed(
        parent: impl Into<String>,
        tag: impl Into<String>,
        child: impl Into<String>,
    ) -> Self {
        Identifier::Typed {
            parent: parent.into(),
            tag: tag.into(),
            child: child.into(),
        }
    }

    /// Parse an identifier, requiring the given shape
    pub fn parse(input: &str, shape: IdShape) -> Result<Self, IdentifierError> {
        if input.trim().is_empty() {
            return Err(IdentifierError::Empty);
        }
        let parts: Vec<&str> = input.split(SEPARATOR).collect();
        let wrong_shape = || IdentifierError::WrongShape {
            input: input.to_string(),
            expected: shape.describe(),
        };
        if parts.iter().any(|p| p.is_empty()) {
            return Err(wrong_shape());
        }
        match (shape, parts.as_slice()) {
            (IdShape::Simple, [id]) => Ok(Identifier::Simple(id.to_string())),
            (IdShape::Nested, [parent, child]) => Ok(Identifier::nested(*parent, *child)),
            (IdShape::Typed, [parent, tag, child]) => Ok(Identifier::typed(*parent, *tag, *child)),
            _ => Err(wrong_shape()),
        }
    }

    pub fn shape(&self) -> IdShape {
        match self {
            Identifier::Simple(_) => IdShape::Simple,
            Identifier::Nested { .. } => IdShape::Nested,
            Identifier::Typed { .. } => IdShape::Typed,
        }
    }

    /// Owning object, for nested and typed identifiers
    pub fn parent(&self) -> Option<&str> {
        match self {
            Identifier::Simple(_) => None,
            Identifier::Nested { parent, .. } | Identifier::Typed { parent, .. } => Some(parent),
        }
    }

    /// Innermost object id
    pub fn child(&self) -> &str {
        match self {
            Identifier::Simple(id) => id,
            Identifier::Nested { child, .. } | Identifier::Typed { child, .. } => child,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Identifier::Typed { tag, .. } => Some(tag),
            _ => None,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Simple(id) => write!(f, "{}", id),
            Identifier::Nested { parent, child } => write!(f, "{}{}{}", parent, SEPARATOR, child),
            Identifier::Typed { parent, tag, child } => {
                write!(f, "{}{sep}{}{sep}{}", parent, tag, child, sep = SEPARATOR)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nested() {
        let id = Identifier::parse("policy-1/rule-9", IdShape::Nested).unwrap();
        assert_eq!(id.parent(), Some("policy-1"));
        assert_eq!(id.child(), "rule-9");
        assert_eq!(id.to_string(), "policy-1/rule-9");
    }

    #[test]
    fn parse_typed() {
        let id = Identifier::parse("fip/server/10.0.0.5", IdShape::Typed).unwrap();
        assert_eq!(id.tag(), Some("server"));
        assert_eq!(id.child(), "10.0.0.5");
        assert_eq!(id.shape(), IdShape::Typed);
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let err = Identifier::parse("only-one", IdShape::Nested).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid identifier 'only-one', expected <parent_id>/<child_id>"
        );
        assert!(Identifier::parse("a//b", IdShape::Typed).is_err());
        assert_eq!(Identifier::parse(" ", IdShape::Simple), Err(IdentifierError::Empty));
    }
}
