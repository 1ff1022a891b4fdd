use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed schema: the ordered sequence of top-level definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaAst {
    pub definitions: Vec<Definition>,
}

impl SchemaAst {
    pub fn get_object_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.definitions.iter().find_map(|d| match d {
            Definition::ObjectType(t) if t.name == name => Some(t),
            _ => None,
        })
    }

    pub fn get_caveat(&self, name: &str) -> Option<&CaveatDef> {
        self.definitions.iter().find_map(|d| match d {
            Definition::Caveat(c) if c.name == name => Some(c),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Definition {
    ObjectType(TypeDefinition),
    Caveat(CaveatDef),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::ObjectType(t) => &t.name,
            Definition::Caveat(c) => &c.name,
        }
    }
}

/// An object type: directly-stored relations plus computed permissions.
/// Relation and permission names share one namespace within the definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    pub doc: Option<String>,
    pub relations: Vec<RelationDef>,
    pub permissions: Vec<PermissionDef>,
}

impl TypeDefinition {
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn get_permission(&self, name: &str) -> Option<&PermissionDef> {
        self.permissions.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub doc: Option<String>,
    pub subject_types: Vec<SubjectTypeRef>,
}

/// One accepted subject type of a relation. `wildcard` and `relation` are
/// mutually exclusive: `user:*` accepts every instance of `user`, while
/// `group#member` accepts the subjects of `member` on `group`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectTypeRef {
    pub type_name: String,
    pub wildcard: bool,
    pub relation: Option<String>,
}

impl SubjectTypeRef {
    pub fn direct(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            wildcard: false,
            relation: None,
        }
    }

    pub fn wildcard(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            wildcard: true,
            relation: None,
        }
    }

    pub fn with_relation(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            wildcard: false,
            relation: Some(relation.into()),
        }
    }
}

impl fmt::Display for SubjectTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)?;
        if self.wildcard {
            write!(f, ":*")?;
        }
        if let Some(ref rel) = self.relation {
            write!(f, "#{rel}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDef {
    pub name: String,
    pub doc: Option<String>,
    pub expr: PermissionExpr,
}

/// A set-algebraic permission expression. `Union` and `Intersection` hold
/// two or more operands; a single operand is never wrapped. The arrow family
/// traverses from the subject types of the left side to a member named on
/// each of those types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionExpr {
    Identifier(String),
    Union(Vec<PermissionExpr>),
    Intersection(Vec<PermissionExpr>),
    Exclusion(Box<PermissionExpr>, Box<PermissionExpr>),
    Arrow(Box<PermissionExpr>, String),
    Any(Box<PermissionExpr>, String),
    All(Box<PermissionExpr>, String),
}

impl PermissionExpr {
    fn precedence(&self) -> u8 {
        match self {
            PermissionExpr::Union(_) => 0,
            PermissionExpr::Intersection(_) => 1,
            PermissionExpr::Exclusion(..) => 2,
            PermissionExpr::Arrow(..) | PermissionExpr::Any(..) | PermissionExpr::All(..) => 3,
            PermissionExpr::Identifier(_) => 4,
        }
    }

    fn fmt_operand(&self, parent: u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.precedence() < parent {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for PermissionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionExpr::Identifier(name) => write!(f, "{name}"),
            PermissionExpr::Union(operands) => {
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    operand.fmt_operand(1, f)?;
                }
                Ok(())
            }
            PermissionExpr::Intersection(operands) => {
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    operand.fmt_operand(2, f)?;
                }
                Ok(())
            }
            PermissionExpr::Exclusion(base, excluded) => {
                base.fmt_operand(2, f)?;
                write!(f, " - ")?;
                excluded.fmt_operand(3, f)
            }
            PermissionExpr::Arrow(left, target) => {
                left.fmt_operand(3, f)?;
                write!(f, "->{target}")
            }
            PermissionExpr::Any(left, target) => {
                left.fmt_operand(3, f)?;
                write!(f, ".any({target})")
            }
            PermissionExpr::All(left, target) => {
                left.fmt_operand(3, f)?;
                write!(f, ".all({target})")
            }
        }
    }
}

/// A named, parameterized condition. Only structurally validated here; the
/// expression is a single equality between a parameter and an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatDef {
    pub name: String,
    pub doc: Option<String>,
    pub parameters: Vec<CaveatParam>,
    pub expression: CaveatExpr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatParam {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatExpr {
    pub parameter: String,
    pub value: i64,
}
