//! Containers: the declaration whose body is compared.

use serde::{Deserialize, Serialize};

use crate::constructs::VariableDeclaration;
use crate::fragment::{BodyArena, FragmentId};

/// A formal parameter of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// The enclosing declaration (method, lambda, initializer) whose body is
/// compared, with the signature metadata consumed by heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub annotations: Vec<String>,
    pub is_constructor: bool,
    /// Name of the declaring logical type, consumed by the `this`-parameter
    /// heuristics.
    pub type_name: String,
    pub body: BodyArena,
}

impl Container {
    /// Root composite of the body.
    pub fn root(&self) -> FragmentId {
        self.body.root()
    }

    /// Ordered leaves of the main body.
    pub fn leaves(&self) -> Vec<FragmentId> {
        self.body.leaves()
    }

    /// Ordered inner composites of the main body, root excluded.
    pub fn inner_nodes(&self) -> Vec<FragmentId> {
        self.body.inner_nodes()
    }

    /// Total statement count of the main body.
    pub fn statement_count(&self) -> usize {
        self.body.statement_count()
    }

    /// Content hash over the body's statement texts.
    pub fn body_hash(&self) -> String {
        self.body.content_hash()
    }

    /// Every variable declaration in the body, in document order.
    pub fn variable_declarations(&self) -> Vec<(FragmentId, &VariableDeclaration)> {
        let mut out = Vec::new();
        for fragment in self.body.iter() {
            for decl in &fragment.constructs.declarations {
                out.push((fragment.id, decl));
            }
        }
        out
    }

    /// Whether any parameter has the given name.
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }
}
