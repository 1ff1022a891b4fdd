use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::ast::{Definition, PermissionExpr, SchemaAst};
use super::infer::{CallStack, InferenceEngine};

/// A `type#member` node in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub type_name: String,
    pub member: String,
}

impl MemberRef {
    pub fn new(type_name: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            member: member.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.member)
    }
}

/// Dependency graph over permission expressions: one node per permission,
/// edges to every member a permission's expression refers to. Arrow edges
/// cross definitions, resolved through the inference engine. Built once per
/// analysis and discarded after cycle detection.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: IndexMap<MemberRef, IndexSet<MemberRef>>,
}

impl DependencyGraph {
    pub fn build(ast: &SchemaAst, engine: &InferenceEngine<'_>) -> Self {
        let mut graph = Self::default();
        for definition in &ast.definitions {
            if let Definition::ObjectType(t) = definition {
                for permission in &t.permissions {
                    let node = MemberRef::new(&t.name, &permission.name);
                    graph.edges.entry(node.clone()).or_default();
                    graph.add_expression_edges(&node, &t.name, &permission.expr, engine);
                }
            }
        }
        graph
    }

    fn add_edge(&mut self, from: &MemberRef, to: MemberRef) {
        self.edges.entry(from.clone()).or_default().insert(to);
    }

    fn add_expression_edges(
        &mut self,
        node: &MemberRef,
        definition: &str,
        expr: &PermissionExpr,
        engine: &InferenceEngine<'_>,
    ) {
        match expr {
            PermissionExpr::Identifier(name) => {
                self.add_edge(node, MemberRef::new(definition, name));
            }
            PermissionExpr::Union(operands) | PermissionExpr::Intersection(operands) => {
                for operand in operands {
                    self.add_expression_edges(node, definition, operand, engine);
                }
            }
            PermissionExpr::Exclusion(base, excluded) => {
                self.add_expression_edges(node, definition, base, engine);
                self.add_expression_edges(node, definition, excluded, engine);
            }
            PermissionExpr::Arrow(left, target)
            | PermissionExpr::Any(left, target)
            | PermissionExpr::All(left, target) => {
                if let Some(types) = engine.infer_expression(definition, left, &CallStack::new())
                {
                    for subject_type in &types {
                        self.add_edge(node, MemberRef::new(&subject_type.type_name, target));
                    }
                }
                self.add_expression_edges(node, definition, left, engine);
            }
        }
    }

    /// Depth-first cycle detection. Each detected cycle path runs from its
    /// first on-path occurrence to the revisited node inclusive, so a
    /// permission referring directly to itself appears as the two-element
    /// path `[P, P]` and is exempt: direct self-reference models
    /// hierarchies that legitimately fold back onto the same member.
    /// Longer self-returning paths are always reported.
    pub fn cycles(&self) -> Vec<Vec<MemberRef>> {
        let mut completed: IndexSet<MemberRef> = IndexSet::new();
        let mut found = Vec::new();
        for node in self.edges.keys() {
            if !completed.contains(node) {
                self.visit(node, &[], &mut completed, &mut found);
            }
        }
        found
    }

    fn visit(
        &self,
        node: &MemberRef,
        path: &[MemberRef],
        completed: &mut IndexSet<MemberRef>,
        found: &mut Vec<Vec<MemberRef>>,
    ) {
        if let Some(start) = path.iter().position(|n| n == node) {
            let mut cycle: Vec<MemberRef> = path[start..].to_vec();
            cycle.push(node.clone());
            let direct_self_reference = cycle.len() == 2 && cycle[0] == cycle[1];
            if !direct_self_reference {
                found.push(cycle);
            }
            return;
        }
        if completed.contains(node) {
            return;
        }

        let mut extended = path.to_vec();
        extended.push(node.clone());
        if let Some(dependencies) = self.edges.get(node) {
            for dependency in dependencies {
                self.visit(dependency, &extended, completed, found);
            }
        }
        completed.insert(node.clone());
    }
}
