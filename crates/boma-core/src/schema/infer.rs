use indexmap::IndexSet;

use super::ast::{PermissionExpr, SubjectTypeRef};
use super::graph::MemberRef;
use super::symbols::SymbolTable;

/// Resolution depth bound for hostile inputs; the call stack is the cycle
/// guard, the cap only stops pathological arrow chains.
pub const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 32;

/// The `type#member` frames currently being resolved. Extended by value on
/// every recursive step, so no cleanup is needed on the way back out and a
/// frame can never leak between sibling branches.
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    frames: Vec<MemberRef>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, frame: &MemberRef) -> bool {
        self.frames.iter().any(|f| f == frame)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn pushed(&self, frame: MemberRef) -> Self {
        let mut frames = self.frames.clone();
        frames.push(frame);
        Self { frames }
    }
}

/// Computes the set of subject types reachable through a permission
/// expression. `None` means the expression (or a required part of it) could
/// not be resolved: an unknown member, a cycle, or the depth cap. Reporting
/// errors for those is the analyzer's job, not the engine's.
pub struct InferenceEngine<'a> {
    symbols: &'a SymbolTable,
    max_depth: usize,
}

impl<'a> InferenceEngine<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols,
            max_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
        }
    }

    pub fn with_max_depth(symbols: &'a SymbolTable, max_depth: usize) -> Self {
        Self { symbols, max_depth }
    }

    pub fn infer_expression(
        &self,
        definition: &str,
        expr: &PermissionExpr,
        stack: &CallStack,
    ) -> Option<Vec<SubjectTypeRef>> {
        match expr {
            PermissionExpr::Identifier(name) => self.resolve_member(definition, name, stack),
            PermissionExpr::Union(operands) => union_parts(
                operands
                    .iter()
                    .map(|operand| self.infer_expression(definition, operand, stack))
                    .collect(),
            ),
            PermissionExpr::Intersection(operands) => {
                let mut resolved = Vec::with_capacity(operands.len());
                for operand in operands {
                    resolved.push(self.infer_expression(definition, operand, stack)?);
                }
                Some(intersect(resolved))
            }
            PermissionExpr::Exclusion(base, _excluded) => {
                self.infer_expression(definition, base, stack)
            }
            PermissionExpr::Arrow(left, target)
            | PermissionExpr::Any(left, target)
            | PermissionExpr::All(left, target) => {
                let left_types = self.infer_expression(definition, left, stack)?;
                union_parts(
                    left_types
                        .iter()
                        .map(|subject_type| {
                            self.resolve_member(&subject_type.type_name, target, stack)
                        })
                        .collect(),
                )
            }
        }
    }

    /// Resolve a relation or permission named on a type to its subject
    /// types. Relations expand their declared list, splicing sub-relation
    /// references (`group#member`) in transparently; permissions recurse
    /// into their expression.
    pub fn resolve_member(
        &self,
        type_name: &str,
        member: &str,
        stack: &CallStack,
    ) -> Option<Vec<SubjectTypeRef>> {
        let frame = MemberRef::new(type_name, member);
        if stack.contains(&frame) || stack.depth() >= self.max_depth {
            return None;
        }

        if let Some(relation) = self.symbols.get_relation(type_name, member) {
            let next = stack.pushed(frame);
            let parts = relation
                .subject_types
                .iter()
                .map(|subject| match &subject.relation {
                    Some(sub) => self.resolve_member(&subject.type_name, sub, &next),
                    None => Some(vec![subject.clone()]),
                })
                .collect();
            return union_parts(parts);
        }

        if let Some(permission) = self.symbols.get_permission(type_name, member) {
            let next = stack.pushed(frame);
            return self.infer_expression(type_name, &permission.expr, &next);
        }

        None
    }
}

/// Union semantics: failed parts are skipped; `None` only when every part
/// failed. A union of zero parts is the empty list, not a failure.
fn union_parts(parts: Vec<Option<Vec<SubjectTypeRef>>>) -> Option<Vec<SubjectTypeRef>> {
    if !parts.is_empty() && parts.iter().all(Option::is_none) {
        return None;
    }
    Some(dedup(parts.into_iter().flatten().flatten().collect()))
}

/// Deduplicate by the composite key (type name, wildcard, sub-relation),
/// which is exactly the `Display` rendering. First occurrence wins the
/// position.
fn dedup(types: Vec<SubjectTypeRef>) -> Vec<SubjectTypeRef> {
    let mut seen: IndexSet<String> = IndexSet::new();
    let mut out = Vec::new();
    for subject_type in types {
        if seen.insert(subject_type.to_string()) {
            out.push(subject_type);
        }
    }
    out
}

fn intersect(mut sets: Vec<Vec<SubjectTypeRef>>) -> Vec<SubjectTypeRef> {
    if sets.is_empty() {
        return Vec::new();
    }
    let first = sets.remove(0);
    let rest: Vec<IndexSet<String>> = sets
        .iter()
        .map(|set| set.iter().map(ToString::to_string).collect())
        .collect();
    dedup(
        first
            .into_iter()
            .filter(|subject_type| {
                let key = subject_type.to_string();
                rest.iter().all(|keys| keys.contains(&key))
            })
            .collect(),
    )
}
