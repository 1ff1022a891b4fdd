use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ast::{
    CaveatDef, Definition, PermissionDef, PermissionExpr, RelationDef, SchemaAst, SubjectTypeRef,
    TypeDefinition,
};
use super::graph::DependencyGraph;
use super::infer::{CallStack, InferenceEngine, DEFAULT_MAX_RESOLUTION_DEPTH};
use super::symbols::{SymbolKind, SymbolTable};

/// Parameter types a caveat may declare.
pub const CAVEAT_PARAMETER_TYPES: &[&str] = &[
    "int",
    "uint",
    "bool",
    "string",
    "double",
    "bytes",
    "duration",
    "timestamp",
    "ipaddress",
];

/// The conventional terminal subject type, exempt from the unused-definition
/// warning: it exists to be pointed at, not to point anywhere.
const TERMINAL_SUBJECT_TYPE: &str = "user";

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub max_resolution_depth: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    DuplicateDefinition,
    DuplicateMemberName,
    UndefinedType,
    UndefinedRelation,
    WildcardUsage,
    InvalidParameterType,
    UndefinedCaveatParameter,
    CircularDependency,
    UndefinedIdentifier,
    InvalidExpression,
    UndefinedArrowTarget,
    UnusedDefinition,
    EmptyPermission,
    AugmentationInternalError,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::DuplicateDefinition => "DUPLICATE_DEFINITION",
            DiagnosticCode::DuplicateMemberName => "DUPLICATE_MEMBER_NAME",
            DiagnosticCode::UndefinedType => "UNDEFINED_TYPE",
            DiagnosticCode::UndefinedRelation => "UNDEFINED_RELATION",
            DiagnosticCode::WildcardUsage => "WILDCARD_USAGE",
            DiagnosticCode::InvalidParameterType => "INVALID_PARAMETER_TYPE",
            DiagnosticCode::UndefinedCaveatParameter => "UNDEFINED_CAVEAT_PARAMETER",
            DiagnosticCode::CircularDependency => "CIRCULAR_DEPENDENCY",
            DiagnosticCode::UndefinedIdentifier => "UNDEFINED_IDENTIFIER",
            DiagnosticCode::InvalidExpression => "INVALID_EXPRESSION",
            DiagnosticCode::UndefinedArrowTarget => "UNDEFINED_ARROW_TARGET",
            DiagnosticCode::UnusedDefinition => "UNUSED_DEFINITION",
            DiagnosticCode::EmptyPermission => "EMPTY_PERMISSION",
            DiagnosticCode::AugmentationInternalError => "AUGMENTATION_INTERNAL_ERROR",
        }
    }

    /// Codes that make the augmented AST unsafe for downstream consumers:
    /// types inferred over a broken or cyclic graph cannot be trusted, so
    /// augmentation is withheld even though it was computed.
    pub fn is_fatal_for_usage(&self) -> bool {
        matches!(
            self,
            DiagnosticCode::DuplicateDefinition
                | DiagnosticCode::UndefinedType
                | DiagnosticCode::UndefinedRelation
                | DiagnosticCode::DuplicateMemberName
                | DiagnosticCode::CircularDependency
                | DiagnosticCode::UndefinedIdentifier
                | DiagnosticCode::UndefinedArrowTarget
                | DiagnosticCode::AugmentationInternalError
        )
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLocation {
    pub definition: Option<String>,
    pub relation: Option<String>,
    pub permission: Option<String>,
}

impl DiagnosticLocation {
    pub fn in_definition(definition: impl Into<String>) -> Self {
        Self {
            definition: Some(definition.into()),
            ..Self::default()
        }
    }

    pub fn in_relation(definition: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            definition: Some(definition.into()),
            relation: Some(relation.into()),
            permission: None,
        }
    }

    pub fn in_permission(definition: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            definition: Some(definition.into()),
            relation: None,
            permission: Some(permission.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticDiagnostic {
    pub code: DiagnosticCode,
    pub message: String,
    pub location: DiagnosticLocation,
}

impl fmt::Display for SemanticDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// The schema AST with every permission annotated by its inferred subject
/// types. This is the input contract of downstream SDK generation;
/// `inferred_subject_types: None` means the types are unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedSchemaAst {
    pub definitions: Vec<AugmentedDefinition>,
}

impl AugmentedSchemaAst {
    pub fn get_object_type(&self, name: &str) -> Option<&AugmentedTypeDefinition> {
        self.definitions.iter().find_map(|d| match d {
            AugmentedDefinition::ObjectType(t) if t.name == name => Some(t),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AugmentedDefinition {
    ObjectType(AugmentedTypeDefinition),
    Caveat(CaveatDef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedTypeDefinition {
    pub name: String,
    pub doc: Option<String>,
    pub relations: Vec<RelationDef>,
    pub permissions: Vec<AugmentedPermissionDef>,
}

impl AugmentedTypeDefinition {
    pub fn get_permission(&self, name: &str) -> Option<&AugmentedPermissionDef> {
        self.permissions.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedPermissionDef {
    pub name: String,
    pub doc: Option<String>,
    pub expr: PermissionExpr,
    pub inferred_subject_types: Option<Vec<SubjectTypeRef>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AugmentError {
    #[error("definition '{0}' missing from the symbol table during augmentation")]
    UnregisteredDefinition(String),
}

/// Result of analyzing one schema. The symbol table is always returned;
/// the augmented AST is withheld when any fatal-for-usage error occurred.
#[derive(Debug)]
pub struct AnalysisResult {
    pub augmented: Option<AugmentedSchemaAst>,
    pub symbols: SymbolTable,
    pub errors: Vec<SemanticDiagnostic>,
    pub warnings: Vec<SemanticDiagnostic>,
    pub is_valid: bool,
}

/// Analyze a schema with the default configuration.
pub fn analyze(ast: &SchemaAst) -> AnalysisResult {
    analyze_with_config(ast, &AnalyzerConfig::default())
}

/// Run the five analysis phases in order (symbol construction, definition
/// validation, cycle detection, expression validation, heuristics), then
/// attempt augmentation. All state is fresh per call; diagnostics accumulate
/// across phases instead of stopping at the first problem.
pub fn analyze_with_config(ast: &SchemaAst, config: &AnalyzerConfig) -> AnalysisResult {
    let mut analyzer = Analyzer {
        symbols: SymbolTable::new(),
        errors: Vec::new(),
        warnings: Vec::new(),
        max_depth: config.max_resolution_depth,
    };

    analyzer.build_symbols(ast);
    debug!(definitions = ast.definitions.len(), "symbol table built");
    analyzer.validate_definitions(ast);
    debug!(errors = analyzer.errors.len(), "definitions validated");
    analyzer.detect_cycles(ast);
    analyzer.validate_expressions(ast);
    debug!(errors = analyzer.errors.len(), "expressions validated");
    analyzer.heuristic_checks(ast);

    let augmented = match augment(ast, &analyzer.symbols, analyzer.max_depth) {
        Ok(augmented) => Some(augmented),
        Err(err) => {
            analyzer.error(
                DiagnosticCode::AugmentationInternalError,
                err.to_string(),
                DiagnosticLocation::default(),
            );
            None
        }
    };

    let fatal = analyzer
        .errors
        .iter()
        .any(|e| e.code.is_fatal_for_usage());
    let augmented = if fatal { None } else { augmented };

    let is_valid = analyzer.errors.is_empty();
    debug!(
        errors = analyzer.errors.len(),
        warnings = analyzer.warnings.len(),
        is_valid,
        "schema analysis complete"
    );

    AnalysisResult {
        augmented,
        symbols: analyzer.symbols,
        errors: analyzer.errors,
        warnings: analyzer.warnings,
        is_valid,
    }
}

struct Analyzer {
    symbols: SymbolTable,
    errors: Vec<SemanticDiagnostic>,
    warnings: Vec<SemanticDiagnostic>,
    max_depth: usize,
}

impl Analyzer {
    fn error(&mut self, code: DiagnosticCode, message: String, location: DiagnosticLocation) {
        self.errors.push(SemanticDiagnostic {
            code,
            message,
            location,
        });
    }

    fn warning(&mut self, code: DiagnosticCode, message: String, location: DiagnosticLocation) {
        self.warnings.push(SemanticDiagnostic {
            code,
            message,
            location,
        });
    }

    // Phase 1: register every definition; duplicates overwrite but are
    // reported.
    fn build_symbols(&mut self, ast: &SchemaAst) {
        for definition in &ast.definitions {
            let name = definition.name();
            if self.symbols.has_definition(name) {
                self.error(
                    DiagnosticCode::DuplicateDefinition,
                    format!("definition '{name}' is declared more than once"),
                    DiagnosticLocation::in_definition(name),
                );
            }
            self.symbols.add_definition(definition);
        }
    }

    // Phase 2: structural validation of every definition.
    fn validate_definitions(&mut self, ast: &SchemaAst) {
        for definition in &ast.definitions {
            match definition {
                Definition::ObjectType(t) => self.validate_object_type(t),
                Definition::Caveat(c) => self.validate_caveat(c),
            }
        }
    }

    fn validate_object_type(&mut self, t: &TypeDefinition) {
        let mut members: IndexSet<&str> = IndexSet::new();

        for relation in &t.relations {
            if !members.insert(&relation.name) {
                self.error(
                    DiagnosticCode::DuplicateMemberName,
                    format!(
                        "'{}' is declared more than once in definition '{}'",
                        relation.name, t.name
                    ),
                    DiagnosticLocation::in_relation(&t.name, &relation.name),
                );
            }
            for subject in &relation.subject_types {
                self.validate_subject_type(&t.name, relation, subject);
            }
        }

        for permission in &t.permissions {
            if !members.insert(&permission.name) {
                self.error(
                    DiagnosticCode::DuplicateMemberName,
                    format!(
                        "'{}' is declared more than once in definition '{}'",
                        permission.name, t.name
                    ),
                    DiagnosticLocation::in_permission(&t.name, &permission.name),
                );
            }
        }
    }

    fn validate_subject_type(
        &mut self,
        definition: &str,
        relation: &RelationDef,
        subject: &SubjectTypeRef,
    ) {
        let kind = self
            .symbols
            .get_definition(&subject.type_name)
            .map(|s| s.kind);
        match kind {
            None => {
                self.error(
                    DiagnosticCode::UndefinedType,
                    format!(
                        "relation '{}' references unknown type '{}'",
                        relation.name, subject.type_name
                    ),
                    DiagnosticLocation::in_relation(definition, &relation.name),
                );
            }
            Some(SymbolKind::Caveat) => {
                self.error(
                    DiagnosticCode::UndefinedType,
                    format!(
                        "relation '{}' references '{}', which is a caveat, not an object type",
                        relation.name, subject.type_name
                    ),
                    DiagnosticLocation::in_relation(definition, &relation.name),
                );
            }
            Some(SymbolKind::ObjectType) => {
                if let Some(sub) = &subject.relation {
                    if !self
                        .symbols
                        .has_relation_or_permission(&subject.type_name, sub)
                    {
                        self.error(
                            DiagnosticCode::UndefinedRelation,
                            format!(
                                "type '{}' has no relation or permission '{}'",
                                subject.type_name, sub
                            ),
                            DiagnosticLocation::in_relation(definition, &relation.name),
                        );
                    }
                }
            }
        }

        if subject.wildcard {
            self.warning(
                DiagnosticCode::WildcardUsage,
                format!(
                    "relation '{}' accepts every instance of '{}'",
                    relation.name, subject.type_name
                ),
                DiagnosticLocation::in_relation(definition, &relation.name),
            );
        }
    }

    fn validate_caveat(&mut self, caveat: &CaveatDef) {
        for parameter in &caveat.parameters {
            if !CAVEAT_PARAMETER_TYPES.contains(&parameter.type_name.as_str()) {
                self.error(
                    DiagnosticCode::InvalidParameterType,
                    format!(
                        "caveat parameter '{}' has unsupported type '{}'",
                        parameter.name, parameter.type_name
                    ),
                    DiagnosticLocation::in_definition(&caveat.name),
                );
            }
        }

        let expr_parameter = &caveat.expression.parameter;
        if !caveat
            .parameters
            .iter()
            .any(|p| &p.name == expr_parameter)
        {
            self.error(
                DiagnosticCode::UndefinedCaveatParameter,
                format!("caveat expression references undeclared parameter '{expr_parameter}'"),
                DiagnosticLocation::in_definition(&caveat.name),
            );
        }
    }

    // Phase 3: dependency cycles across permissions.
    fn detect_cycles(&mut self, ast: &SchemaAst) {
        let cycles = {
            let engine = InferenceEngine::with_max_depth(&self.symbols, self.max_depth);
            DependencyGraph::build(ast, &engine).cycles()
        };

        for cycle in cycles {
            let path = cycle
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
            let head = &cycle[0];
            self.error(
                DiagnosticCode::CircularDependency,
                format!("circular permission dependency: {path}"),
                DiagnosticLocation::in_permission(&head.type_name, &head.member),
            );
        }
    }

    // Phase 4: per-expression reference and arity validation.
    fn validate_expressions(&mut self, ast: &SchemaAst) {
        let mut diagnostics = Vec::new();
        {
            let engine = InferenceEngine::with_max_depth(&self.symbols, self.max_depth);
            for definition in &ast.definitions {
                if let Definition::ObjectType(t) = definition {
                    for permission in &t.permissions {
                        check_expression(
                            &self.symbols,
                            &engine,
                            &t.name,
                            &permission.name,
                            &permission.expr,
                            &mut diagnostics,
                        );
                    }
                }
            }
        }
        self.errors.extend(diagnostics);
    }

    // Phase 5: heuristic warnings.
    fn heuristic_checks(&mut self, ast: &SchemaAst) {
        let mut referenced: IndexSet<&str> = IndexSet::new();
        for definition in &ast.definitions {
            if let Definition::ObjectType(t) = definition {
                for relation in &t.relations {
                    for subject in &relation.subject_types {
                        referenced.insert(subject.type_name.as_str());
                    }
                }
            }
        }

        for definition in &ast.definitions {
            if let Definition::ObjectType(t) = definition {
                if t.name != TERMINAL_SUBJECT_TYPE && !referenced.contains(t.name.as_str()) {
                    self.warning(
                        DiagnosticCode::UnusedDefinition,
                        format!("definition '{}' is never used as a subject type", t.name),
                        DiagnosticLocation::in_definition(&t.name),
                    );
                }

                for permission in &t.permissions {
                    if permission_grants_nothing(permission) {
                        self.warning(
                            DiagnosticCode::EmptyPermission,
                            format!("permission '{}' has no granting mechanism", permission.name),
                            DiagnosticLocation::in_permission(&t.name, &permission.name),
                        );
                    }
                }
            }
        }
    }
}

// TODO: detect expressions whose inferred subject-type set is provably
// empty; needs emptiness propagation through exclusion and intersection.
// Until then this never fires.
fn permission_grants_nothing(_permission: &PermissionDef) -> bool {
    false
}

fn check_expression(
    symbols: &SymbolTable,
    engine: &InferenceEngine<'_>,
    definition: &str,
    permission: &str,
    expr: &PermissionExpr,
    diagnostics: &mut Vec<SemanticDiagnostic>,
) {
    match expr {
        PermissionExpr::Identifier(name) => {
            if !symbols.has_relation_or_permission(definition, name) {
                diagnostics.push(SemanticDiagnostic {
                    code: DiagnosticCode::UndefinedIdentifier,
                    message: format!(
                        "permission '{permission}' references unknown member '{name}'"
                    ),
                    location: DiagnosticLocation::in_permission(definition, permission),
                });
            }
        }
        PermissionExpr::Union(operands) | PermissionExpr::Intersection(operands) => {
            if operands.len() < 2 {
                let operator = match expr {
                    PermissionExpr::Union(_) => "union",
                    _ => "intersection",
                };
                diagnostics.push(SemanticDiagnostic {
                    code: DiagnosticCode::InvalidExpression,
                    message: format!(
                        "{operator} in permission '{permission}' requires at least two operands"
                    ),
                    location: DiagnosticLocation::in_permission(definition, permission),
                });
            }
            for operand in operands {
                check_expression(symbols, engine, definition, permission, operand, diagnostics);
            }
        }
        PermissionExpr::Exclusion(base, excluded) => {
            check_expression(symbols, engine, definition, permission, base, diagnostics);
            check_expression(
                symbols,
                engine,
                definition,
                permission,
                excluded,
                diagnostics,
            );
        }
        PermissionExpr::Arrow(left, target)
        | PermissionExpr::Any(left, target)
        | PermissionExpr::All(left, target) => {
            check_expression(symbols, engine, definition, permission, left, diagnostics);
            // A left side that failed to resolve was already diagnosed on
            // its own; only a resolved left side can host the target check.
            if let Some(types) = engine.infer_expression(definition, left, &CallStack::new()) {
                let found = types
                    .iter()
                    .any(|t| symbols.has_relation_or_permission(&t.type_name, target));
                if !found {
                    diagnostics.push(SemanticDiagnostic {
                        code: DiagnosticCode::UndefinedArrowTarget,
                        message: format!(
                            "no subject type of '{left}' provides a relation or permission '{target}'"
                        ),
                        location: DiagnosticLocation::in_permission(definition, permission),
                    });
                }
            }
        }
    }
}

/// Annotate every permission with its inferred subject types. Runs
/// unconditionally after the phases; the caller decides whether the result
/// may be exposed.
fn augment(
    ast: &SchemaAst,
    symbols: &SymbolTable,
    max_depth: usize,
) -> Result<AugmentedSchemaAst, AugmentError> {
    let engine = InferenceEngine::with_max_depth(symbols, max_depth);
    let mut definitions = Vec::with_capacity(ast.definitions.len());

    for definition in &ast.definitions {
        match definition {
            Definition::Caveat(c) => {
                definitions.push(AugmentedDefinition::Caveat(c.clone()));
            }
            Definition::ObjectType(t) => {
                if !symbols.has_definition(&t.name) {
                    return Err(AugmentError::UnregisteredDefinition(t.name.clone()));
                }
                let permissions = t
                    .permissions
                    .iter()
                    .map(|p| AugmentedPermissionDef {
                        name: p.name.clone(),
                        doc: p.doc.clone(),
                        expr: p.expr.clone(),
                        inferred_subject_types: engine.infer_expression(
                            &t.name,
                            &p.expr,
                            &CallStack::new(),
                        ),
                    })
                    .collect();
                definitions.push(AugmentedDefinition::ObjectType(AugmentedTypeDefinition {
                    name: t.name.clone(),
                    doc: t.doc.clone(),
                    relations: t.relations.clone(),
                    permissions,
                }));
            }
        }
    }

    Ok(AugmentedSchemaAst { definitions })
}
