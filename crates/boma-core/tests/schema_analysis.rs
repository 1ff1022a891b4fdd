//! End-to-end coverage: parse schema text, analyze it, and check the
//! diagnostics and the annotated output together.

use boma_core::schema::analyzer::DiagnosticCode;
use boma_core::schema::ast::SubjectTypeRef;
use boma_core::schema::{analyze, parse_schema, AnalysisResult, ParseError};

fn run(input: &str) -> AnalysisResult {
    analyze(&parse_schema(input).expect("schema should parse"))
}

fn error_codes(result: &AnalysisResult) -> Vec<DiagnosticCode> {
    result.errors.iter().map(|e| e.code).collect()
}

fn inferred(result: &AnalysisResult, type_name: &str, permission: &str) -> Option<Vec<SubjectTypeRef>> {
    result
        .augmented
        .as_ref()
        .expect("augmented AST should be present")
        .get_object_type(type_name)
        .expect("object type should exist")
        .get_permission(permission)
        .expect("permission should exist")
        .inferred_subject_types
        .clone()
}

#[test]
fn minimal_valid_schema_round_trip() {
    let result = run(
        "definition user {} definition document { relation viewer: user permission view = viewer }",
    );

    assert!(result.is_valid);
    assert!(result.errors.is_empty());
    assert_eq!(
        inferred(&result, "document", "view"),
        Some(vec![SubjectTypeRef::direct("user")])
    );
}

#[test]
fn undefined_identifier_withholds_augmentation() {
    let result = run(
        "definition user {} definition document { relation viewer: user permission view = owner }",
    );

    assert!(!result.is_valid);
    assert_eq!(error_codes(&result), vec![DiagnosticCode::UndefinedIdentifier]);
    assert!(result.augmented.is_none());
    // The symbol table still comes back.
    assert!(result.symbols.has_definition("document"));
}

#[test]
fn mutual_recursion_is_exactly_one_cycle_error() {
    let result = run("definition node { permission p1 = p2 permission p2 = p1 }");

    assert_eq!(
        error_codes(&result),
        vec![DiagnosticCode::CircularDependency]
    );
    assert!(result.augmented.is_none());
}

#[test]
fn wildcard_warns_and_annotates() {
    let result = run(
        "definition user {} definition document { relation viewer: user:* permission view = viewer }",
    );

    assert!(result.is_valid);
    let wildcard_warnings: Vec<_> = result
        .warnings
        .iter()
        .filter(|w| w.code == DiagnosticCode::WildcardUsage)
        .collect();
    assert_eq!(wildcard_warnings.len(), 1);
    assert_eq!(
        inferred(&result, "document", "view"),
        Some(vec![SubjectTypeRef::wildcard("user")])
    );
}

#[test]
fn sub_relation_subject_resolves_transparently() {
    let result = run(
        "definition user {} definition group { relation member: user } definition document { relation shared: group#member permission view = shared }",
    );

    assert!(result.is_valid);
    assert_eq!(
        inferred(&result, "document", "view"),
        Some(vec![SubjectTypeRef::direct("user")])
    );
}

#[test]
fn missing_arrow_target_nulls_inference_and_errors() {
    let result = run(
        "definition folder {} definition document { relation parent: folder permission view = parent->missing }",
    );

    assert!(!result.is_valid);
    assert_eq!(
        error_codes(&result),
        vec![DiagnosticCode::UndefinedArrowTarget]
    );
    assert!(result.augmented.is_none());
}

#[test]
fn each_fatal_code_withholds_augmentation() {
    let fatal_inputs = [
        "definition user {} definition user {}",
        "definition doc { relation owner: ghost }",
        "definition group {} definition doc { relation shared: group#member }",
        "definition user {} definition doc { relation viewer: user relation viewer: user }",
        "definition node { permission p1 = p2 permission p2 = p1 }",
        "definition doc { permission view = missing }",
        "definition folder {} definition doc { relation parent: folder permission view = parent->missing }",
    ];

    for input in fatal_inputs {
        let result = run(input);
        assert!(
            result.augmented.is_none(),
            "augmentation should be withheld for: {input}"
        );
        assert!(!result.is_valid);
    }
}

#[test]
fn warnings_do_not_affect_validity_or_augmentation() {
    let result = run(
        "definition user {} definition island {} definition document { relation viewer: user:* permission view = viewer }",
    );

    assert!(!result.warnings.is_empty());
    assert!(result.is_valid);
    assert!(result.augmented.is_some());
}

#[test]
fn inferred_types_have_no_duplicate_keys() {
    let result = run(
        "definition user {} definition doc { relation owner: user relation editor: user relation viewer: user permission all_of_them = owner + editor + viewer }",
    );

    let types = inferred(&result, "doc", "all_of_them").unwrap();
    let mut keys: Vec<String> = types.iter().map(ToString::to_string).collect();
    let before = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(before, keys.len());
    assert_eq!(types, vec![SubjectTypeRef::direct("user")]);
}

#[test]
fn intersection_inference_needs_every_operand() {
    let result = run(
        "definition user {} definition doc { relation a: user permission p = a & missing }",
    );

    // The failing operand is an error in its own right, so augmentation is
    // withheld; verify the strict-null contract through the engine instead.
    assert!(error_codes(&result).contains(&DiagnosticCode::UndefinedIdentifier));
    assert!(result.augmented.is_none());
}

#[test]
fn cross_definition_arrow_chain_annotates() {
    let result = run(
        r#"
        definition user {}

        definition group {
            relation member: user | group#member
        }

        definition folder {
            relation owner: user
            relation viewer: user | group#member
            permission view = owner + viewer
        }

        definition document {
            relation parent: folder
            relation editor: user
            permission edit = editor + parent->view
        }
        "#,
    );

    assert!(result.is_valid, "errors: {:?}", result.errors);
    assert_eq!(
        inferred(&result, "document", "edit"),
        Some(vec![SubjectTypeRef::direct("user")])
    );
}

#[test]
fn self_referential_hierarchy_is_legal() {
    let result = run(
        r#"
        definition user {}

        definition folder {
            relation parent: folder
            relation viewer: user
            permission view = viewer + parent->view
        }
        "#,
    );

    assert!(result.is_valid, "errors: {:?}", result.errors);
    assert_eq!(
        inferred(&result, "folder", "view"),
        Some(vec![SubjectTypeRef::direct("user")])
    );
}

#[test]
fn caveat_schema_analyzes_and_passes_through() {
    let result = run(
        r#"
        /** Gates access to a weekday. */
        caveat weekday(day int) {
            day == 5
        }

        definition user {}
        "#,
    );

    assert!(result.is_valid, "errors: {:?}", result.errors);
    assert!(result.augmented.is_some());
}

#[test]
fn caveat_validation_errors_are_not_fatal_for_usage() {
    let result = run(
        "caveat gate(x matrix) { y == 1 } definition user {} definition doc { relation viewer: user permission view = viewer }",
    );

    let codes = error_codes(&result);
    assert!(codes.contains(&DiagnosticCode::InvalidParameterType));
    assert!(codes.contains(&DiagnosticCode::UndefinedCaveatParameter));
    assert!(!result.is_valid);
    // Caveat problems do not poison permission typing.
    assert_eq!(
        inferred(&result, "doc", "view"),
        Some(vec![SubjectTypeRef::direct("user")])
    );
}

#[test]
fn analysis_is_deterministic_across_runs() {
    let input = r#"
        definition user {}
        definition group { relation member: user | group#member }
        definition doc {
            relation owner: ghost
            relation viewer: user | group#member
            permission view = viewer + missing + owner
        }
    "#;

    let first = run(input);
    let second = run(input);

    assert_eq!(first.errors, second.errors);
    assert_eq!(first.warnings, second.warnings);
    assert_eq!(first.augmented, second.augmented);
    assert_eq!(first.is_valid, second.is_valid);
}

#[test]
fn parse_failures_yield_no_ast() {
    assert!(matches!(
        parse_schema("definition user {"),
        Err(ParseError::Syntax { .. })
    ));
    assert!(matches!(
        parse_schema("definition user {} ~~~"),
        Err(ParseError::Lexical(_))
    ));
}

#[test]
fn doc_comments_survive_to_augmentation() {
    let result = run(
        r#"
        definition user {}

        /** Documents people can share. */
        definition document {
            relation viewer: user
            /** Read access. */
            permission view = viewer
        }
        "#,
    );

    let augmented = result.augmented.unwrap();
    let document = augmented.get_object_type("document").unwrap();
    assert_eq!(document.doc.as_deref(), Some("Documents people can share."));
    assert_eq!(
        document.get_permission("view").unwrap().doc.as_deref(),
        Some("Read access.")
    );
}
