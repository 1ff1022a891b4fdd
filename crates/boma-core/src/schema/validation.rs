use super::ast::{Definition, SchemaAst};

/// Size bounds enforced before a schema is accepted for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLimits {
    pub max_types: usize,
    pub max_relations_per_type: usize,
    pub max_permissions_per_type: usize,
    pub max_caveat_parameters: usize,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            max_types: 50,
            max_relations_per_type: 30,
            max_permissions_per_type: 30,
            max_caveat_parameters: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitsError {
    #[error("too many object types: {count} exceeds limit of {limit}")]
    TooManyTypes { count: usize, limit: usize },
    #[error("too many relations in type '{type_name}': {count} exceeds limit of {limit}")]
    TooManyRelations {
        type_name: String,
        count: usize,
        limit: usize,
    },
    #[error("too many permissions in type '{type_name}': {count} exceeds limit of {limit}")]
    TooManyPermissions {
        type_name: String,
        count: usize,
        limit: usize,
    },
    #[error("too many parameters in caveat '{caveat}': {count} exceeds limit of {limit}")]
    TooManyCaveatParameters {
        caveat: String,
        count: usize,
        limit: usize,
    },
}

/// Changes between two schema versions that can strand stored relationship
/// data. Permission edits are absent on purpose: permissions are computed,
/// nothing stored refers to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakingChange {
    TypeRemoved {
        type_name: String,
    },
    RelationRemoved {
        type_name: String,
        relation: String,
    },
    SubjectTypesChanged {
        type_name: String,
        relation: String,
    },
    CaveatRemoved {
        name: String,
    },
    CaveatParametersChanged {
        name: String,
    },
}

pub fn validate_schema_limits(
    ast: &SchemaAst,
    limits: &SchemaLimits,
) -> Result<(), Vec<LimitsError>> {
    let mut errors = Vec::new();

    let type_count = ast
        .definitions
        .iter()
        .filter(|d| matches!(d, Definition::ObjectType(_)))
        .count();
    if type_count > limits.max_types {
        errors.push(LimitsError::TooManyTypes {
            count: type_count,
            limit: limits.max_types,
        });
    }

    for definition in &ast.definitions {
        match definition {
            Definition::ObjectType(t) => {
                if t.relations.len() > limits.max_relations_per_type {
                    errors.push(LimitsError::TooManyRelations {
                        type_name: t.name.clone(),
                        count: t.relations.len(),
                        limit: limits.max_relations_per_type,
                    });
                }
                if t.permissions.len() > limits.max_permissions_per_type {
                    errors.push(LimitsError::TooManyPermissions {
                        type_name: t.name.clone(),
                        count: t.permissions.len(),
                        limit: limits.max_permissions_per_type,
                    });
                }
            }
            Definition::Caveat(c) => {
                if c.parameters.len() > limits.max_caveat_parameters {
                    errors.push(LimitsError::TooManyCaveatParameters {
                        caveat: c.name.clone(),
                        count: c.parameters.len(),
                        limit: limits.max_caveat_parameters,
                    });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn detect_breaking_changes(old: &SchemaAst, new: &SchemaAst) -> Vec<BreakingChange> {
    let mut changes = Vec::new();

    for definition in &old.definitions {
        match definition {
            Definition::ObjectType(old_type) => match new.get_object_type(&old_type.name) {
                None => {
                    changes.push(BreakingChange::TypeRemoved {
                        type_name: old_type.name.clone(),
                    });
                }
                Some(new_type) => {
                    for old_rel in &old_type.relations {
                        match new_type.get_relation(&old_rel.name) {
                            None => {
                                changes.push(BreakingChange::RelationRemoved {
                                    type_name: old_type.name.clone(),
                                    relation: old_rel.name.clone(),
                                });
                            }
                            Some(new_rel) => {
                                if old_rel.subject_types != new_rel.subject_types {
                                    changes.push(BreakingChange::SubjectTypesChanged {
                                        type_name: old_type.name.clone(),
                                        relation: old_rel.name.clone(),
                                    });
                                }
                            }
                        }
                    }
                }
            },
            Definition::Caveat(old_caveat) => match new.get_caveat(&old_caveat.name) {
                None => {
                    changes.push(BreakingChange::CaveatRemoved {
                        name: old_caveat.name.clone(),
                    });
                }
                Some(new_caveat) => {
                    if old_caveat.parameters != new_caveat.parameters {
                        changes.push(BreakingChange::CaveatParametersChanged {
                            name: old_caveat.name.clone(),
                        });
                    }
                }
            },
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::parse_schema;

    fn limits_with(max_types: usize, max_rels: usize, max_perms: usize) -> SchemaLimits {
        SchemaLimits {
            max_types,
            max_relations_per_type: max_rels,
            max_permissions_per_type: max_perms,
            max_caveat_parameters: 20,
        }
    }

    #[test]
    fn schema_within_limits_passes() {
        let ast =
            parse_schema("definition user {} definition group { relation member: user }").unwrap();

        assert!(validate_schema_limits(&ast, &SchemaLimits::default()).is_ok());
    }

    #[test]
    fn exceeding_max_types_rejected() {
        let ast = parse_schema("definition a {} definition b {} definition c {}").unwrap();
        let limits = limits_with(2, 30, 30);

        let errors = validate_schema_limits(&ast, &limits).unwrap_err();

        assert_eq!(errors, vec![LimitsError::TooManyTypes { count: 3, limit: 2 }]);
    }

    #[test]
    fn caveats_do_not_count_toward_type_limit() {
        let ast =
            parse_schema("definition a {} definition b {} caveat gate(x int) { x == 1 }").unwrap();
        let limits = limits_with(2, 30, 30);

        assert!(validate_schema_limits(&ast, &limits).is_ok());
    }

    #[test]
    fn exceeding_max_relations_rejected() {
        let ast =
            parse_schema("definition doc { relation a: user relation b: user relation c: user }")
                .unwrap();
        let limits = limits_with(50, 2, 30);

        let errors = validate_schema_limits(&ast, &limits).unwrap_err();

        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            LimitsError::TooManyRelations {
                type_name,
                count: 3,
                limit: 2
            } if type_name == "doc"
        ));
    }

    #[test]
    fn exceeding_max_permissions_rejected() {
        let ast = parse_schema(
            "definition doc { relation a: user permission p1 = a permission p2 = a permission p3 = a }",
        )
        .unwrap();
        let limits = limits_with(50, 30, 2);

        let errors = validate_schema_limits(&ast, &limits).unwrap_err();

        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            LimitsError::TooManyPermissions {
                type_name,
                count: 3,
                limit: 2
            } if type_name == "doc"
        ));
    }

    #[test]
    fn exceeding_caveat_parameters_rejected() {
        let ast = parse_schema("caveat gate(a int, b int, c int) { a == 1 }").unwrap();
        let limits = SchemaLimits {
            max_caveat_parameters: 2,
            ..SchemaLimits::default()
        };

        let errors = validate_schema_limits(&ast, &limits).unwrap_err();

        assert!(matches!(
            &errors[0],
            LimitsError::TooManyCaveatParameters {
                caveat,
                count: 3,
                limit: 2
            } if caveat == "gate"
        ));
    }

    #[test]
    fn violations_accumulate() {
        let ast = parse_schema(
            "definition a { relation r1: x relation r2: x } definition b {} definition c {}",
        )
        .unwrap();
        let limits = limits_with(2, 1, 30);

        let errors = validate_schema_limits(&ast, &limits).unwrap_err();

        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn adding_new_type_is_safe() {
        let old = parse_schema("definition user {}").unwrap();
        let new =
            parse_schema("definition user {} definition group { relation member: user }").unwrap();

        assert!(detect_breaking_changes(&old, &new).is_empty());
    }

    #[test]
    fn removing_type_is_breaking() {
        let old =
            parse_schema("definition user {} definition group { relation member: user }").unwrap();
        let new = parse_schema("definition user {}").unwrap();

        let changes = detect_breaking_changes(&old, &new);

        assert_eq!(
            changes,
            vec![BreakingChange::TypeRemoved {
                type_name: "group".to_string()
            }]
        );
    }

    #[test]
    fn removing_relation_is_breaking() {
        let old =
            parse_schema("definition doc { relation owner: user relation editor: user }").unwrap();
        let new = parse_schema("definition doc { relation owner: user }").unwrap();

        let changes = detect_breaking_changes(&old, &new);

        assert_eq!(
            changes,
            vec![BreakingChange::RelationRemoved {
                type_name: "doc".to_string(),
                relation: "editor".to_string(),
            }]
        );
    }

    #[test]
    fn changing_subject_types_is_breaking() {
        let old = parse_schema("definition doc { relation editor: user | group#member }").unwrap();
        let new = parse_schema("definition doc { relation editor: user }").unwrap();

        let changes = detect_breaking_changes(&old, &new);

        assert_eq!(
            changes,
            vec![BreakingChange::SubjectTypesChanged {
                type_name: "doc".to_string(),
                relation: "editor".to_string(),
            }]
        );
    }

    #[test]
    fn changing_permission_rule_is_not_breaking() {
        let old = parse_schema(
            "definition doc { relation owner: user relation editor: user permission can_edit = owner }",
        )
        .unwrap();
        let new = parse_schema(
            "definition doc { relation owner: user relation editor: user permission can_edit = owner + editor }",
        )
        .unwrap();

        assert!(detect_breaking_changes(&old, &new).is_empty());
    }

    #[test]
    fn removing_permission_is_not_breaking() {
        let old =
            parse_schema("definition doc { relation owner: user permission can_edit = owner }")
                .unwrap();
        let new = parse_schema("definition doc { relation owner: user }").unwrap();

        assert!(detect_breaking_changes(&old, &new).is_empty());
    }

    #[test]
    fn removing_caveat_is_breaking() {
        let old = parse_schema("caveat gate(x int) { x == 1 } definition user {}").unwrap();
        let new = parse_schema("definition user {}").unwrap();

        let changes = detect_breaking_changes(&old, &new);

        assert_eq!(
            changes,
            vec![BreakingChange::CaveatRemoved {
                name: "gate".to_string()
            }]
        );
    }

    #[test]
    fn reparameterizing_caveat_is_breaking() {
        let old = parse_schema("caveat gate(x int) { x == 1 }").unwrap();
        let new = parse_schema("caveat gate(x int, y int) { x == 1 }").unwrap();

        let changes = detect_breaking_changes(&old, &new);

        assert_eq!(
            changes,
            vec![BreakingChange::CaveatParametersChanged {
                name: "gate".to_string()
            }]
        );
    }
}
