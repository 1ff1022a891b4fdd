use indexmap::IndexMap;

use super::ast::{Definition, PermissionDef, RelationDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    ObjectType,
    Caveat,
}

/// One registered top-level definition. Caveats carry no members.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub kind: SymbolKind,
    relations: IndexMap<String, RelationDef>,
    permissions: IndexMap<String, PermissionDef>,
}

impl Symbol {
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    pub fn permission(&self, name: &str) -> Option<&PermissionDef> {
        self.permissions.get(name)
    }
}

/// Name-resolution index over a schema, built fresh per analysis.
///
/// Duplicate names are tolerated here with last-write-wins semantics;
/// detecting them is the analyzer's job, not the table's.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    definitions: IndexMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_definition(&mut self, definition: &Definition) {
        let symbol = match definition {
            Definition::ObjectType(t) => Symbol {
                kind: SymbolKind::ObjectType,
                relations: t
                    .relations
                    .iter()
                    .map(|r| (r.name.clone(), r.clone()))
                    .collect(),
                permissions: t
                    .permissions
                    .iter()
                    .map(|p| (p.name.clone(), p.clone()))
                    .collect(),
            },
            Definition::Caveat(_) => Symbol {
                kind: SymbolKind::Caveat,
                relations: IndexMap::new(),
                permissions: IndexMap::new(),
            },
        };
        self.definitions.insert(definition.name().to_string(), symbol);
    }

    pub fn get_definition(&self, name: &str) -> Option<&Symbol> {
        self.definitions.get(name)
    }

    pub fn has_definition(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn get_relation(&self, type_name: &str, name: &str) -> Option<&RelationDef> {
        self.get_definition(type_name).and_then(|s| s.relation(name))
    }

    pub fn get_permission(&self, type_name: &str, name: &str) -> Option<&PermissionDef> {
        self.get_definition(type_name)
            .and_then(|s| s.permission(name))
    }

    pub fn has_relation_or_permission(&self, type_name: &str, name: &str) -> bool {
        self.get_relation(type_name, name).is_some()
            || self.get_permission(type_name, name).is_some()
    }

    pub fn definitions(&self) -> impl Iterator<Item = (&str, &Symbol)> {
        self.definitions.iter().map(|(name, sym)| (name.as_str(), sym))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::parse_schema;

    fn table_for(input: &str) -> SymbolTable {
        let ast = parse_schema(input).unwrap();
        let mut table = SymbolTable::new();
        for definition in &ast.definitions {
            table.add_definition(definition);
        }
        table
    }

    #[test]
    fn resolves_definitions_and_members() {
        let table = table_for(
            "definition user {} definition doc { relation owner: user permission edit = owner }",
        );

        assert!(table.has_definition("user"));
        assert!(table.has_definition("doc"));
        assert!(!table.has_definition("folder"));

        assert!(table.get_relation("doc", "owner").is_some());
        assert!(table.get_permission("doc", "edit").is_some());
        assert!(table.get_relation("doc", "edit").is_none());
        assert!(table.has_relation_or_permission("doc", "owner"));
        assert!(table.has_relation_or_permission("doc", "edit"));
        assert!(!table.has_relation_or_permission("doc", "view"));
    }

    #[test]
    fn caveats_register_without_members() {
        let table = table_for("caveat gate(x int) { x == 1 }");

        let symbol = table.get_definition("gate").unwrap();
        assert_eq!(symbol.kind, SymbolKind::Caveat);
        assert!(!table.has_relation_or_permission("gate", "x"));
    }

    #[test]
    fn definitions_iterate_in_declaration_order() {
        let table = table_for("definition user {} definition group {} definition doc {}");

        let names: Vec<&str> = table.definitions().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["user", "group", "doc"]);
    }

    #[test]
    fn duplicate_definition_last_write_wins() {
        let table = table_for(
            "definition doc { relation owner: user } definition doc { relation viewer: user }",
        );

        assert!(table.get_relation("doc", "viewer").is_some());
        assert!(table.get_relation("doc", "owner").is_none());
    }
}
