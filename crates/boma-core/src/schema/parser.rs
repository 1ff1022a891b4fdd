use tracing::debug;

use super::ast::{
    CaveatDef, CaveatExpr, CaveatParam, Definition, PermissionDef, PermissionExpr, RelationDef,
    SchemaAst, SubjectTypeRef, TypeDefinition,
};
use super::lexer::{tokenize, LexError, Position, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{}", format_lexical(.0))]
    Lexical(Vec<LexError>),
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        message: String,
        line: u32,
        column: u32,
    },
}

fn format_lexical(errors: &[LexError]) -> String {
    let rendered: Vec<String> = errors.iter().map(ToString::to_string).collect();
    rendered.join("; ")
}

/// Parse schema source text into a typed AST.
///
/// Lexical errors are collected and reported together; the first syntax
/// error aborts. Either way no AST is produced for invalid input.
pub fn parse_schema(input: &str) -> Result<SchemaAst, ParseError> {
    let lexed = tokenize(input);
    if !lexed.errors.is_empty() {
        return Err(ParseError::Lexical(lexed.errors));
    }

    let mut parser = Parser {
        tokens: &lexed.tokens,
        pos: 0,
        end: lexed.end,
    };
    let ast = parser.schema()?;
    debug!(definitions = ast.definitions.len(), "parsed schema");
    Ok(ast)
}

/// All mutable parse state lives in one of these per `parse_schema` call,
/// so parsing is reentrant.
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    end: Position,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn current_position(&self) -> Position {
        self.tokens.get(self.pos).map_or(self.end, |t| t.position)
    }

    fn describe(&self) -> String {
        match self.tokens.get(self.pos) {
            Some(token) => token.kind.to_string(),
            None => "end of input".to_string(),
        }
    }

    fn syntax_error(&self, message: String) -> ParseError {
        let position = self.current_position();
        ParseError::Syntax {
            message,
            line: position.line,
            column: position.column,
        }
    }

    fn expect(&mut self, kind: TokenKind, rule: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(found) if *found == kind => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.syntax_error(format!(
                "expected {kind} in {rule}, found {}",
                self.describe()
            ))),
        }
    }

    fn expect_ident(&mut self, what: &str, rule: &str) -> Result<String, ParseError> {
        if let Some(TokenKind::Ident(name)) = self.peek() {
            let name = name.clone();
            self.pos += 1;
            Ok(name)
        } else {
            Err(self.syntax_error(format!(
                "expected {what} in {rule}, found {}",
                self.describe()
            )))
        }
    }

    fn expect_int(&mut self, rule: &str) -> Result<i64, ParseError> {
        if let Some(TokenKind::IntLit(value)) = self.peek() {
            let value = *value;
            self.pos += 1;
            Ok(value)
        } else {
            Err(self.syntax_error(format!(
                "expected an integer literal in {rule}, found {}",
                self.describe()
            )))
        }
    }

    /// Consume consecutive doc comments; the nearest one before a
    /// declaration wins.
    fn take_doc(&mut self) -> Option<String> {
        let mut doc = None;
        while let Some(TokenKind::DocComment(text)) = self.peek() {
            doc = Some(text.clone());
            self.pos += 1;
        }
        doc
    }

    fn schema(&mut self) -> Result<SchemaAst, ParseError> {
        let mut definitions = Vec::new();
        loop {
            let doc = self.take_doc();
            match self.peek() {
                Some(TokenKind::Definition) => {
                    definitions.push(Definition::ObjectType(self.object_definition(doc)?));
                }
                Some(TokenKind::Caveat) => {
                    definitions.push(Definition::Caveat(self.caveat_definition(doc)?));
                }
                None if doc.is_none() => break,
                _ => {
                    return Err(self.syntax_error(format!(
                        "expected 'definition' or 'caveat' at top level, found {}",
                        self.describe()
                    )));
                }
            }
        }
        Ok(SchemaAst { definitions })
    }

    fn object_definition(&mut self, doc: Option<String>) -> Result<TypeDefinition, ParseError> {
        self.expect(TokenKind::Definition, "object type definition")?;
        let name = self.expect_ident("a definition name", "object type definition")?;
        self.expect(TokenKind::LBrace, "object type definition")?;

        let mut relations = Vec::new();
        let mut permissions = Vec::new();
        loop {
            let member_doc = self.take_doc();
            match self.peek() {
                Some(TokenKind::Relation) => {
                    relations.push(self.relation_declaration(member_doc)?);
                }
                Some(TokenKind::Permission) => {
                    permissions.push(self.permission_declaration(member_doc)?);
                }
                Some(TokenKind::RBrace) if member_doc.is_none() => {
                    self.pos += 1;
                    break;
                }
                _ if member_doc.is_some() => {
                    return Err(self.syntax_error(format!(
                        "expected a declaration after doc comment in definition '{name}', found {}",
                        self.describe()
                    )));
                }
                _ => {
                    return Err(self.syntax_error(format!(
                        "expected 'relation', 'permission' or '}}' in definition '{name}', found {}",
                        self.describe()
                    )));
                }
            }
        }

        Ok(TypeDefinition {
            name,
            doc,
            relations,
            permissions,
        })
    }

    fn relation_declaration(&mut self, doc: Option<String>) -> Result<RelationDef, ParseError> {
        self.expect(TokenKind::Relation, "relation declaration")?;
        let name = self.expect_ident("a relation name", "relation declaration")?;
        self.expect(TokenKind::Colon, "relation declaration")?;

        let mut subject_types = vec![self.subject_type()?];
        while matches!(self.peek(), Some(TokenKind::Pipe)) {
            self.pos += 1;
            subject_types.push(self.subject_type()?);
        }

        Ok(RelationDef {
            name,
            doc,
            subject_types,
        })
    }

    fn subject_type(&mut self) -> Result<SubjectTypeRef, ParseError> {
        let type_name = self.expect_ident("a subject type name", "relation declaration")?;
        match self.peek() {
            Some(TokenKind::Colon) => {
                self.pos += 1;
                self.expect(TokenKind::Star, "wildcard subject type")?;
                Ok(SubjectTypeRef::wildcard(type_name))
            }
            Some(TokenKind::Hash) => {
                self.pos += 1;
                let relation = self.expect_ident("a relation name", "subject type reference")?;
                Ok(SubjectTypeRef::with_relation(type_name, relation))
            }
            _ => Ok(SubjectTypeRef::direct(type_name)),
        }
    }

    fn permission_declaration(&mut self, doc: Option<String>) -> Result<PermissionDef, ParseError> {
        self.expect(TokenKind::Permission, "permission declaration")?;
        let name = self.expect_ident("a permission name", "permission declaration")?;
        self.expect(TokenKind::Equals, "permission declaration")?;
        let expr = self.union_expr()?;
        Ok(PermissionDef { name, doc, expr })
    }

    // Expression grammar, lowest precedence first. Each level hands off to
    // the next before consuming its own operator; chains of `+` and `&`
    // collapse into one flat n-ary node.

    fn union_expr(&mut self) -> Result<PermissionExpr, ParseError> {
        let first = self.intersection_expr()?;
        if !matches!(self.peek(), Some(TokenKind::Plus)) {
            return Ok(first);
        }
        let mut operands = vec![first];
        while matches!(self.peek(), Some(TokenKind::Plus)) {
            self.pos += 1;
            operands.push(self.intersection_expr()?);
        }
        Ok(PermissionExpr::Union(operands))
    }

    fn intersection_expr(&mut self) -> Result<PermissionExpr, ParseError> {
        let first = self.exclusion_expr()?;
        if !matches!(self.peek(), Some(TokenKind::Ampersand)) {
            return Ok(first);
        }
        let mut operands = vec![first];
        while matches!(self.peek(), Some(TokenKind::Ampersand)) {
            self.pos += 1;
            operands.push(self.exclusion_expr()?);
        }
        Ok(PermissionExpr::Intersection(operands))
    }

    fn exclusion_expr(&mut self) -> Result<PermissionExpr, ParseError> {
        let mut expr = self.arrow_expr()?;
        while matches!(self.peek(), Some(TokenKind::Minus)) {
            self.pos += 1;
            let excluded = self.arrow_expr()?;
            expr = PermissionExpr::Exclusion(Box::new(expr), Box::new(excluded));
        }
        Ok(expr)
    }

    fn arrow_expr(&mut self) -> Result<PermissionExpr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(TokenKind::Arrow) => {
                    self.pos += 1;
                    let target = self.expect_ident("a member name", "arrow expression")?;
                    expr = PermissionExpr::Arrow(Box::new(expr), target);
                }
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    let all = match self.peek() {
                        Some(TokenKind::Any) => false,
                        Some(TokenKind::All) => true,
                        _ => {
                            return Err(self.syntax_error(format!(
                                "expected 'any' or 'all' after '.' in arrow expression, found {}",
                                self.describe()
                            )));
                        }
                    };
                    self.pos += 1;
                    self.expect(TokenKind::LParen, "arrow expression")?;
                    let target = self.expect_ident("a member name", "arrow expression")?;
                    self.expect(TokenKind::RParen, "arrow expression")?;
                    expr = if all {
                        PermissionExpr::All(Box::new(expr), target)
                    } else {
                        PermissionExpr::Any(Box::new(expr), target)
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<PermissionExpr, ParseError> {
        match self.peek() {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(PermissionExpr::Identifier(name))
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let expr = self.union_expr()?;
                self.expect(TokenKind::RParen, "parenthesized expression")?;
                Ok(expr)
            }
            _ => Err(self.syntax_error(format!(
                "expected an identifier or '(' in permission expression, found {}",
                self.describe()
            ))),
        }
    }

    fn caveat_definition(&mut self, doc: Option<String>) -> Result<CaveatDef, ParseError> {
        self.expect(TokenKind::Caveat, "caveat definition")?;
        let name = self.expect_ident("a caveat name", "caveat definition")?;
        self.expect(TokenKind::LParen, "caveat definition")?;

        let mut parameters = Vec::new();
        if !matches!(self.peek(), Some(TokenKind::RParen)) {
            parameters.push(self.caveat_parameter()?);
            while matches!(self.peek(), Some(TokenKind::Comma)) {
                self.pos += 1;
                parameters.push(self.caveat_parameter()?);
            }
        }
        self.expect(TokenKind::RParen, "caveat definition")?;

        self.expect(TokenKind::LBrace, "caveat definition")?;
        let parameter = self.expect_ident("a parameter name", "caveat expression")?;
        self.expect(TokenKind::EqEq, "caveat expression")?;
        let value = self.expect_int("caveat expression")?;
        self.expect(TokenKind::RBrace, "caveat definition")?;

        Ok(CaveatDef {
            name,
            doc,
            parameters,
            expression: CaveatExpr { parameter, value },
        })
    }

    fn caveat_parameter(&mut self) -> Result<CaveatParam, ParseError> {
        let name = self.expect_ident("a parameter name", "caveat parameter list")?;
        let type_name = self.expect_ident("a parameter type", "caveat parameter list")?;
        Ok(CaveatParam { name, type_name })
    }
}
