//! Schema front end for the boma relationship-based access-control DSL.
//!
//! [`schema::parse_schema`] turns schema text into a typed AST;
//! [`schema::analyze`] validates it and annotates every permission with its
//! inferred subject types. Both are pure functions over fresh per-call
//! state, so they are safe to call from concurrent contexts.

pub mod schema;
