//! Boundary parser: turns a host-provided action-node AST into an
//! ordered, immutable `Boundary` list ready for the tree generator.
//!
//! This module does not parse template source text. A host
//! template-language parser is assumed to already yield [`ActionNode`]s
//! of known kinds. What lives here is the *boundary compiler*: merging
//! adjacent statics, resolving literal sub-template invocations,
//! bounding recursive template depth, and computing the structural
//! hash the diff engine and registry use to decide whether a receiver
//! already knows a shape.

mod parser;

pub use parser::{parse, Diagnostic, ParseOutput};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// A node produced by the host's template-language parser. This crate
/// consumes these; it never constructs them from source text.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionNode {
    /// Verbatim HTML.
    Static(String),
    /// Dot-delimited accessor into the data value.
    Field(String),
    /// `cond` is a path or predicate expression; `then`/`else` are
    /// nested action lists.
    If {
        cond: String,
        then: Vec<ActionNode>,
        or_else: Vec<ActionNode>,
    },
    /// `iter` yields items; `body` runs once per item in an item
    /// scope; `or_else` runs once if `iter` is empty.
    Range {
        iter: String,
        body: Vec<ActionNode>,
        or_else: Vec<ActionNode>,
    },
    /// Pushes `path`'s value as the local "dot" context for `body`.
    With { path: String, body: Vec<ActionNode> },
    /// Invokes a named sub-template. `name` is a literal name when
    /// known at parse time, or a path/expression when computed
    /// dynamically.
    Template { name: TemplateRef, arg: String },
    /// Binds a named variable in the current scope for the lexical
    /// extent (remainder of the enclosing action list).
    Var { name: String, path: String },
}

/// How a `Template` action's target is named.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateRef {
    Literal(String),
    Dynamic(String),
}

/// The compiled, immutable representation of one nesting level of a
/// template.
#[derive(Debug, Clone, PartialEq)]
pub enum Boundary {
    Static(String),
    Field(String),
    If {
        cond: String,
        then: Vec<Boundary>,
        or_else: Vec<Boundary>,
    },
    Range {
        iter: String,
        body: Vec<Boundary>,
        or_else: Vec<Boundary>,
    },
    With {
        path: String,
        body: Vec<Boundary>,
    },
    /// A literal-named sub-template, inlined at parse time.
    Template { body: Vec<Boundary> },
    /// A computed-name sub-template invocation, or a literal one whose
    /// recursive expansion hit the depth bound. Always rendered as a
    /// plain string dynamic slot.
    DynamicTemplate { expr: String },
    Var {
        name: String,
        path: String,
    },
}

impl Boundary {
    /// Whether this boundary occupies one dynamic slot at its
    /// enclosing level (everything except `Static`).
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, Boundary::Static(_))
    }
}

/// A stable hash over the *shape* of a boundary list: which kinds
/// appear, in what nesting, ignoring any rendered values. Two
/// templates with the same structural hash are "the same tree on the
/// wire" for the purposes of the diff engine and the registry's
/// client-cache tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuralHash(pub u64);

impl StructuralHash {
    pub fn of(boundaries: &[Boundary]) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hash_list(boundaries, &mut hasher);
        StructuralHash(hasher.finish())
    }
}

fn hash_list(boundaries: &[Boundary], hasher: &mut impl Hasher) {
    boundaries.len().hash(hasher);
    for b in boundaries {
        hash_one(b, hasher);
    }
}

fn hash_one(boundary: &Boundary, hasher: &mut impl Hasher) {
    match boundary {
        Boundary::Static(s) => {
            0u8.hash(hasher);
            s.hash(hasher);
        }
        Boundary::Field(_) => 1u8.hash(hasher),
        Boundary::If { then, or_else, .. } => {
            2u8.hash(hasher);
            hash_list(then, hasher);
            hash_list(or_else, hasher);
        }
        Boundary::Range { body, or_else, .. } => {
            3u8.hash(hasher);
            hash_list(body, hasher);
            hash_list(or_else, hasher);
        }
        Boundary::With { body, .. } => {
            4u8.hash(hasher);
            hash_list(body, hasher);
        }
        Boundary::Template { body } => {
            5u8.hash(hasher);
            hash_list(body, hasher);
        }
        Boundary::DynamicTemplate { .. } => 6u8.hash(hasher),
        Boundary::Var { .. } => 7u8.hash(hasher),
    }
}

/// A parsed, compiled template: its boundary list plus the cached
/// structural hash identifying its wire shape.
#[derive(Debug, Clone)]
pub struct Template {
    pub boundaries: Vec<Boundary>,
    pub structural_hash: StructuralHash,
}

impl Template {
    pub fn new(boundaries: Vec<Boundary>) -> Self {
        let structural_hash = StructuralHash::of(&boundaries);
        Self {
            boundaries,
            structural_hash,
        }
    }
}

/// Named sub-templates available for literal `Template` resolution, as
/// the host provides them alongside the entry-point action list.
pub type TemplateLibrary = HashMap<String, Vec<ActionNode>>;
