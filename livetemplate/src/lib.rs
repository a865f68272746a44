//! Renders a template once, then streams minimal tree-structured JSON
//! diffs to keep a remote view in sync, the way this crate's prior
//! incarnation streamed morphdom patches over a live WebSocket.
//!
//! Five pieces, in dependency order (leaves first):
//!
//! - [`token`]: opaque session tokens binding a connection to a
//!   `(tenant, group)` pair.
//! - [`boundary`]: compiles a host-provided action-node AST into an
//!   immutable [`boundary::Boundary`] list.
//! - [`generator`]: evaluates a boundary list against a data value
//!   into a [`tree::TreeNode`].
//! - [`diff`]: computes the minimal patch between two trees of the
//!   same template.
//! - [`registry`]: the concurrency fabric: per-connection last-tree
//!   state, locking, and per-group fan-out.
//!
//! `value`, `tree`, `config`, and `error` are shared support modules
//! used across all five.

pub mod boundary;
pub mod config;
pub mod diff;
pub mod error;
pub mod generator;
pub mod registry;
pub mod token;
pub mod tree;
pub mod value;

pub use boundary::{
    parse, ActionNode, Boundary, Diagnostic, ParseOutput, StructuralHash, Template,
    TemplateLibrary, TemplateRef,
};
pub use config::{Config, DiffConfig, GeneratorConfig, ParserConfig, RegistryConfig, TokenConfig};
pub use diff::{diff, DiffOutcome, KnownShapes};
pub use error::{LiveTemplateError, Result};
pub use generator::generate;
pub use registry::{spawn_sweeper, ConnectionId, Registry, Transport};
pub use token::{Claims, TokenService};
pub use tree::{
    Fingerprint, ItemData, ItemId, NodeData, Patch, PatchSlot, Position, RangeData,
    RangePatchOp, SlotValue, TreeNode,
};
pub use value::TemplateData;
