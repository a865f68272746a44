//! Minimal-patch diffing between two renders of the same template
//! (`TreeNode`s sharing a structural hash at the level being compared).
//!
//! Same shape as the morphdom-style diffing this crate used to do over
//! HTML in `morphdom.rs`: `diff_nodes`/`diff_attributes` there walk two
//! trees slot by slot and emit only the ops for what changed;
//! `engine.rs` here does the same over `TreeNode` slots instead of HTML
//! elements/attributes. `diff_keyed_children`'s key-map matching is the
//! same idea `range.rs` generalizes into insert/remove/update/reorder
//! ops over stable item ids instead of `key`/`data-key` attributes.

mod engine;
mod range;

#[cfg(test)]
mod tests;

pub use engine::{apply_full_tree_threshold, diff, DiffOutcome, KnownShapes};
