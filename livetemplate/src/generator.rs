//! `Generate(boundaries, data) -> TreeNode`: evaluates a compiled
//! `Template` against one data value.
//!
//! There is no runtime type reflection here. Every path access goes
//! through `Scope::resolve` over the single `serde_json::Value`
//! produced once per call (see `value.rs`). This module only decides
//! *what* each boundary evaluates to; the wire encoding and the
//! "does the receiver already know this shape" bookkeeping live in
//! `tree.rs` and `diff/`.

use crate::boundary::{Boundary, StructuralHash, Template};
use crate::config::GeneratorConfig;
use crate::error::{LiveTemplateError, Result};
use crate::tree::{
    fingerprint_node, fingerprint_range, ItemData, ItemId, NodeData, RangeData, SlotValue,
    TreeNode,
};
use crate::value::{is_truthy, render_to_string, Scope, TemplateData};
use serde_json::Value;

/// Render `data` against `template`, producing a full tree with every
/// `s` array populated. Whether a later send can omit some of those
/// arrays is a diff-engine decision, not this function's.
pub fn generate<T: TemplateData>(
    template: &Template,
    data: &T,
    config: &GeneratorConfig,
) -> Result<TreeNode> {
    let root = crate::value::to_value(data)?;
    let scope = Scope::new(root);
    let (statics, slots) = generate_boundaries(&template.boundaries, &scope, config)?;
    let fingerprint = fingerprint_node(Some(&statics), &slots);
    Ok(TreeNode::Node(NodeData {
        statics: Some(statics),
        slots,
        shape: template.structural_hash,
        fingerprint,
    }))
}

fn generate_boundaries(
    boundaries: &[Boundary],
    scope: &Scope,
    config: &GeneratorConfig,
) -> Result<(Vec<String>, Vec<SlotValue>)> {
    let mut statics = Vec::new();
    let mut slots = Vec::new();
    let mut current_scope = scope.clone();

    for boundary in boundaries {
        match boundary {
            Boundary::Static(text) => statics.push(text.clone()),
            Boundary::Field(path) => {
                slots.push(SlotValue::Text(render_field(&current_scope, path, config)?));
            }
            Boundary::If { cond, then, or_else } => {
                let branch = if resolve_truthy(&current_scope, cond, config)? {
                    then
                } else {
                    or_else
                };
                slots.push(SlotValue::Child(wrap_node(branch, &current_scope, config)?));
            }
            Boundary::Range { iter, body, or_else } => {
                match current_scope.resolve(iter) {
                    Some(Value::Array(items)) if !items.is_empty() => {
                        slots.push(SlotValue::Child(TreeNode::Range(generate_range(
                            body,
                            &items,
                            &current_scope,
                            config,
                        )?)));
                    }
                    Some(Value::Array(_)) | None => {
                        let slot = if has_real_else(or_else) {
                            wrap_node(or_else, &current_scope, config)?
                        } else {
                            empty_range_slot(body, or_else)
                        };
                        slots.push(SlotValue::Child(slot));
                    }
                    Some(_) if config.strict_path_evaluation => {
                        return Err(LiveTemplateError::DataInvalid(format!(
                            "range target {iter:?} is not an array"
                        )));
                    }
                    Some(_) => {
                        slots.push(SlotValue::Child(wrap_node(or_else, &current_scope, config)?));
                    }
                }
            }
            Boundary::With { path, body } => match current_scope.resolve(path) {
                Some(v) if is_truthy(&v) => {
                    let inner = current_scope.with_current(v);
                    slots.push(SlotValue::Child(wrap_node(body, &inner, config)?));
                }
                _ => slots.push(SlotValue::Child(empty_node())),
            },
            Boundary::Template { body } => {
                slots.push(SlotValue::Child(wrap_node(body, &current_scope, config)?));
            }
            Boundary::DynamicTemplate { expr } => slots.push(SlotValue::Text(expr.clone())),
            Boundary::Var { name, path } => {
                let value = current_scope.resolve(path).unwrap_or(Value::Null);
                current_scope = current_scope.with_var(name, value);
                slots.push(SlotValue::Text(String::new()));
            }
        }
    }

    Ok((statics, slots))
}

fn wrap_node(boundaries: &[Boundary], scope: &Scope, config: &GeneratorConfig) -> Result<TreeNode> {
    let (statics, slots) = generate_boundaries(boundaries, scope, config)?;
    let fingerprint = fingerprint_node(Some(&statics), &slots);
    Ok(TreeNode::Node(NodeData {
        statics: Some(statics),
        slots,
        shape: StructuralHash::of(boundaries),
        fingerprint,
    }))
}

/// An absent `{{else}}` always compiles to a single trailing
/// `Static("")` (`compile_list` flushes a trailing static unconditionally,
/// even over an empty action list), which is indistinguishable from a
/// real `{{else}}` containing only literal text unless we special-case
/// the no-else shape here.
fn has_real_else(or_else: &[Boundary]) -> bool {
    !matches!(or_else, [Boundary::Static(s)] if s.is_empty())
}

/// An empty/missing range target with no real `{{else}}`: still a range
/// body, just with zero items, so it stays range-shaped across the
/// empty -> non-empty transition instead of collapsing into a plain
/// node that a later diff can only replace wholesale.
fn empty_range_slot(body: &[Boundary], or_else: &[Boundary]) -> TreeNode {
    if has_real_else(or_else) {
        // handled by the caller via `wrap_node`; unreachable from there.
        unreachable!("empty_range_slot called with a real else branch")
    }
    let statics = collect_statics(body);
    let shape = StructuralHash::of(body);
    let fingerprint = fingerprint_range(Some(&statics), &[], &[]);
    TreeNode::Range(RangeData {
        statics: Some(statics),
        items: Vec::new(),
        item_ids: Vec::new(),
        shape,
        fingerprint,
    })
}

/// The rendering of a falsy/missing `With` target: an empty node with
/// no dynamics, distinct from `Static("")` so the diff engine still
/// sees a node-shaped slot value.
fn empty_node() -> TreeNode {
    let statics = vec![String::new()];
    let fingerprint = fingerprint_node(Some(&statics), &[]);
    TreeNode::Node(NodeData {
        statics: Some(statics),
        slots: Vec::new(),
        shape: StructuralHash(0),
        fingerprint,
    })
}

fn generate_range(
    body: &[Boundary],
    items: &[Value],
    scope: &Scope,
    config: &GeneratorConfig,
) -> Result<RangeData> {
    let statics = collect_statics(body);
    let mut item_datas = Vec::with_capacity(items.len());
    let mut item_ids = Vec::with_capacity(items.len());

    for (index, item_value) in items.iter().enumerate() {
        let item_scope = scope.with_current(item_value.clone());
        let (_, slots) = generate_boundaries(body, &item_scope, config)?;
        item_datas.push(ItemData { slots });
        item_ids.push(item_id_for(item_value, index));
    }

    let shape = StructuralHash::of(body);
    let fingerprint = fingerprint_range(Some(&statics), &item_datas, &item_ids);
    Ok(RangeData {
        statics: Some(statics),
        items: item_datas,
        item_ids,
        shape,
        fingerprint,
    })
}

/// A range body's `s` array depends only on its boundary shape, never
/// on the data being iterated, so it can be read straight off the
/// boundary list instead of re-deriving it per item.
fn collect_statics(boundaries: &[Boundary]) -> Vec<String> {
    boundaries
        .iter()
        .filter_map(|b| match b {
            Boundary::Static(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

/// An item's stable identity: an explicit `id`/`Id`/`ID` field when
/// present; otherwise a structural content hash of the item, so that
/// reorders and unchanged items are still recognized across renders
/// even without an id field (see the "Range with no stable ID" design
/// note — two items with identical content are indistinguishable under
/// this scheme and may surface as a remove+insert instead of an
/// update, which is the documented caveat, not a bug). Position is the
/// last resort, used only when an item has no content to hash (`null`).
fn item_id_for(value: &Value, index: usize) -> ItemId {
    if let Value::Object(map) = value {
        for key in ["id", "Id", "ID"] {
            if let Some(v) = map.get(key) {
                return ItemId(scalar_to_id_string(v));
            }
        }
    }
    if matches!(value, Value::Null) {
        return ItemId(index.to_string());
    }
    ItemId(format!("#{:x}", content_hash(value)))
}

fn content_hash(value: &Value) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    // `serde_json::Value` has no `Hash` impl; its canonical serialized
    // form (object keys preserve insertion order, which is stable for a
    // given data shape) stands in for one.
    serde_json::to_string(value).unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}

fn scalar_to_id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn resolve_truthy(scope: &Scope, path: &str, config: &GeneratorConfig) -> Result<bool> {
    match scope.resolve(path) {
        Some(v) => Ok(is_truthy(&v)),
        None if config.strict_path_evaluation => Err(LiveTemplateError::DataInvalid(format!(
            "path not found: {path}"
        ))),
        None => Ok(false),
    }
}

fn render_field(scope: &Scope, path: &str, config: &GeneratorConfig) -> Result<String> {
    match scope.resolve(path) {
        Some(v) => Ok(render_to_string(&v, config.escape_html)),
        None if config.strict_path_evaluation => Err(LiveTemplateError::DataInvalid(format!(
            "path not found: {path}"
        ))),
        None => Ok(String::new()),
    }
}
