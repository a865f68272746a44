//! Node/slot level diffing (see `diff/mod.rs` for how this relates to
//! the prior `morphdom.rs::diff_nodes`).

use super::range;
use crate::boundary::StructuralHash;
use crate::tree::{ItemData, NodeData, Patch, PatchSlot, RangeData, SlotValue, TreeNode};
use std::collections::HashSet;

/// Tracks, per connection, which structural shapes have already been
/// sent with their `s` array, so later sends of the same shape can
/// omit it. Owned by the registry alongside each connection's last
/// tree.
#[derive(Debug, Clone, Default)]
pub struct KnownShapes(HashSet<StructuralHash>);

impl KnownShapes {
    pub fn new() -> Self {
        Self(HashSet::new())
    }

    pub fn is_known(&self, shape: StructuralHash) -> bool {
        self.0.contains(&shape)
    }

    fn commit(&mut self, newly_known: HashSet<StructuralHash>) {
        self.0.extend(newly_known);
    }
}

/// What a connection should be sent after one `Update` call.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    /// No previous tree, or the shapes diverged enough that a full
    /// resend is simplest: the complete tree, with `s` included only
    /// where the receiver doesn't already have it cached.
    Full(TreeNode),
    /// An incremental patch. Empty when nothing changed.
    Patch(Patch),
}

pub fn diff(prev: Option<&TreeNode>, curr: &TreeNode, known: &mut KnownShapes) -> DiffOutcome {
    let mut newly_known = HashSet::new();
    let outcome = match prev {
        None => DiffOutcome::Full(encode_full(curr, known, &mut newly_known)),
        Some(prev) if prev.fingerprint() == curr.fingerprint() => {
            DiffOutcome::Patch(Patch::empty())
        }
        Some(prev) => match (prev, curr) {
            (TreeNode::Node(p), TreeNode::Node(c)) => {
                DiffOutcome::Patch(diff_node(p, c, known, &mut newly_known))
            }
            _ => DiffOutcome::Full(encode_full(curr, known, &mut newly_known)),
        },
    };
    known.commit(newly_known);
    outcome
}

/// Render `node` in full, omitting `s` for any shape already known:
/// either from a prior connection state (`known`) or from an earlier
/// occurrence of the same shape within this very render (`newly_known`,
/// e.g. two sibling `If` branches sharing a nested template).
fn encode_full(
    node: &TreeNode,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> TreeNode {
    let shape = node.shape();
    let include_statics = !known.is_known(shape) && !newly_known.contains(&shape);
    newly_known.insert(shape);
    match node {
        TreeNode::Node(n) => TreeNode::Node(NodeData {
            statics: if include_statics { n.statics.clone() } else { None },
            slots: n
                .slots
                .iter()
                .map(|s| encode_full_slot(s, known, newly_known))
                .collect(),
            shape: n.shape,
            fingerprint: n.fingerprint,
        }),
        TreeNode::Range(r) => TreeNode::Range(RangeData {
            statics: if include_statics { r.statics.clone() } else { None },
            items: r
                .items
                .iter()
                .map(|item| ItemData {
                    slots: item
                        .slots
                        .iter()
                        .map(|s| encode_full_slot(s, known, newly_known))
                        .collect(),
                })
                .collect(),
            item_ids: r.item_ids.clone(),
            shape: r.shape,
            fingerprint: r.fingerprint,
        }),
    }
}

fn encode_full_slot(
    slot: &SlotValue,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> SlotValue {
    match slot {
        SlotValue::Text(t) => SlotValue::Text(t.clone()),
        SlotValue::Child(c) => SlotValue::Child(encode_full(c, known, newly_known)),
    }
}

pub(super) fn encode_item(
    item: &ItemData,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> ItemData {
    ItemData {
        slots: item
            .slots
            .iter()
            .map(|s| encode_full_slot(s, known, newly_known))
            .collect(),
    }
}

fn full_patch_slot_for(
    node: &TreeNode,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> PatchSlot {
    match encode_full(node, known, newly_known) {
        full @ TreeNode::Node(_) => PatchSlot::FullNode(full),
        full @ TreeNode::Range(_) => PatchSlot::FullRange(full),
    }
}

fn diff_node(
    prev: &NodeData,
    curr: &NodeData,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> Patch {
    let mut patch = Patch::empty();
    for (i, (p, c)) in prev.slots.iter().zip(curr.slots.iter()).enumerate() {
        if let Some(slot_patch) = diff_slot(p, c, known, newly_known) {
            patch.slots.insert(i, slot_patch);
        }
    }
    patch
}

pub(super) fn diff_item(
    prev: &ItemData,
    curr: &ItemData,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> Patch {
    let mut patch = Patch::empty();
    for (i, (p, c)) in prev.slots.iter().zip(curr.slots.iter()).enumerate() {
        if let Some(slot_patch) = diff_slot(p, c, known, newly_known) {
            patch.slots.insert(i, slot_patch);
        }
    }
    patch
}

fn diff_slot(
    prev: &SlotValue,
    curr: &SlotValue,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> Option<PatchSlot> {
    match (prev, curr) {
        (SlotValue::Text(p), SlotValue::Text(c)) => {
            if p == c {
                None
            } else {
                Some(PatchSlot::Text(c.clone()))
            }
        }
        (SlotValue::Child(p), SlotValue::Child(c)) => diff_child(p, c, known, newly_known),
        (_, SlotValue::Text(c)) => Some(PatchSlot::Text(c.clone())),
        (_, SlotValue::Child(c)) => Some(full_patch_slot_for(c, known, newly_known)),
    }
}

fn diff_child(
    prev: &TreeNode,
    curr: &TreeNode,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> Option<PatchSlot> {
    if prev.fingerprint() == curr.fingerprint() {
        return None;
    }
    if prev.shape() != curr.shape() {
        return Some(full_patch_slot_for(curr, known, newly_known));
    }
    match (prev, curr) {
        (TreeNode::Node(p), TreeNode::Node(c)) => {
            Some(PatchSlot::Node(diff_node(p, c, known, newly_known)))
        }
        (TreeNode::Range(p), TreeNode::Range(c)) => {
            Some(diff_range(p, c, known, newly_known))
        }
        _ => unreachable!("equal shapes imply equal node/range kind"),
    }
}

fn diff_range(
    prev: &RangeData,
    curr: &RangeData,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> PatchSlot {
    let include_statics = !known.is_known(curr.shape) && !newly_known.contains(&curr.shape);
    newly_known.insert(curr.shape);
    let ops = range::diff_items(prev, curr, known, newly_known);
    let op_form = PatchSlot::Range {
        statics: if include_statics {
            curr.statics.clone()
        } else {
            None
        },
        ops,
    };

    // Fall back to a whole-list resend only when it is strictly smaller
    // than the incremental op list: when nearly every item
    // changed, op-per-item overhead can exceed just resending the list.
    let op_len = estimate_len(&op_form);
    let whole_form = full_patch_slot_for(&TreeNode::Range(curr.clone()), known, newly_known);
    let whole_len = estimate_len(&whole_form);
    if whole_len < op_len {
        whole_form
    } else {
        op_form
    }
}

fn estimate_len(slot: &PatchSlot) -> usize {
    serde_json::to_vec(slot).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
}

/// Apply the `full_tree_fallback_threshold` configuration option: once a
/// computed patch's wire size reaches `threshold_bytes`, compare it
/// against the cost of an unconditional full resend and use whichever
/// is smaller. `None` disables the comparison entirely (the patch,
/// however large, is always sent as-is) — matching the doc comment on
/// `DiffConfig::full_tree_fallback_threshold`. This mirrors, at the
/// whole-tree level, the per-range comparison `diff_range` already
/// performs unconditionally.
pub fn apply_full_tree_threshold(
    outcome: DiffOutcome,
    curr: &TreeNode,
    known: &mut KnownShapes,
    threshold_bytes: Option<usize>,
) -> DiffOutcome {
    let Some(threshold) = threshold_bytes else {
        return outcome;
    };
    match outcome {
        DiffOutcome::Patch(patch) if !patch.is_empty() => {
            let patch_len = serde_json::to_vec(&patch).map(|b| b.len()).unwrap_or(usize::MAX);
            if patch_len < threshold {
                return DiffOutcome::Patch(patch);
            }
            let mut newly_known = HashSet::new();
            let full = encode_full(curr, known, &mut newly_known);
            let full_len = serde_json::to_vec(&full).map(|b| b.len()).unwrap_or(usize::MAX);
            if full_len < patch_len {
                known.commit(newly_known);
                DiffOutcome::Full(full)
            } else {
                DiffOutcome::Patch(patch)
            }
        }
        other => other,
    }
}
