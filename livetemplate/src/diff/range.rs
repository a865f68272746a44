//! Keyed range reconciliation: turns two `RangeData`s that share a
//! shape into a list of insert/remove/update/reorder ops, the way
//! `morphdom.rs::diff_keyed_children` turned two keyed child lists into
//! insert/remove/move ops over a `key`/`data-key` attribute. Identity
//! here is the range's stable `ItemId`, not an HTML attribute.

use super::engine::{diff_item, encode_item, KnownShapes};
use crate::boundary::StructuralHash;
use crate::tree::{ItemId, Position, RangeData, RangePatchOp};
use std::collections::{HashMap, HashSet};

pub(super) fn diff_items(
    prev: &RangeData,
    curr: &RangeData,
    known: &KnownShapes,
    newly_known: &mut HashSet<StructuralHash>,
) -> Vec<RangePatchOp> {
    let prev_pos: HashMap<&ItemId, usize> = prev
        .item_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();
    let curr_pos: HashMap<&ItemId, usize> = curr
        .item_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();

    let mut ops = Vec::new();

    for id in &prev.item_ids {
        if !curr_pos.contains_key(id) {
            ops.push(RangePatchOp::Remove { id: id.clone() });
        }
    }

    for (i, id) in curr.item_ids.iter().enumerate() {
        match prev_pos.get(id) {
            None => {
                let item = encode_item(&curr.items[i], known, newly_known);
                let (after_id, position) = if i == 0 {
                    (None, Position::Start)
                } else {
                    (Some(curr.item_ids[i - 1].clone()), Position::Index(i))
                };
                ops.push(RangePatchOp::Insert {
                    after_id,
                    position,
                    item,
                });
            }
            Some(&prev_i) => {
                let prev_item = &prev.items[prev_i];
                let curr_item = &curr.items[i];
                if prev_item.slots != curr_item.slots {
                    let sub_patch = diff_item(prev_item, curr_item, known, newly_known);
                    if !sub_patch.is_empty() {
                        ops.push(RangePatchOp::Update {
                            id: id.clone(),
                            sub_patch,
                        });
                    }
                }
            }
        }
    }

    let prev_common: Vec<&ItemId> = prev
        .item_ids
        .iter()
        .filter(|id| curr_pos.contains_key(id))
        .collect();
    let curr_common: Vec<&ItemId> = curr
        .item_ids
        .iter()
        .filter(|id| prev_pos.contains_key(id))
        .collect();
    if prev_common != curr_common {
        ops.push(RangePatchOp::Reorder {
            order: curr.item_ids.clone(),
        });
    }

    ops
}
