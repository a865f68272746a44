//! The wire format: `TreeNode` objects and `RangePatchOp` arrays.
//!
//! `TreeNode` and `Patch` are hand-serialized (rather than derived)
//! because their shape is positional: numeric string keys "0", "1", and so on
//! which `#[derive(Serialize)]` cannot express. The hand-rolled
//! encoder/decoder pair here plays the same role as `diff/patch.rs`'s
//! manual binary codec (`write_op`/`read_op`) in the prior HTML-diff
//! module, adapted from a length-prefixed binary form to this crate's
//! JSON wire form.

use crate::boundary::StructuralHash;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Content hash over a tree's statics and dynamic values, used only to
/// short-circuit the diff engine. Never
/// serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

/// Stable identifier for one item of a range, tracked alongside (not
/// inside) the wire values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single dynamic slot's value.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Text(String),
    Child(TreeNode),
}

/// A node-shaped `TreeNode`: a flat, dense list of numeric-keyed
/// dynamic slots plus an optional `s` array.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub statics: Option<Vec<String>>,
    pub slots: Vec<SlotValue>,
    pub shape: StructuralHash,
    pub fingerprint: Fingerprint,
}

/// One range item: dynamics only, no own `s` (shared by the range).
#[derive(Debug, Clone, PartialEq)]
pub struct ItemData {
    pub slots: Vec<SlotValue>,
}

/// A range-shaped `TreeNode`: `{"s": [...], "d": [...]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeData {
    pub statics: Option<Vec<String>>,
    pub items: Vec<ItemData>,
    /// Parallel key list, one id per `items` entry: the identifier is
    /// not stored inside the node values but tracked alongside them
    /// via this parallel key list. Never serialized.
    pub item_ids: Vec<ItemId>,
    pub shape: StructuralHash,
    pub fingerprint: Fingerprint,
}

/// The canonical wire object.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Node(NodeData),
    Range(RangeData),
}

impl TreeNode {
    pub fn shape(&self) -> StructuralHash {
        match self {
            TreeNode::Node(n) => n.shape,
            TreeNode::Range(r) => r.shape,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            TreeNode::Node(n) => n.fingerprint,
            TreeNode::Range(r) => r.fingerprint,
        }
    }

}

fn hash_slot(slot: &SlotValue, hasher: &mut impl Hasher) {
    match slot {
        SlotValue::Text(t) => {
            0u8.hash(hasher);
            t.hash(hasher);
        }
        SlotValue::Child(node) => {
            1u8.hash(hasher);
            node.fingerprint().hash(hasher);
        }
    }
}

/// Compute the content fingerprint of a node given its already-computed
/// children fingerprints (children are fingerprinted first, bottom-up,
/// by the generator).
pub fn fingerprint_node(statics: Option<&[String]>, slots: &[SlotValue]) -> Fingerprint {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    statics.hash(&mut hasher);
    for slot in slots {
        hash_slot(slot, &mut hasher);
    }
    Fingerprint(hasher.finish())
}

pub fn fingerprint_range(
    statics: Option<&[String]>,
    items: &[ItemData],
    item_ids: &[ItemId],
) -> Fingerprint {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    statics.hash(&mut hasher);
    for (item, id) in items.iter().zip(item_ids) {
        id.hash(&mut hasher);
        for slot in &item.slots {
            hash_slot(slot, &mut hasher);
        }
    }
    Fingerprint(hasher.finish())
}

// ---------------------------------------------------------------------
// Wire serialization: `TreeNode`
// ---------------------------------------------------------------------

impl Serialize for TreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TreeNode::Node(n) => n.serialize(serializer),
            TreeNode::Range(r) => r.serialize(serializer),
        }
    }
}

impl Serialize for NodeData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.statics.is_some() as usize + self.slots.len();
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(statics) = &self.statics {
            map.serialize_entry("s", statics)?;
        }
        for (i, slot) in self.slots.iter().enumerate() {
            map.serialize_entry(&i.to_string(), slot)?;
        }
        map.end()
    }
}

impl Serialize for SlotValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SlotValue::Text(t) => serializer.serialize_str(t),
            SlotValue::Child(node) => node.serialize(serializer),
        }
    }
}

impl Serialize for ItemData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.slots.len()))?;
        for (i, slot) in self.slots.iter().enumerate() {
            map.serialize_entry(&i.to_string(), slot)?;
        }
        map.end()
    }
}

impl Serialize for RangeData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.statics.is_some() as usize + 1;
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(statics) = &self.statics {
            map.serialize_entry("s", statics)?;
        }
        map.serialize_entry("d", &self.items)?;
        map.end()
    }
}

// ---------------------------------------------------------------------
// Wire deserialization: `TreeNode` (used by this crate's own tests and
// by any host that round-trips a tree, e.g. for snapshotting).
// ---------------------------------------------------------------------

impl<'de> Deserialize<'de> for TreeNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawNode::deserialize(deserializer)?;
        Ok(raw.into_tree_node())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSlot {
    Text(String),
    Node(RawNode),
}

struct RawNode {
    statics: Option<Vec<String>>,
    numeric: BTreeMap<usize, RawSlot>,
    d: Option<Vec<BTreeMap<usize, RawSlot>>>,
}

impl RawNode {
    fn into_tree_node(self) -> TreeNode {
        if let Some(d) = self.d {
            let items = d
                .into_iter()
                .map(|slots| ItemData {
                    slots: slots.into_values().map(RawSlot::into_slot_value).collect(),
                })
                .collect::<Vec<_>>();
            let item_ids = (0..items.len())
                .map(|i| ItemId(i.to_string()))
                .collect::<Vec<_>>();
            let shape = StructuralHash(0);
            let fingerprint = fingerprint_range(self.statics.as_deref(), &items, &item_ids);
            TreeNode::Range(RangeData {
                statics: self.statics,
                items,
                item_ids,
                shape,
                fingerprint,
            })
        } else {
            let slots = self
                .numeric
                .into_values()
                .map(RawSlot::into_slot_value)
                .collect::<Vec<_>>();
            let shape = StructuralHash(0);
            let fingerprint = fingerprint_node(self.statics.as_deref(), &slots);
            TreeNode::Node(NodeData {
                statics: self.statics,
                slots,
                shape,
                fingerprint,
            })
        }
    }
}

impl RawSlot {
    fn into_slot_value(self) -> SlotValue {
        match self {
            RawSlot::Text(t) => SlotValue::Text(t),
            RawSlot::Node(n) => SlotValue::Child(n.into_tree_node()),
        }
    }
}

impl<'de> Deserialize<'de> for RawNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawNodeVisitor;
        impl<'de> Visitor<'de> for RawNodeVisitor {
            type Value = RawNode;
            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a tree node object")
            }
            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawNode, A::Error> {
                let mut statics = None;
                let mut numeric = BTreeMap::new();
                let mut d = None;
                while let Some(key) = map.next_key::<String>()? {
                    if key == "s" {
                        statics = Some(map.next_value::<Vec<String>>()?);
                    } else if key == "d" {
                        d = Some(map.next_value::<Vec<BTreeMap<usize, RawSlot>>>()?);
                    } else if key == "f" {
                        let _ = map.next_value::<de::IgnoredAny>()?;
                    } else if let Ok(idx) = key.parse::<usize>() {
                        numeric.insert(idx, map.next_value::<RawSlot>()?);
                    } else {
                        let _ = map.next_value::<de::IgnoredAny>()?;
                    }
                }
                Ok(RawNode { statics, numeric, d })
            }
        }
        deserializer.deserialize_map(RawNodeVisitor)
    }
}

// ---------------------------------------------------------------------
// Patch types
// ---------------------------------------------------------------------

/// Where an inserted item lands relative to its neighbors.
#[derive(Debug, Clone, PartialEq)]
pub enum Position {
    Start,
    End,
    Index(usize),
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Position::Start => serializer.serialize_str("start"),
            Position::End => serializer.serialize_str("end"),
            Position::Index(i) => serializer.serialize_u64(*i as u64),
        }
    }
}

/// One incremental change to a range.
#[derive(Debug, Clone, PartialEq)]
pub enum RangePatchOp {
    Insert {
        after_id: Option<ItemId>,
        position: Position,
        item: ItemData,
    },
    Remove {
        id: ItemId,
    },
    Update {
        id: ItemId,
        sub_patch: Patch,
    },
    Reorder {
        order: Vec<ItemId>,
    },
}

impl Serialize for RangePatchOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RangePatchOp::Insert {
                after_id,
                position,
                item,
            } => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element("i")?;
                seq.serialize_element(&after_id.as_ref().map(|i| i.0.as_str()))?;
                seq.serialize_element(position)?;
                seq.serialize_element(item)?;
                seq.end()
            }
            RangePatchOp::Remove { id } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("r")?;
                seq.serialize_element(&id.0)?;
                seq.end()
            }
            RangePatchOp::Update { id, sub_patch } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("u")?;
                seq.serialize_element(&id.0)?;
                seq.serialize_element(sub_patch)?;
                seq.end()
            }
            RangePatchOp::Reorder { order } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("o")?;
                let ids: Vec<&str> = order.iter().map(|i| i.0.as_str()).collect();
                seq.serialize_element(&ids)?;
                seq.end()
            }
        }
    }
}

/// A value at one patched slot.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchSlot {
    /// A changed plain-string slot.
    Text(String),
    /// A changed nested node, recursively patched (its `s` stripped
    /// unless its shape is not yet known to the receiver, see
    /// [`Patch`]'s `new_shape` flag).
    Node(Patch),
    /// A changed nested node whose shape the receiver has never seen:
    /// sent in full, including `s`.
    FullNode(TreeNode),
    /// A changed range slot, incrementally patched via ops.
    Range {
        statics: Option<Vec<String>>,
        ops: Vec<RangePatchOp>,
    },
    /// A changed range slot sent as a whole new list (chosen when that
    /// is smaller than the op-list form).
    FullRange(TreeNode),
}

impl Serialize for PatchSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PatchSlot::Text(t) => serializer.serialize_str(t),
            PatchSlot::Node(p) => p.serialize(serializer),
            PatchSlot::FullNode(n) => n.serialize(serializer),
            PatchSlot::Range { statics, ops } => {
                let len = statics.is_some() as usize + 1;
                let mut map = serializer.serialize_map(Some(len))?;
                if let Some(s) = statics {
                    map.serialize_entry("s", s)?;
                }
                map.serialize_entry("d", ops)?;
                map.end()
            }
            PatchSlot::FullRange(n) => n.serialize(serializer),
        }
    }
}

/// A `TreeNode` containing only the slots
/// that changed. An empty patch serializes as `{}`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    pub slots: BTreeMap<usize, PatchSlot>,
}

impl Patch {
    pub fn empty() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Serialize for Patch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.slots.len()))?;
        for (i, slot) in &self.slots {
            map.serialize_entry(&i.to_string(), slot)?;
        }
        map.end()
    }
}
