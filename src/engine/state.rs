//! Serializable engine-state graph.
//!
//! The search engine's resumable objects are not designed for persistence
//! portability, so the checkpoint carries them as a generic tree over a
//! small closed set of shapes. On resume the tree is walked and every
//! store-backed entity is merged into a live identity map (see
//! `session::reattach`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One node of the engine's detached object graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateNode {
    /// A store-backed entity that must be re-associated with a live
    /// connection on resume.
    Entity(EntityRef),
    /// A mapping; both keys and values are walked on reattachment.
    Map(Vec<(StateNode, StateNode)>),
    /// An ordered (or order-insignificant) collection.
    Seq(Vec<StateNode>),
    /// An attribute-bearing object of unknown type.
    Object(BTreeMap<String, StateNode>),
    /// A plain value, returned verbatim by the reattachment walk.
    Scalar(serde_json::Value),
    /// A value that cannot survive serialization, e.g. a callback hook
    /// wrapping a bare function. Pending-callback entries carrying one of
    /// these are dropped before the checkpoint is written.
    Transient,
}

impl StateNode {
    pub fn scalar(value: impl Into<serde_json::Value>) -> Self {
        StateNode::Scalar(value.into())
    }

    /// True when any entity in the subtree is still detached from a live
    /// connection. Used to verify reattachment.
    pub fn has_detached_entity(&self) -> bool {
        match self {
            StateNode::Entity(entity) => !entity.attached,
            StateNode::Map(pairs) => pairs
                .iter()
                .any(|(k, v)| k.has_detached_entity() || v.has_detached_entity()),
            StateNode::Seq(items) => items.iter().any(StateNode::has_detached_entity),
            StateNode::Object(attrs) => attrs.values().any(StateNode::has_detached_entity),
            StateNode::Scalar(_) | StateNode::Transient => false,
        }
    }
}

/// A reference to one row of some store, identified by table name and
/// primary-key values. `attached` tracks whether the reference has been
/// reconciled with a live connection since deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub table: String,
    pub key: Vec<String>,
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub attached: bool,
}

impl EntityRef {
    pub fn new(table: impl Into<String>, key: Vec<String>) -> Self {
        Self { table: table.into(), key, fields: BTreeMap::new(), attached: false }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Identity-map seam: reconciles a detached entity with the live row of
/// the same primary key, returning the merged (attached) instance.
pub trait EntityMerger {
    fn merge(&mut self, entity: EntityRef) -> Result<EntityRef>;
}

/// The engine's opaque resumable state, round-tripped through the
/// checkpoint without interpretation beyond the reattachment walk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// The engine's internal run handle.
    pub run_handle: Option<StateNode>,
    /// Best result found so far, as the engine represents it.
    pub best_result: Option<StateNode>,
    /// Results still awaiting an engine-side callback. Entries are
    /// `Seq([result, hook])` pairs.
    pub pending_result_callbacks: Vec<StateNode>,
    /// The engine's internal search-technique object.
    pub root_technique: Option<StateNode>,
}

impl EngineSnapshot {
    /// Drops pending-callback entries whose hook is a bare function.
    /// Those cannot be faithfully reattached; they are transient
    /// optimizations, not correctness-critical.
    pub fn strip_transient_callbacks(&mut self) {
        self.pending_result_callbacks.retain(|entry| !is_transient_entry(entry));
    }
}

fn is_transient_entry(entry: &StateNode) -> bool {
    match entry {
        StateNode::Transient => true,
        StateNode::Seq(items) => items.iter().any(|i| matches!(i, StateNode::Transient)),
        _ => false,
    }
}
