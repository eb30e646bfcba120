//! Reattachment of detached engine state.
//!
//! A deserialized snapshot references store rows by key only; those
//! references must be reconciled with a live connection before the engine
//! can use them. The walk covers the closed shape set of `StateNode`:
//! entities are merged through the engine's identity map, containers are
//! rebuilt element-wise, scalars pass through verbatim.

use crate::engine::{EngineSnapshot, EntityMerger, StateNode};
use crate::error::Result;

/// Walks one node, returning its attached equivalent.
pub fn reattach(node: StateNode, merger: &mut dyn EntityMerger) -> Result<StateNode> {
    match node {
        StateNode::Entity(entity) => Ok(StateNode::Entity(merger.merge(entity)?)),
        StateNode::Map(pairs) => {
            let mut rebuilt = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                rebuilt.push((reattach(key, merger)?, reattach(value, merger)?));
            }
            Ok(StateNode::Map(rebuilt))
        }
        StateNode::Seq(items) => {
            let mut rebuilt = Vec::with_capacity(items.len());
            for item in items {
                rebuilt.push(reattach(item, merger)?);
            }
            Ok(StateNode::Seq(rebuilt))
        }
        StateNode::Object(attrs) => {
            let mut rebuilt = std::collections::BTreeMap::new();
            for (name, value) in attrs {
                rebuilt.insert(name, reattach(value, merger)?);
            }
            Ok(StateNode::Object(rebuilt))
        }
        node @ (StateNode::Scalar(_) | StateNode::Transient) => Ok(node),
    }
}

pub fn reattach_opt(
    node: Option<StateNode>,
    merger: &mut dyn EntityMerger,
) -> Result<Option<StateNode>> {
    match node {
        Some(node) => Ok(Some(reattach(node, merger)?)),
        None => Ok(None),
    }
}

/// Reattaches every part of a snapshot in place.
pub fn reattach_snapshot(snapshot: EngineSnapshot, merger: &mut dyn EntityMerger) -> Result<EngineSnapshot> {
    Ok(EngineSnapshot {
        run_handle: reattach_opt(snapshot.run_handle, merger)?,
        best_result: reattach_opt(snapshot.best_result, merger)?,
        pending_result_callbacks: snapshot
            .pending_result_callbacks
            .into_iter()
            .map(|entry| reattach(entry, merger))
            .collect::<Result<Vec<_>>>()?,
        root_technique: reattach_opt(snapshot.root_technique, merger)?,
    })
}
