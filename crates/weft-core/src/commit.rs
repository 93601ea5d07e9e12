//! Commit assembly: resolving job-local references into committed ids and
//! merging per-child diffs into one ordered effect batch.
//!
//! Merge order is keyed by child position, never by completion time, so the
//! assembled batch is identical whether jobs ran inline or on the pool.

use crate::diff::{Effect, JobEffect, LocalRef, StagedLocal, SubtreeDiff, UnitSkeleton};
use crate::error::{BridgeError, Diagnostic};
use crate::store::{NodeId, NodeRecord, NodeStore};

/// One commit's worth of ordered effects, handed to the native bridge.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitBatch {
    /// Monotonic commit revision.
    pub revision: u64,
    pub effects: Vec<Effect>,
}

/// Executes effect batches against real views.
///
/// Implementations must apply effects in stream order. A failure names the
/// first effect that could not be applied; the committed tree is not rolled
/// back, and the remaining effects are retried on a later tick.
pub trait NativeBridge {
    fn apply(&mut self, batch: &CommitBatch) -> Result<(), BridgeError>;
}

/// A fully resolved work unit, ready to install.
pub(crate) struct AssembledUnit {
    pub root_id: NodeId,
    pub effects: Vec<Effect>,
    pub records: Vec<NodeRecord>,
    pub removed: Vec<NodeId>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolves a unit's skeleton and per-child results into committed-tree
/// references. Fresh ids are assigned in ordinal order: owner ordinals
/// first, then each job's in child order.
pub(crate) fn assemble_unit(
    nodes: &mut NodeStore,
    outer_parent: Option<NodeId>,
    skeleton: UnitSkeleton,
    results: Vec<SubtreeDiff>,
) -> AssembledUnit {
    let mut offsets = Vec::with_capacity(results.len());
    let mut total_fresh = skeleton.owner_fresh;
    for result in &results {
        offsets.push(total_fresh);
        total_fresh += result.fresh_count;
    }
    let fresh_ids: Vec<NodeId> = (0..total_fresh).map(|_| nodes.allocate()).collect();

    let root_id = match skeleton.root_ref {
        LocalRef::Existing(id) => id,
        LocalRef::Local(ordinal) => fresh_ids[ordinal as usize],
        LocalRef::Parent => unreachable!("a unit root cannot be its own outer parent"),
    };

    let resolve = |offset: u32, reference: LocalRef| -> NodeId {
        match reference {
            LocalRef::Parent => root_id,
            LocalRef::Local(ordinal) => fresh_ids[(offset + ordinal) as usize],
            LocalRef::Existing(id) => id,
        }
    };

    let mut effects = Vec::new();
    for effect in skeleton.prelude {
        effects.push(match effect {
            JobEffect::Create {
                local,
                parent: _,
                index,
                tag,
                props,
            } => Effect::Create {
                node: fresh_ids[local as usize],
                // The only owner-level create is the unit root itself.
                parent: outer_parent,
                index,
                tag,
                props,
            },
            JobEffect::Update { node, delta } => Effect::Update { node, delta },
            JobEffect::Delete { node } => Effect::Delete { node },
            JobEffect::Move {
                node,
                parent,
                index,
            } => Effect::Move {
                node,
                parent: resolve(0, parent),
                index,
            },
        });
    }

    let mut records = Vec::new();
    let mut removed = skeleton.removed;
    let mut diagnostics = skeleton.diagnostics;
    let mut root_children = Vec::with_capacity(skeleton.child_entries.len());

    for ((entry, result), offset) in skeleton
        .child_entries
        .iter()
        .zip(results)
        .zip(offsets.iter().copied())
    {
        root_children.push(resolve(offset, result.root_ref));
        if entry.moved {
            if let Some(node) = entry.existing {
                effects.push(Effect::Move {
                    node,
                    parent: root_id,
                    index: entry.index,
                });
            }
        }
        for effect in result.effects {
            effects.push(match effect {
                JobEffect::Create {
                    local,
                    parent,
                    index,
                    tag,
                    props,
                } => Effect::Create {
                    node: fresh_ids[(offset + local) as usize],
                    parent: Some(resolve(offset, parent)),
                    index,
                    tag,
                    props,
                },
                JobEffect::Update { node, delta } => Effect::Update { node, delta },
                JobEffect::Delete { node } => Effect::Delete { node },
                JobEffect::Move {
                    node,
                    parent,
                    index,
                } => Effect::Move {
                    node,
                    parent: resolve(offset, parent),
                    index,
                },
            });
        }
        for staged in result.staged {
            records.push(staged_to_record(staged, |r| resolve(offset, r)));
        }
        removed.extend(result.removed);
        diagnostics.extend(result.diagnostics);
    }

    let root_staged = skeleton.root_staged;
    records.push(NodeRecord {
        id: root_id,
        parent: outer_parent,
        tag: root_staged.tag,
        key: root_staged.key,
        props: root_staged.props,
        children: root_children.into_iter().collect(),
        instance: root_staged.instance,
        input_children: root_staged.input_children,
    });

    AssembledUnit {
        root_id,
        effects,
        records,
        removed,
        diagnostics,
    }
}

fn staged_to_record(staged: StagedLocal, resolve: impl Fn(LocalRef) -> NodeId) -> NodeRecord {
    NodeRecord {
        id: resolve(staged.node),
        parent: Some(resolve(staged.parent)),
        tag: staged.tag,
        key: staged.key,
        props: staged.props,
        children: staged.children.into_iter().map(&resolve).collect(),
        instance: staged.instance,
        input_children: staged.input_children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuiltNode;
    use crate::diff::{prepare_unit, run_job};
    use crate::element::{PropValue, Props};
    use crate::store::NodeView;
    use std::sync::Arc;

    fn props(pairs: &[(&str, i64)]) -> Props {
        pairs
            .iter()
            .map(|(name, value)| (Arc::from(*name), PropValue::Int(*value)))
            .collect()
    }

    #[test]
    fn fresh_mount_assembles_parent_first_creates() {
        let mut nodes = NodeStore::new();
        let built = BuiltNode::for_tests(
            "view",
            None,
            props(&[("w", 1)]),
            vec![
                BuiltNode::for_tests("text", None, props(&[("t", 1)]), vec![]),
                BuiltNode::for_tests("text", None, props(&[("t", 2)]), vec![]),
            ],
        );
        let prepared = prepare_unit(None, built, 0);
        let results: Vec<SubtreeDiff> = prepared.jobs.into_iter().map(run_job).collect();
        let assembled = assemble_unit(&mut nodes, None, prepared.skeleton, results);

        assert_eq!(assembled.effects.len(), 3);
        let root_id = assembled.root_id;
        match &assembled.effects[0] {
            Effect::Create { node, parent, index, tag, .. } => {
                assert_eq!(*node, root_id);
                assert_eq!(*parent, None);
                assert_eq!(*index, 0);
                assert_eq!(&**tag, "view");
            }
            other => panic!("expected root create, got {other:?}"),
        }
        for (j, effect) in assembled.effects[1..].iter().enumerate() {
            match effect {
                Effect::Create { parent, index, .. } => {
                    assert_eq!(*parent, Some(root_id));
                    assert_eq!(*index, j as u32);
                }
                other => panic!("expected child create, got {other:?}"),
            }
        }
        // Every staged record resolves to an allocated id.
        assert_eq!(assembled.records.len(), 3);
        let root_record = assembled
            .records
            .iter()
            .find(|record| record.id == root_id)
            .unwrap();
        assert_eq!(root_record.children.len(), 2);
    }

    #[test]
    fn merge_order_is_positional_not_completion_order() {
        let mut nodes_a = NodeStore::new();
        let mut nodes_b = NodeStore::new();
        let build = || {
            BuiltNode::for_tests(
                "view",
                None,
                Props::default(),
                (0..4)
                    .map(|i| BuiltNode::for_tests("text", None, props(&[("t", i)]), vec![]))
                    .collect(),
            )
        };

        let prepared_a = prepare_unit(None, build(), 0);
        let results_a: Vec<SubtreeDiff> = prepared_a.jobs.into_iter().map(run_job).collect();
        let assembled_a = assemble_unit(&mut nodes_a, None, prepared_a.skeleton, results_a);

        // Same jobs, run in reverse completion order.
        let prepared_b = prepare_unit(None, build(), 0);
        let mut indexed: Vec<(usize, SubtreeDiff)> = prepared_b
            .jobs
            .into_iter()
            .enumerate()
            .rev()
            .map(|(j, job)| (j, run_job(job)))
            .collect();
        indexed.sort_by_key(|(j, _)| *j);
        let results_b: Vec<SubtreeDiff> = indexed.into_iter().map(|(_, diff)| diff).collect();
        let assembled_b = assemble_unit(&mut nodes_b, None, prepared_b.skeleton, results_b);

        assert_eq!(assembled_a.effects, assembled_b.effects);
    }

    #[test]
    fn replaced_root_deletes_before_creating() {
        let mut nodes = NodeStore::new();
        // Seed a committed root so the view has a real id.
        let old_id = nodes.allocate();
        nodes
            .install(NodeRecord {
                id: old_id,
                parent: None,
                tag: Arc::from("text"),
                key: None,
                props: Props::default(),
                children: Default::default(),
                instance: None,
                input_children: Vec::new(),
            })
            .unwrap();
        let old_view = NodeView {
            id: old_id,
            tag: Arc::from("text"),
            key: None,
            props: Props::default(),
            instance: None,
            children: Vec::new(),
        };

        let built = BuiltNode::for_tests("view", None, Props::default(), vec![]);
        let prepared = prepare_unit(Some(old_view), built, 0);
        let results: Vec<SubtreeDiff> = prepared.jobs.into_iter().map(run_job).collect();
        let assembled = assemble_unit(&mut nodes, None, prepared.skeleton, results);

        assert!(matches!(assembled.effects[0], Effect::Delete { node } if node == old_id));
        assert!(matches!(assembled.effects[1], Effect::Create { .. }));
        assert_eq!(assembled.removed, vec![old_id]);
    }
}
