//! Subtree diffing.
//!
//! The differ compares a committed subtree snapshot ([`NodeView`]) against a
//! freshly built subtree ([`BuiltNode`]) and produces an ordered effect list
//! plus the staged records to install at commit. Matching follows type and
//! key at each level; keyed lists go through an LIS-based move-detection
//! pass so preserved relative order never produces effects.
//!
//! Effects inside a job reference nodes through [`LocalRef`], never through
//! the store: created nodes get job-local ordinals that the commit phase
//! resolves to real ids in tree order. Because resolution order is a pure
//! function of the merged job sequence, the parallel and sequential diff
//! paths yield identical effect lists.
//!
//! Canonical effect order for a matched node: its own `Update` first, then
//! `Delete`s of unmatched old children in old-list order, then per new child
//! in list order a `Move` (when its relative order changed) followed by that
//! child's own block. `Create` blocks are parent-first.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::builder::BuiltNode;
use crate::element::{prop_delta, Element, Props};
use crate::error::Diagnostic;
use crate::state::InstanceId;
use crate::store::{NodeId, NodeView};

/// Node reference local to one diff job.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum LocalRef {
    /// The subtree parent handed to the job by the scheduler.
    Parent,
    /// A node this job creates, by local ordinal.
    Local(u32),
    /// A node that already exists in the committed tree.
    Existing(NodeId),
}

/// One mutation in job-local reference space.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum JobEffect {
    Create {
        local: u32,
        parent: LocalRef,
        index: u32,
        tag: Arc<str>,
        props: Props,
    },
    Update {
        node: NodeId,
        delta: Props,
    },
    Delete {
        node: NodeId,
    },
    Move {
        node: NodeId,
        parent: LocalRef,
        index: u32,
    },
}

/// Record staged for installation at commit, in job-local reference space.
#[derive(Clone, Debug)]
pub(crate) struct StagedLocal {
    pub node: LocalRef,
    /// `LocalRef::Parent` on a job root; resolved by the commit phase.
    pub parent: LocalRef,
    pub tag: Arc<str>,
    pub key: Option<Arc<str>>,
    pub props: Props,
    pub children: Vec<LocalRef>,
    pub instance: Option<InstanceId>,
    pub input_children: Vec<Element>,
}

/// Output of one diff job.
#[derive(Clone, Debug)]
pub(crate) struct SubtreeDiff {
    /// Reference to the job's subtree root.
    pub root_ref: LocalRef,
    pub effects: Vec<JobEffect>,
    pub staged: Vec<StagedLocal>,
    /// Every committed node id freed by this job, parent before children.
    pub removed: Vec<NodeId>,
    pub diagnostics: Vec<Diagnostic>,
    /// Number of local ordinals this job allocated.
    pub fresh_count: u32,
}

/// One independent span of diff work: a single child position of the work
/// unit's root. `old` is `Some` when the owner matched a committed child.
#[derive(Debug)]
pub(crate) struct DiffJob {
    pub index: u32,
    pub old: Option<NodeView>,
    pub new: BuiltNode,
}

/// Runs one job to completion. Pure: no store access, no id allocation.
pub(crate) fn run_job(job: DiffJob) -> SubtreeDiff {
    let mut out = SubtreeDiff {
        root_ref: LocalRef::Parent,
        effects: Vec::new(),
        staged: Vec::new(),
        removed: Vec::new(),
        diagnostics: Vec::new(),
        fresh_count: 0,
    };
    let mut next_local = 0u32;
    out.root_ref = match job.old {
        Some(old) => {
            let self_ref = LocalRef::Existing(old.id);
            diff_matched(&mut next_local, &old, job.new, self_ref, LocalRef::Parent, &mut out);
            self_ref
        }
        None => create_subtree(&mut next_local, job.new, LocalRef::Parent, job.index, &mut out),
    };
    out.fresh_count = next_local;
    out
}

/// Diffs a matched (same type, same key-or-position) pair.
fn diff_matched(
    next_local: &mut u32,
    old: &NodeView,
    new: BuiltNode,
    self_ref: LocalRef,
    parent: LocalRef,
    out: &mut SubtreeDiff,
) {
    debug_assert_eq!(&old.tag, &new.tag);

    let delta = prop_delta(&old.props, &new.props);
    if !delta.is_empty() {
        out.effects.push(JobEffect::Update {
            node: old.id,
            delta,
        });
    }

    let plan = {
        let old_slots: Vec<SlotDesc<'_>> = old
            .children
            .iter()
            .map(|c| SlotDesc {
                tag: &c.tag,
                key: c.key.as_ref(),
            })
            .collect();
        let new_slots: Vec<SlotDesc<'_>> = new
            .children
            .iter()
            .map(|c| SlotDesc {
                tag: &c.tag,
                key: c.key.as_ref(),
            })
            .collect();
        plan_children(&old_slots, &new_slots)
    };

    for key in &plan.duplicate_keys {
        log::warn!("duplicate key `{key}` under `{}`", new.tag);
        out.diagnostics.push(Diagnostic::DuplicateKey {
            parent_tag: Arc::clone(&new.tag),
            key: Arc::clone(key),
        });
    }

    for &old_index in &plan.removed_old {
        let child = &old.children[old_index];
        log::trace!("delete {:?} ({})", child.id, child.tag);
        out.effects.push(JobEffect::Delete { node: child.id });
        child.collect_ids(&mut out.removed);
    }

    let mut child_refs = Vec::with_capacity(new.children.len());
    for (j, built_child) in new.children.into_iter().enumerate() {
        match plan.matches[j] {
            Some(old_index) => {
                let old_child = &old.children[old_index];
                let child_ref = LocalRef::Existing(old_child.id);
                if plan.moved[j] {
                    out.effects.push(JobEffect::Move {
                        node: old_child.id,
                        parent: self_ref,
                        index: j as u32,
                    });
                }
                diff_matched(next_local, old_child, built_child, child_ref, self_ref, out);
                child_refs.push(child_ref);
            }
            None => {
                child_refs.push(create_subtree(
                    next_local,
                    built_child,
                    self_ref,
                    j as u32,
                    out,
                ));
            }
        }
    }

    out.staged.push(StagedLocal {
        node: self_ref,
        parent,
        tag: new.tag,
        key: new.key,
        props: new.props,
        children: child_refs,
        instance: new.instance,
        input_children: new.input_children,
    });
}

/// Emits a parent-first `Create` block for an unmatched subtree.
fn create_subtree(
    next_local: &mut u32,
    new: BuiltNode,
    parent: LocalRef,
    index: u32,
    out: &mut SubtreeDiff,
) -> LocalRef {
    let ordinal = *next_local;
    *next_local += 1;
    let self_ref = LocalRef::Local(ordinal);
    out.effects.push(JobEffect::Create {
        local: ordinal,
        parent,
        index,
        tag: Arc::clone(&new.tag),
        props: new.props.clone(),
    });
    let mut child_refs = Vec::with_capacity(new.children.len());
    for (j, child) in new.children.into_iter().enumerate() {
        child_refs.push(create_subtree(next_local, child, self_ref, j as u32, out));
    }
    out.staged.push(StagedLocal {
        node: self_ref,
        parent,
        tag: new.tag,
        key: new.key,
        props: new.props,
        children: child_refs,
        instance: new.instance,
        input_children: new.input_children,
    });
    self_ref
}

/// One mutation in committed-tree reference space, as handed to the
/// native bridge.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Create {
        node: NodeId,
        /// `None` only when the tree root itself is created.
        parent: Option<NodeId>,
        index: u32,
        tag: Arc<str>,
        props: Props,
    },
    Update {
        node: NodeId,
        delta: Props,
    },
    Delete {
        node: NodeId,
    },
    Move {
        node: NodeId,
        parent: NodeId,
        index: u32,
    },
}

impl Effect {
    /// Node this effect addresses.
    pub fn node(&self) -> NodeId {
        match self {
            Effect::Create { node, .. }
            | Effect::Update { node, .. }
            | Effect::Delete { node }
            | Effect::Move { node, .. } => *node,
        }
    }
}

/// One child position of a work unit's root, as planned by the owner.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChildEntry {
    /// Final index in the root's new child list.
    pub index: u32,
    /// Matched committed child, when one exists.
    pub existing: Option<NodeId>,
    /// Whether the matched child's relative order changed.
    pub moved: bool,
}

/// Owner-side share of a work unit's diff: everything at the root level,
/// with per-child work factored out into jobs.
#[derive(Debug)]
pub(crate) struct UnitSkeleton {
    /// Reference to the unit root: existing, or owner ordinal 0 when the
    /// root itself is fresh.
    pub root_ref: LocalRef,
    /// Ordinals allocated by the owner (0 or 1); job ordinals follow.
    pub owner_fresh: u32,
    /// Root-level effects emitted before any child block: the root's own
    /// `Update` or `Create`, a `Delete` of a replaced root, and `Delete`s
    /// of unmatched old children.
    pub prelude: Vec<JobEffect>,
    /// Per new child of the root, aligned with the job list.
    pub child_entries: Vec<ChildEntry>,
    /// Staged record for the unit root; children are filled in at commit
    /// once every job's root reference is known.
    pub root_staged: StagedLocal,
    /// Committed ids freed at the root level (replaced root, unmatched old
    /// children), parent before children.
    pub removed: Vec<NodeId>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A work unit's diff, split into the owner skeleton and one job per child
/// of the unit root.
#[derive(Debug)]
pub(crate) struct PreparedUnit {
    pub skeleton: UnitSkeleton,
    pub jobs: Vec<DiffJob>,
}

/// Plans the root level of a work unit and partitions the root's children
/// into independent jobs.
///
/// Whether the jobs then run inline or on the worker pool does not change
/// the plan, so both paths assemble into identical effect lists.
pub(crate) fn prepare_unit(
    old: Option<NodeView>,
    built: BuiltNode,
    root_index: u32,
) -> PreparedUnit {
    let (matched, replaced) = match old {
        Some(view) if view.tag == built.tag && view.key == built.key => (Some(view), None),
        Some(view) => (None, Some(view)),
        None => (None, None),
    };

    match matched {
        Some(old_view) => prepare_matched_root(old_view, built),
        None => prepare_fresh_root(replaced, built, root_index),
    }
}

fn prepare_matched_root(old_view: NodeView, built: BuiltNode) -> PreparedUnit {
    let root_ref = LocalRef::Existing(old_view.id);
    let mut prelude = Vec::new();
    let mut removed = Vec::new();
    let mut diagnostics = Vec::new();

    let delta = prop_delta(&old_view.props, &built.props);
    if !delta.is_empty() {
        prelude.push(JobEffect::Update {
            node: old_view.id,
            delta,
        });
    }

    let plan = {
        let old_slots: Vec<SlotDesc<'_>> = old_view
            .children
            .iter()
            .map(|c| SlotDesc {
                tag: &c.tag,
                key: c.key.as_ref(),
            })
            .collect();
        let new_slots: Vec<SlotDesc<'_>> = built
            .children
            .iter()
            .map(|c| SlotDesc {
                tag: &c.tag,
                key: c.key.as_ref(),
            })
            .collect();
        plan_children(&old_slots, &new_slots)
    };

    for key in &plan.duplicate_keys {
        log::warn!("duplicate key `{key}` under `{}`", built.tag);
        diagnostics.push(Diagnostic::DuplicateKey {
            parent_tag: Arc::clone(&built.tag),
            key: Arc::clone(key),
        });
    }

    for &old_index in &plan.removed_old {
        let child = &old_view.children[old_index];
        prelude.push(JobEffect::Delete { node: child.id });
        child.collect_ids(&mut removed);
    }

    let mut old_children: Vec<Option<NodeView>> =
        old_view.children.into_iter().map(Some).collect();
    let mut jobs = Vec::with_capacity(built.children.len());
    let mut child_entries = Vec::with_capacity(built.children.len());
    for (j, built_child) in built.children.into_iter().enumerate() {
        match plan.matches[j] {
            Some(old_index) => {
                let old_child = old_children[old_index].take();
                let existing = old_child.as_ref().map(|c| c.id);
                child_entries.push(ChildEntry {
                    index: j as u32,
                    existing,
                    moved: plan.moved[j],
                });
                jobs.push(DiffJob {
                    index: j as u32,
                    old: old_child,
                    new: built_child,
                });
            }
            None => {
                child_entries.push(ChildEntry {
                    index: j as u32,
                    existing: None,
                    moved: false,
                });
                jobs.push(DiffJob {
                    index: j as u32,
                    old: None,
                    new: built_child,
                });
            }
        }
    }

    let root_staged = StagedLocal {
        node: root_ref,
        parent: LocalRef::Parent,
        tag: built.tag,
        key: built.key,
        props: built.props,
        children: Vec::new(),
        instance: built.instance,
        input_children: built.input_children,
    };

    PreparedUnit {
        skeleton: UnitSkeleton {
            root_ref,
            owner_fresh: 0,
            prelude,
            child_entries,
            root_staged,
            removed,
            diagnostics,
        },
        jobs,
    }
}

fn prepare_fresh_root(
    replaced: Option<NodeView>,
    built: BuiltNode,
    root_index: u32,
) -> PreparedUnit {
    let mut prelude = Vec::new();
    let mut removed = Vec::new();

    if let Some(old_view) = replaced {
        prelude.push(JobEffect::Delete { node: old_view.id });
        old_view.collect_ids(&mut removed);
    }

    let root_ref = LocalRef::Local(0);
    prelude.push(JobEffect::Create {
        local: 0,
        parent: LocalRef::Parent,
        index: root_index,
        tag: Arc::clone(&built.tag),
        props: built.props.clone(),
    });

    let mut jobs = Vec::with_capacity(built.children.len());
    let mut child_entries = Vec::with_capacity(built.children.len());
    for (j, built_child) in built.children.into_iter().enumerate() {
        child_entries.push(ChildEntry {
            index: j as u32,
            existing: None,
            moved: false,
        });
        jobs.push(DiffJob {
            index: j as u32,
            old: None,
            new: built_child,
        });
    }

    let root_staged = StagedLocal {
        node: root_ref,
        parent: LocalRef::Parent,
        tag: built.tag,
        key: built.key,
        props: built.props,
        children: Vec::new(),
        instance: built.instance,
        input_children: built.input_children,
    };

    PreparedUnit {
        skeleton: UnitSkeleton {
            root_ref,
            owner_fresh: 1,
            prelude,
            child_entries,
            root_staged,
            removed,
            diagnostics: Vec::new(),
        },
        jobs,
    }
}

/// Identity of one child slot, as seen by the matcher.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SlotDesc<'a> {
    pub tag: &'a Arc<str>,
    pub key: Option<&'a Arc<str>>,
}

/// Result of matching one old child list against one new child list.
///
/// The same plan drives both the tree builder (instance reuse) and the
/// differ (effect emission), so the two can never disagree about identity.
#[derive(Debug)]
pub(crate) struct ChildPlan {
    /// Per new index, the matched old index.
    pub matches: Vec<Option<usize>>,
    /// Unmatched old indices, in old-list order.
    pub removed_old: Vec<usize>,
    /// Per new index, whether a matched child needs a `Move`.
    pub moved: Vec<bool>,
    /// Keys that appeared more than once on either side.
    pub duplicate_keys: Vec<Arc<str>>,
}

pub(crate) fn plan_children(old: &[SlotDesc<'_>], new: &[SlotDesc<'_>]) -> ChildPlan {
    let mut duplicate_keys: Vec<Arc<str>> = Vec::new();

    // First occurrence wins; later old children under the same key are
    // unmatched by fiat.
    let mut by_key: HashMap<&Arc<str>, usize, ahash::RandomState> = HashMap::default();
    let mut old_unkeyed: Vec<usize> = Vec::new();
    for (i, slot) in old.iter().enumerate() {
        match slot.key {
            Some(key) => {
                if by_key.contains_key(key) {
                    if !duplicate_keys.contains(key) {
                        duplicate_keys.push(Arc::clone(key));
                    }
                } else {
                    by_key.insert(key, i);
                }
            }
            None => old_unkeyed.push(i),
        }
    }

    let mut matches = vec![None; new.len()];
    let mut seen_new_keys: HashMap<&Arc<str>, (), ahash::RandomState> = HashMap::default();
    let mut unkeyed_cursor = 0usize;
    for (j, slot) in new.iter().enumerate() {
        match slot.key {
            Some(key) => {
                if seen_new_keys.insert(key, ()).is_some() {
                    if !duplicate_keys.contains(key) {
                        duplicate_keys.push(Arc::clone(key));
                    }
                    continue;
                }
                // Key match still requires an identical type; a mismatch
                // consumes the old child so it gets deleted.
                if let Some(old_index) = by_key.remove(key) {
                    if old[old_index].tag == slot.tag {
                        matches[j] = Some(old_index);
                    }
                }
            }
            None => {
                // Positional pairing among unkeyed slots. A type mismatch
                // consumes both sides.
                if unkeyed_cursor < old_unkeyed.len() {
                    let old_index = old_unkeyed[unkeyed_cursor];
                    unkeyed_cursor += 1;
                    if old[old_index].tag == slot.tag {
                        matches[j] = Some(old_index);
                    }
                }
            }
        }
    }

    let mut used_old = vec![false; old.len()];
    for matched in matches.iter().flatten() {
        used_old[*matched] = true;
    }
    let removed_old = (0..old.len()).filter(|&i| !used_old[i]).collect();

    // Children whose relative order is preserved stay put; the rest move.
    let matched_positions: Vec<usize> = (0..new.len()).filter(|&j| matches[j].is_some()).collect();
    let old_sequence: Vec<usize> = matched_positions
        .iter()
        .map(|&j| matches[j].unwrap_or_default())
        .collect();
    let stationary = stationary_mask(&old_sequence);
    let mut moved = vec![false; new.len()];
    for (seq_index, &j) in matched_positions.iter().enumerate() {
        moved[j] = !stationary[seq_index];
    }

    ChildPlan {
        matches,
        removed_old,
        moved,
        duplicate_keys,
    }
}

/// Marks the longest strictly increasing subsequence of `values`.
fn stationary_mask(values: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; values.len()];
    for (i, &value) in values.iter().enumerate() {
        let pos = tails.partition_point(|&t| values[t] < value);
        prev[i] = if pos > 0 { Some(tails[pos - 1]) } else { None };
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }
    let mut mask = vec![false; values.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        mask[i] = true;
        cursor = prev[i];
    }
    mask
}
