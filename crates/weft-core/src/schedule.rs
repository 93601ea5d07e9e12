//! Prioritized, interruptible scheduling of reconciliation work.
//!
//! The scheduler owns the render-request queue. Requests against the same
//! subtree root coalesce (last one wins, by generation), the queue is
//! bounded with oldest-lowest-priority eviction, and in-flight work units
//! are preempted whenever a higher-priority request arrives. Stale work is
//! detected by comparing a unit's generation against the root's latest.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::diff::{DiffJob, SubtreeDiff, UnitSkeleton};
use crate::error::Diagnostic;
use crate::state::InstanceId;
use crate::store::NodeId;

/// Urgency of a render request: user interaction outranks data updates,
/// data updates outrank background work.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Priority {
    UserInteraction,
    DataUpdate,
    Background,
}

impl Priority {
    /// Numeric rank; lower is more urgent.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Priority::UserInteraction => 0,
            Priority::DataUpdate => 1,
            Priority::Background => 2,
        }
    }

    pub fn outranks(self, other: Priority) -> bool {
        self.rank() < other.rank()
    }
}

/// Subtree root named by a render request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DirtyRoot {
    /// The whole mounted tree.
    Tree,
    /// The committed node wrapping a dirty component instance.
    Node(NodeId),
}

/// One coalesced render request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RenderRequest {
    pub root: DirtyRoot,
    pub priority: Priority,
    pub generation: u64,
}

/// Work unit state machine. `Committed` and `Aborted` are terminal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WorkPhase {
    Queued,
    Building,
    Diffing,
    Ready,
    Committed,
    Aborted,
}

/// An interruptible slice of reconciliation work for one subtree root.
pub(crate) struct WorkUnit {
    pub root: DirtyRoot,
    pub priority: Priority,
    pub generation: u64,
    pub phase: WorkPhase,
    /// Committed parent of the unit root, fixed at build time.
    pub outer_parent: Option<NodeId>,
    /// Instances created by this unit's build pass; destroyed on abort.
    pub created_instances: Vec<InstanceId>,
    pub skeleton: Option<UnitSkeleton>,
    /// Jobs not yet executed or dispatched, keyed by position.
    pub pending: VecDeque<(u32, DiffJob)>,
    /// Jobs dispatched to the pool and still outstanding.
    pub awaiting: u32,
    /// Per-position results; complete when no `None` remains.
    pub results: Vec<Option<SubtreeDiff>>,
    /// Whether this unit's jobs go through the worker pool.
    pub parallel: bool,
}

impl WorkUnit {
    pub fn new(request: RenderRequest, outer_parent: Option<NodeId>) -> Self {
        Self {
            root: request.root,
            priority: request.priority,
            generation: request.generation,
            phase: WorkPhase::Queued,
            outer_parent,
            created_instances: Vec::new(),
            skeleton: None,
            pending: VecDeque::new(),
            awaiting: 0,
            results: Vec::new(),
            parallel: false,
        }
    }

    pub fn set_phase(&mut self, phase: WorkPhase) {
        log::debug!(
            "work unit {:?} gen {}: {:?} -> {:?}",
            self.root,
            self.generation,
            self.phase,
            phase
        );
        self.phase = phase;
    }

    pub fn request(&self) -> RenderRequest {
        RenderRequest {
            root: self.root,
            priority: self.priority,
            generation: self.generation,
        }
    }

    pub fn diffing_complete(&self) -> bool {
        self.pending.is_empty()
            && self.awaiting == 0
            && self.results.iter().all(Option::is_some)
    }
}

/// Render-request queue with coalescing, bounding, and supersession
/// tracking.
pub(crate) struct Scheduler {
    queue: VecDeque<RenderRequest>,
    latest: HashMap<DirtyRoot, u64, ahash::RandomState>,
    next_generation: u64,
    max_depth: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Scheduler {
    pub fn new(max_depth: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            latest: HashMap::default(),
            next_generation: 1,
            max_depth: max_depth.max(1),
            diagnostics: Vec::new(),
        }
    }

    /// Enqueues a render request, coalescing against any queued request for
    /// the same root. Returns the new generation.
    pub fn request(&mut self, root: DirtyRoot, priority: Priority) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.latest.insert(root, generation);
        let request = RenderRequest {
            root,
            priority,
            generation,
        };
        if let Some(existing) = self.queue.iter_mut().find(|queued| queued.root == root) {
            // Last one wins.
            *existing = request;
        } else {
            self.queue.push_back(request);
            self.enforce_bound();
        }
        generation
    }

    /// Requeues a preempted unit's request without superseding it.
    pub fn requeue(&mut self, request: RenderRequest) {
        if self.latest.get(&request.root) != Some(&request.generation) {
            // Superseded while in flight; the newer request is queued.
            return;
        }
        if self.queue.iter().any(|queued| queued.root == request.root) {
            return;
        }
        self.queue.push_back(request);
        self.enforce_bound();
    }

    fn enforce_bound(&mut self) {
        while self.queue.len() > self.max_depth {
            let worst = self
                .queue
                .iter()
                .map(|request| request.priority.rank())
                .max()
                .unwrap_or(0);
            let position = self
                .queue
                .iter()
                .position(|request| request.priority.rank() == worst);
            if let Some(position) = position {
                if let Some(dropped) = self.queue.remove(position) {
                    log::warn!(
                        "request queue over bound; dropping {:?} at {:?}",
                        dropped.root,
                        dropped.priority
                    );
                    self.diagnostics.push(Diagnostic::RequestDropped {
                        root: dropped.root,
                        priority: dropped.priority,
                    });
                }
            } else {
                break;
            }
        }
    }

    /// Pops the most urgent request; FIFO within a priority class.
    pub fn pop(&mut self) -> Option<RenderRequest> {
        let best = self
            .queue
            .iter()
            .map(|request| request.priority.rank())
            .min()?;
        let position = self
            .queue
            .iter()
            .position(|request| request.priority.rank() == best)?;
        self.queue.remove(position)
    }

    /// Most urgent queued priority, if any.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.queue
            .iter()
            .min_by_key(|request| request.priority.rank())
            .map(|request| request.priority)
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether a newer generation superseded this unit's root.
    pub fn is_superseded(&self, unit: &WorkUnit) -> bool {
        self.latest.get(&unit.root) != Some(&unit.generation)
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(index: u32) -> DirtyRoot {
        DirtyRoot::Node(NodeId::new(index, 0))
    }

    #[test]
    fn same_root_coalesces_to_latest_generation() {
        let mut scheduler = Scheduler::new(16);
        let first = scheduler.request(node(1), Priority::Background);
        let second = scheduler.request(node(1), Priority::DataUpdate);
        assert!(second > first);
        assert_eq!(scheduler.queue_len(), 1);
        let popped = scheduler.pop().unwrap();
        assert_eq!(popped.generation, second);
        assert_eq!(popped.priority, Priority::DataUpdate);
    }

    #[test]
    fn pop_prefers_urgency_then_fifo() {
        let mut scheduler = Scheduler::new(16);
        scheduler.request(node(1), Priority::Background);
        scheduler.request(node(2), Priority::DataUpdate);
        scheduler.request(node(3), Priority::UserInteraction);
        scheduler.request(node(4), Priority::UserInteraction);
        assert_eq!(scheduler.pop().unwrap().root, node(3));
        assert_eq!(scheduler.pop().unwrap().root, node(4));
        assert_eq!(scheduler.pop().unwrap().root, node(2));
        assert_eq!(scheduler.pop().unwrap().root, node(1));
        assert!(scheduler.pop().is_none());
    }

    #[test]
    fn overload_drops_oldest_lowest_priority() {
        let mut scheduler = Scheduler::new(2);
        scheduler.request(node(1), Priority::Background);
        scheduler.request(node(2), Priority::UserInteraction);
        scheduler.request(node(3), Priority::DataUpdate);
        assert_eq!(scheduler.queue_len(), 2);
        let diagnostics = scheduler.take_diagnostics();
        assert_eq!(
            diagnostics,
            vec![Diagnostic::RequestDropped {
                root: node(1),
                priority: Priority::Background,
            }]
        );
        // The urgent requests survived.
        assert_eq!(scheduler.pop().unwrap().root, node(2));
        assert_eq!(scheduler.pop().unwrap().root, node(3));
    }

    #[test]
    fn superseded_units_are_detected() {
        let mut scheduler = Scheduler::new(16);
        let generation = scheduler.request(node(1), Priority::DataUpdate);
        let request = scheduler.pop().unwrap();
        let unit = WorkUnit::new(request, None);
        assert_eq!(unit.generation, generation);
        assert!(!scheduler.is_superseded(&unit));
        scheduler.request(node(1), Priority::UserInteraction);
        assert!(scheduler.is_superseded(&unit));
    }

    #[test]
    fn requeue_is_ignored_once_superseded() {
        let mut scheduler = Scheduler::new(16);
        scheduler.request(node(1), Priority::Background);
        let request = scheduler.pop().unwrap();
        scheduler.request(node(1), Priority::DataUpdate);
        scheduler.requeue(request);
        assert_eq!(scheduler.queue_len(), 1);
        assert_eq!(scheduler.pop().unwrap().priority, Priority::DataUpdate);
    }
}
