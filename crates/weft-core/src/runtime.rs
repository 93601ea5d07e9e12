//! Runtime: the single owner coordinating stores, scheduler, workers, and
//! commits.
//!
//! All tree mutation happens on the runtime's execution context. One work
//! unit is in flight at a time; a unit's committed-tree snapshot therefore
//! stays valid from build to commit, and pausing at a slice deadline cannot
//! interleave another unit's commit underneath it. Readers on other threads
//! observe the tree only through the atomically published snapshot.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::builder::TreeBuilder;
use crate::commit::{assemble_unit, CommitBatch, NativeBridge};
use crate::diff::{prepare_unit, run_job, SubtreeDiff};
use crate::element::Element;
use crate::error::{CoreError, Diagnostic};
use crate::registry::Registry;
use crate::schedule::{DirtyRoot, Priority, RenderRequest, Scheduler, WorkPhase, WorkUnit};
use crate::state::{StateHandle, StateStore};
use crate::store::{CommittedTree, NodeStore};
use crate::worker::{DiffPool, PoolJob};

/// Policy knobs for the runtime. The defaults suit interactive hosts.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// New-subtree node count at which a work unit's child diffs go to the
    /// worker pool instead of running inline.
    pub parallel_threshold: usize,
    /// Diff worker threads. `0` picks from the machine's parallelism.
    pub workers: usize,
    /// Default time budget for one scheduling slice.
    pub slice_budget: Duration,
    /// Render-request queue bound; beyond it the oldest low-priority
    /// request is dropped.
    pub max_queue_depth: usize,
    /// How many times a rejected commit batch is retried before the
    /// failure surfaces as an error state.
    pub max_commit_retries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 64,
            workers: 0,
            slice_budget: Duration::from_millis(4),
            max_queue_depth: 256,
            max_commit_retries: 3,
        }
    }
}

/// Result of one scheduling slice.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SliceOutcome {
    /// No work remains.
    Idle,
    /// The deadline passed with work remaining; partial progress is kept.
    Paused,
}

/// State-update access handed to event dispatch and posted tasks.
///
/// Writes land in the state store synchronously; each write enqueues a
/// render request for the owning instance's subtree root. Requests for the
/// same root issued within one dispatch coalesce in the scheduler.
pub struct UpdateCtx<'a> {
    state: &'a mut StateStore,
    scheduler: &'a mut Scheduler,
}

impl UpdateCtx<'_> {
    pub fn set<T: Clone + Send + 'static>(&mut self, handle: StateHandle<T>, value: T) {
        self.set_with_priority(handle, value, Priority::DataUpdate);
    }

    pub fn set_with_priority<T: Clone + Send + 'static>(
        &mut self,
        handle: StateHandle<T>,
        value: T,
        priority: Priority,
    ) {
        match self.state.cell_set(handle.instance(), handle.cell(), value) {
            Ok(()) => {
                let root = self
                    .state
                    .get(handle.instance())
                    .ok()
                    .and_then(|record| record.node())
                    .map(DirtyRoot::Node)
                    .unwrap_or(DirtyRoot::Tree);
                self.scheduler.request(root, priority);
            }
            Err(_) => log::debug!("state update for missing instance dropped: {handle:?}"),
        }
    }

    pub fn update<T: Clone + Send + 'static>(
        &mut self,
        handle: StateHandle<T>,
        f: impl FnOnce(&T) -> T,
    ) {
        self.update_with_priority(handle, f, Priority::DataUpdate);
    }

    pub fn update_with_priority<T: Clone + Send + 'static>(
        &mut self,
        handle: StateHandle<T>,
        f: impl FnOnce(&T) -> T,
        priority: Priority,
    ) {
        match self.state.cell_get::<T>(handle.instance(), handle.cell()) {
            Ok(current) => self.set_with_priority(handle, f(&current), priority),
            Err(_) => log::debug!("state update for missing cell dropped: {handle:?}"),
        }
    }
}

type ExternalTask = Box<dyn FnOnce(&mut UpdateCtx<'_>) + Send>;

/// Cloneable entry point for posting state updates from other threads.
/// Posted tasks run on the runtime's context at the start of the next
/// slice.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: Sender<ExternalTask>,
}

impl RuntimeHandle {
    /// Posts a task; returns `false` when the runtime is gone.
    pub fn post(&self, task: impl FnOnce(&mut UpdateCtx<'_>) + Send + 'static) -> bool {
        self.tx.send(Box::new(task)).is_ok()
    }
}

/// Cloneable read access to the atomically published committed tree.
#[derive(Clone)]
pub struct SnapshotHandle {
    inner: Arc<ArcSwapOption<CommittedTree>>,
}

impl SnapshotHandle {
    /// Loads the latest published snapshot: fully the old tree or fully
    /// the new one, never a partial swap.
    pub fn load(&self) -> Option<Arc<CommittedTree>> {
        self.inner.load_full()
    }
}

struct PendingRepair {
    root: DirtyRoot,
    batch: CommitBatch,
    attempts: u32,
}

enum Advance {
    Paused,
    Finished,
}

/// The reconciliation runtime.
pub struct Runtime<B: NativeBridge> {
    config: RuntimeConfig,
    registry: Registry,
    nodes: NodeStore,
    state: StateStore,
    scheduler: Scheduler,
    pool: DiffPool,
    bridge: B,
    current: Option<WorkUnit>,
    published: Arc<ArcSwapOption<CommittedTree>>,
    revision: u64,
    root_element: Option<Element>,
    repairs: VecDeque<PendingRepair>,
    diagnostics: Vec<Diagnostic>,
    errors: Vec<CoreError>,
    external_tx: Sender<ExternalTask>,
    external_rx: Receiver<ExternalTask>,
}

impl<B: NativeBridge> Runtime<B> {
    pub fn new(registry: Registry, bridge: B) -> Self {
        Self::with_config(registry, bridge, RuntimeConfig::default())
    }

    pub fn with_config(registry: Registry, bridge: B, config: RuntimeConfig) -> Self {
        let workers = resolve_workers(&config);
        let (external_tx, external_rx) = unbounded();
        Self {
            registry,
            nodes: NodeStore::new(),
            state: StateStore::new(),
            scheduler: Scheduler::new(config.max_queue_depth),
            pool: DiffPool::new(workers),
            bridge,
            current: None,
            published: Arc::new(ArcSwapOption::empty()),
            revision: 0,
            root_element: None,
            repairs: VecDeque::new(),
            diagnostics: Vec::new(),
            errors: Vec::new(),
            external_tx,
            external_rx,
            config,
        }
    }

    /// Declares the root element and schedules the initial render.
    pub fn mount(&mut self, element: Element) {
        self.root_element = Some(element);
        self.scheduler.request(DirtyRoot::Tree, Priority::UserInteraction);
    }

    /// Replaces the root element, scheduling a whole-tree render.
    pub fn update_root(&mut self, element: Element, priority: Priority) {
        self.root_element = Some(element);
        self.scheduler.request(DirtyRoot::Tree, priority);
    }

    /// Runs host logic with state-update access. Updates issued inside one
    /// dispatch coalesce into a single render request per subtree root.
    pub fn dispatch<R>(&mut self, f: impl FnOnce(&mut UpdateCtx<'_>) -> R) -> R {
        let mut ctx = UpdateCtx {
            state: &mut self.state,
            scheduler: &mut self.scheduler,
        };
        f(&mut ctx)
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            tx: self.external_tx.clone(),
        }
    }

    pub fn snapshot_handle(&self) -> SnapshotHandle {
        SnapshotHandle {
            inner: Arc::clone(&self.published),
        }
    }

    /// Latest published tree snapshot.
    pub fn committed(&self) -> Option<Arc<CommittedTree>> {
        self.published.load_full()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }

    pub fn dump_tree(&self) -> String {
        self.nodes.dump_tree()
    }

    /// Diagnostics recorded since the last call, oldest first.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.extend(self.scheduler.take_diagnostics());
        std::mem::take(&mut self.diagnostics)
    }

    /// Errors surfaced since the last call (failed generations, exhausted
    /// commit retries).
    pub fn take_errors(&mut self) -> Vec<CoreError> {
        std::mem::take(&mut self.errors)
    }

    /// Whether any work remains: queued requests, an in-flight unit,
    /// pending repairs, or posted tasks.
    pub fn idle(&self) -> bool {
        self.current.is_none()
            && !self.scheduler.has_pending()
            && self.repairs.is_empty()
            && self.external_rx.is_empty()
    }

    /// Processes work until the budget's deadline. Partial progress is
    /// persisted; the next slice resumes without redoing completed spans.
    pub fn run_slice(&mut self, budget: Duration) -> Result<SliceOutcome, CoreError> {
        let deadline = Instant::now() + budget;
        self.drain_external();
        self.retry_repairs();
        loop {
            self.check_preemption();
            if self.current.is_none() {
                let Some(request) = self.scheduler.pop() else {
                    return Ok(if self.idle() {
                        SliceOutcome::Idle
                    } else {
                        SliceOutcome::Paused
                    });
                };
                self.current = self.start_unit(request)?;
                if self.current.is_none() {
                    continue;
                }
            }
            match self.advance_current(deadline)? {
                Advance::Paused => return Ok(SliceOutcome::Paused),
                Advance::Finished => {
                    if Instant::now() >= deadline {
                        return Ok(if self.idle() {
                            SliceOutcome::Idle
                        } else {
                            SliceOutcome::Paused
                        });
                    }
                }
            }
        }
    }

    /// Drives slices until no work remains.
    pub fn run_until_idle(&mut self) -> Result<(), CoreError> {
        loop {
            match self.run_slice(self.config.slice_budget)? {
                SliceOutcome::Idle => return Ok(()),
                SliceOutcome::Paused => {}
            }
        }
    }

    fn drain_external(&mut self) {
        while let Ok(task) = self.external_rx.try_recv() {
            let mut ctx = UpdateCtx {
                state: &mut self.state,
                scheduler: &mut self.scheduler,
            };
            task(&mut ctx);
        }
    }

    /// A lower-priority in-flight unit yields to a newly queued
    /// higher-priority request; its partial state is discarded because
    /// restarting is cheaper than merging.
    fn check_preemption(&mut self) {
        let decision = match &self.current {
            Some(unit) if self.scheduler.is_superseded(unit) => Some(false),
            Some(unit) => self
                .scheduler
                .peek_priority()
                .filter(|priority| priority.outranks(unit.priority))
                .map(|_| true),
            None => None,
        };
        if let Some(requeue) = decision {
            if let Some(unit) = self.current.take() {
                self.abort_unit(unit, requeue);
            }
        }
    }

    fn abort_unit(&mut self, mut unit: WorkUnit, requeue: bool) {
        for id in unit.created_instances.drain(..) {
            let _ = self.state.destroy(id);
        }
        unit.set_phase(WorkPhase::Aborted);
        if requeue {
            self.scheduler.requeue(unit.request());
        }
    }

    fn start_unit(&mut self, request: RenderRequest) -> Result<Option<WorkUnit>, CoreError> {
        let (element, old_id) = match request.root {
            DirtyRoot::Tree => {
                let Some(element) = self.root_element.clone() else {
                    return Ok(None);
                };
                (element, self.nodes.root())
            }
            DirtyRoot::Node(id) => match self.nodes.get(id) {
                Ok(record) => (
                    Element::from_parts(
                        Arc::clone(&record.tag),
                        record.key.clone(),
                        record.props.clone(),
                        record.input_children.clone(),
                    ),
                    Some(id),
                ),
                Err(_) => {
                    log::debug!("dropping request for vanished node {id:?}");
                    return Ok(None);
                }
            },
        };

        let mut unit = WorkUnit::new(request, None);
        unit.set_phase(WorkPhase::Building);

        let old_record = old_id.and_then(|id| self.nodes.get(id).ok());
        unit.outer_parent = old_record.and_then(|record| record.parent);
        let built =
            TreeBuilder::new(&self.registry, &self.nodes, &mut self.state).build(old_record, &element);
        let built = match built {
            Ok(built) => built,
            Err(err) => {
                log::error!("build for {:?} failed: {err}", request.root);
                self.errors.push(err);
                unit.set_phase(WorkPhase::Aborted);
                return Ok(None);
            }
        };

        unit.created_instances = built.created;
        let size = built.root.size;
        let old_view = match old_id {
            Some(id) => Some(self.nodes.view(id)?),
            None => None,
        };
        let prepared = prepare_unit(old_view, built.root, 0);
        unit.parallel = self.pool.worker_count() > 0
            && prepared.jobs.len() > 1
            && size >= self.config.parallel_threshold;
        unit.results = vec![None; prepared.jobs.len()];
        unit.pending = prepared
            .jobs
            .into_iter()
            .enumerate()
            .map(|(j, job)| (j as u32, job))
            .collect();
        unit.skeleton = Some(prepared.skeleton);
        unit.set_phase(WorkPhase::Diffing);
        Ok(Some(unit))
    }

    fn advance_current(&mut self, deadline: Instant) -> Result<Advance, CoreError> {
        let Some(mut unit) = self.current.take() else {
            return Ok(Advance::Finished);
        };
        if unit.parallel {
            while let Some((seq, job)) = unit.pending.pop_front() {
                self.pool.dispatch(PoolJob {
                    generation: unit.generation,
                    seq,
                    job,
                })?;
                unit.awaiting += 1;
            }
            while !unit.diffing_complete() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    self.current = Some(unit);
                    return Ok(Advance::Paused);
                }
                match self.pool.recv_timeout(remaining)? {
                    Some(result) if result.generation == unit.generation => {
                        unit.results[result.seq as usize] = Some(result.diff);
                        unit.awaiting -= 1;
                    }
                    Some(stale) => {
                        log::trace!("dropping stale diff result (gen {})", stale.generation);
                    }
                    None => {}
                }
            }
        } else {
            while let Some((seq, job)) = unit.pending.pop_front() {
                let diff = run_job(job);
                unit.results[seq as usize] = Some(diff);
                if Instant::now() >= deadline && !unit.pending.is_empty() {
                    self.current = Some(unit);
                    return Ok(Advance::Paused);
                }
            }
        }
        unit.set_phase(WorkPhase::Ready);
        self.commit_unit(unit)?;
        Ok(Advance::Finished)
    }

    fn commit_unit(&mut self, mut unit: WorkUnit) -> Result<(), CoreError> {
        let Some(skeleton) = unit.skeleton.take() else {
            self.abort_unit(unit, false);
            return Ok(());
        };
        let results: Vec<SubtreeDiff> = unit.results.drain(..).flatten().collect();
        let assembled = assemble_unit(&mut self.nodes, unit.outer_parent, skeleton, results);
        let root_id = assembled.root_id;
        self.diagnostics.extend(assembled.diagnostics);

        // Free removed subtrees and destroy their instances.
        for id in &assembled.removed {
            match self.nodes.remove(*id) {
                Ok(record) => {
                    if let Some(instance) = record.instance {
                        let _ = self.state.destroy(instance);
                    }
                }
                Err(_) => log::debug!("removed node {id:?} was already gone"),
            }
        }

        // Install the new subtree. Matched nodes keep their ids, so links
        // from outside the subtree stay valid; the swap itself is the
        // root-record replacement.
        for record in assembled.records {
            let instance = record.instance;
            let id = record.id;
            self.nodes.install(record)?;
            if let Some(instance) = instance {
                let _ = self.state.bind_node(instance, id);
            }
        }
        if unit.root == DirtyRoot::Tree {
            self.nodes.set_root(Some(root_id));
        }

        self.revision += 1;
        self.publish();

        if !assembled.effects.is_empty() {
            let batch = CommitBatch {
                revision: self.revision,
                effects: assembled.effects,
            };
            log::debug!(
                "commit r{} for {:?}: {} effects",
                self.revision,
                unit.root,
                batch.effects.len()
            );
            if let Err(error) = self.bridge.apply(&batch) {
                log::warn!("bridge rejected commit r{}: {error}", self.revision);
                let from = error.index.min(batch.effects.len());
                self.repairs.push_back(PendingRepair {
                    root: unit.root,
                    batch: CommitBatch {
                        revision: batch.revision,
                        effects: batch.effects[from..].to_vec(),
                    },
                    attempts: 0,
                });
            }
        }
        unit.set_phase(WorkPhase::Committed);
        Ok(())
    }

    fn publish(&mut self) {
        let root = self.nodes.root().and_then(|id| self.nodes.view(id).ok());
        self.published.store(Some(Arc::new(CommittedTree {
            revision: self.revision,
            root,
        })));
    }

    /// Re-sends the unapplied suffix of rejected commit batches, bounded by
    /// the retry ceiling.
    fn retry_repairs(&mut self) {
        if self.repairs.is_empty() {
            return;
        }
        let mut pending = std::mem::take(&mut self.repairs);
        while let Some(mut repair) = pending.pop_front() {
            repair.attempts += 1;
            self.diagnostics.push(Diagnostic::CommitRetry {
                root: repair.root,
                attempt: repair.attempts,
            });
            match self.bridge.apply(&repair.batch) {
                Ok(()) => log::debug!("repair for {:?} applied", repair.root),
                Err(error) => {
                    if repair.attempts >= self.config.max_commit_retries {
                        log::error!(
                            "commit for {:?} failed after {} attempts: {error}",
                            repair.root,
                            repair.attempts
                        );
                        self.errors.push(CoreError::CommitFailed {
                            root: repair.root,
                            attempts: repair.attempts,
                            source: error,
                        });
                    } else {
                        let from = error.index.min(repair.batch.effects.len());
                        repair.batch.effects.drain(..from);
                        self.repairs.push_back(repair);
                    }
                }
            }
        }
    }
}

fn resolve_workers(config: &RuntimeConfig) -> usize {
    if config.workers > 0 {
        return config.workers;
    }
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .clamp(1, 8)
}
