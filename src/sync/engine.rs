use std::cell::{Ref, RefCell};
use std::collections::{HashMap, HashSet};
use std::future::poll_fn;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::error::{LoadFailure, SyncError};
use super::notifier::{
    ChangeCause, ChangeEvent, ChangeNotifier, HandlerResult, MutationFailure, SubscriptionToken,
};
use super::pending::{NodeGates, PendingLedger, PendingMutation, PriorState};
use crate::model::task::{MutationKind, NewTask, ProjectId, TaskChange, TaskId, TaskNode};
use crate::model::tree::{TaskTree, TreeError};
use crate::ops::projection::{
    self, CalendarView, FlatRow, KanbanColumn, KanbanFilter, RowFilter,
};
use crate::ops::stats::{StatsCache, StatsScope, TaskStats};
use crate::transport::{Confirmed, PushConnection, PushEvent, PushSource, Transport};

/// Server acknowledgement of a local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationReceipt {
    pub seq: u64,
    pub id: TaskId,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { revision: u64 },
    /// A newer load finished first; this result was dropped
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Applied(TaskId),
    /// Not newer than what the tree holds
    Stale(SyncError),
    /// Refers to a task this tree does not have
    Ignored(TaskId),
    Rejected(TreeError),
}

#[derive(Debug, Default)]
struct EngineState {
    tree: TaskTree,
    project: Option<ProjectId>,
    loads_issued: u64,
    loads_applied: u64,
    mutations_issued: u64,
    temporaries_issued: u32,
    pending: PendingLedger,
    /// Temporary id to the server id it became
    aliases: HashMap<TaskId, TaskId>,
}

impl EngineState {
    fn resolve(&self, id: TaskId) -> TaskId {
        let mut current = id;
        while let Some(next) = self.aliases.get(&current) {
            current = *next;
        }
        current
    }

    fn issue(&mut self) -> u64 {
        self.mutations_issued += 1;
        self.mutations_issued
    }

    fn mint_temporary(&mut self) -> TaskId {
        self.temporaries_issued += 1;
        TaskId::temporary(self.temporaries_issued)
    }

    /// Take the server's normalized fields if they are newer than ours.
    fn adopt(&mut self, id: TaskId, confirmed: &Confirmed) -> Result<(), SyncError> {
        let held = self.tree.find(id)?.version;
        if confirmed.version <= held {
            return Err(SyncError::StaleVersion {
                id,
                incoming: confirmed.version,
                held,
            });
        }
        let mut node = confirmed.node.clone();
        node.version = confirmed.version;
        self.tree.overwrite(id, &node)?;
        Ok(())
    }

    fn roll_back_node(&mut self, id: TaskId, prior: &TaskNode) {
        match self.tree.get(id).map(|n| n.version) {
            None => debug!(%id, "task is gone, nothing to roll back"),
            Some(held) if held > prior.version => {
                debug!(%id, held, "newer server data arrived, keeping it over the rollback");
            }
            Some(_) => {
                if let Err(err) = self.tree.overwrite(id, prior) {
                    warn!(%id, error = %err, "could not restore task after failed mutation");
                }
            }
        }
    }

    fn promote(&mut self, temporary: TaskId, created: &TaskNode) {
        let id = created.id;
        self.aliases.insert(temporary, id);
        if !self.tree.contains(temporary) {
            return;
        }
        if self.tree.contains(id) {
            // Push already delivered the server's copy
            if let Err(err) = self.tree.remove(temporary) {
                warn!(%temporary, error = %err, "could not drop temporary task");
            }
            return;
        }
        let renamed = self
            .tree
            .rename(temporary, id)
            .and_then(|()| self.tree.overwrite(id, created).map(|_| ()));
        if let Err(err) = renamed {
            warn!(%temporary, %id, error = %err, "could not adopt created task");
        }
    }

    fn merge_push(&mut self, event: &PushEvent) -> PushOutcome {
        match event {
            PushEvent::TaskCreated { task, version } | PushEvent::TaskUpdated { task, version } => {
                let mut node = match task.to_node() {
                    Ok(node) => node,
                    Err(err) => return PushOutcome::Rejected(err.into()),
                };
                node.version = *version;
                let id = node.id;
                let parent = task.parent_task_id;

                match self.tree.get(id).map(|n| (n.version, n.parent_id)) {
                    Some((held, _)) if *version <= held => PushOutcome::Stale(SyncError::StaleVersion {
                        id,
                        incoming: *version,
                        held,
                    }),
                    Some((_, current_parent)) => {
                        if let Err(err) = self.tree.overwrite(id, &node) {
                            return PushOutcome::Rejected(err);
                        }
                        // A missing parent on an update means "unchanged", not "root"
                        if parent.is_some()
                            && parent != current_parent
                            && let Err(err) = self.tree.move_node(id, parent, usize::MAX)
                        {
                            warn!(%id, error = %err, "kept task in place, pushed parent is unusable");
                        }
                        PushOutcome::Applied(id)
                    }
                    None => {
                        node.parent_id = None;
                        match self.tree.insert(node, parent) {
                            Ok(()) => PushOutcome::Applied(id),
                            Err(err) => PushOutcome::Rejected(err),
                        }
                    }
                }
            }
            PushEvent::TaskDeleted { task_id, version, .. } => {
                let Some(held) = self.tree.get(*task_id).map(|n| n.version) else {
                    return PushOutcome::Ignored(*task_id);
                };
                if *version <= held {
                    return PushOutcome::Stale(SyncError::StaleVersion {
                        id: *task_id,
                        incoming: *version,
                        held,
                    });
                }
                match self.tree.remove(*task_id) {
                    Ok(_) => PushOutcome::Applied(*task_id),
                    Err(err) => PushOutcome::Rejected(err),
                }
            }
        }
    }
}

/// Keeps one task tree in step with a remote service.
///
/// Local mutations are applied to the tree immediately and rolled back if
/// the server refuses them. Mutations on the same task run strictly in the
/// order they were issued; mutations on different tasks overlap freely.
///
/// All methods take `&self`. Engine futures are not `Send`: drive them on a
/// current-thread runtime or join them on one task.
pub struct SyncEngine<T> {
    transport: T,
    state: RefCell<EngineState>,
    gates: NodeGates,
    notifier: ChangeNotifier,
    stats: RefCell<StatsCache>,
    push: RefCell<PushConnection>,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(transport: T) -> Self {
        SyncEngine {
            transport,
            state: RefCell::new(EngineState::default()),
            gates: NodeGates::default(),
            notifier: ChangeNotifier::new(),
            stats: RefCell::new(StatsCache::new()),
            push: RefCell::new(PushConnection::new()),
        }
    }

    /// Use an already-built push connection.
    pub fn with_push(self, connection: PushConnection) -> Self {
        self.push.replace(connection);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn project(&self) -> Option<ProjectId> {
        self.state.borrow().project
    }

    /// Read-only view of the tree. Drop it before awaiting any engine call.
    pub fn tree(&self) -> Ref<'_, TaskTree> {
        Ref::map(self.state.borrow(), |s| &s.tree)
    }

    pub fn revision(&self) -> u64 {
        self.state.borrow().tree.revision()
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        let state = self.state.borrow();
        let id = state.resolve(id);
        state.pending.for_target(id).next().is_some()
    }

    /// The id `id` refers to now. Temporary ids map to their server id once
    /// the create is confirmed.
    pub fn resolve(&self, id: TaskId) -> TaskId {
        self.state.borrow().resolve(id)
    }

    // -----------------------------------------------------------------------
    // Subscribers & views
    // -----------------------------------------------------------------------

    pub fn on_change<F>(&self, handler: F) -> SubscriptionToken
    where
        F: FnMut(&ChangeEvent) -> HandlerResult + 'static,
    {
        self.notifier.subscribe(handler)
    }

    pub fn off_change(&self, token: SubscriptionToken) -> bool {
        self.notifier.unsubscribe(token)
    }

    pub fn stats(&self, scope: StatsScope) -> Result<TaskStats, SyncError> {
        let state = self.state.borrow();
        Ok(self.stats.borrow_mut().get(&state.tree, scope)?)
    }

    pub fn kanban_view(&self, filter: &KanbanFilter) -> Vec<KanbanColumn> {
        projection::to_kanban_columns(&self.state.borrow().tree, filter)
    }

    pub fn flat_view(&self, collapsed: &HashSet<TaskId>) -> Vec<FlatRow> {
        projection::to_flat_rows(&self.state.borrow().tree, collapsed)
    }

    pub fn filtered_view(&self, filter: &RowFilter) -> Vec<FlatRow> {
        projection::filter_rows(&self.state.borrow().tree, filter)
    }

    pub fn calendar_view(&self) -> CalendarView {
        projection::to_calendar_buckets(&self.state.borrow().tree)
    }

    fn publish(&self, cause: ChangeCause, failure: Option<MutationFailure>) {
        let revision = self.state.borrow().tree.revision();
        self.notifier.emit(&ChangeEvent {
            revision,
            cause,
            failure,
        });
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Replace the tree with a fresh snapshot of `project`.
    pub async fn load(&self, project: ProjectId) -> Result<LoadOutcome, SyncError> {
        let seq = {
            let mut state = self.state.borrow_mut();
            state.loads_issued += 1;
            state.loads_issued
        };

        let fetched = self
            .transport
            .fetch_snapshot(project)
            .await
            .map_err(LoadFailure::from)
            .and_then(|snapshot| snapshot.into_tree().map_err(LoadFailure::from));

        let revision = {
            let mut state = self.state.borrow_mut();
            if state.loads_applied > seq {
                debug!(project, seq, "dropping superseded snapshot");
                return Ok(LoadOutcome::Superseded);
            }
            let mut tree = match fetched {
                Ok(tree) => tree,
                Err(source) => {
                    warn!(project, error = %source, "snapshot load failed, keeping current tree");
                    return Err(SyncError::Load { project, source });
                }
            };
            tree.continue_from(state.tree.revision());
            if state.project != Some(project) {
                state.aliases.clear();
            }
            state.loads_applied = seq;
            state.project = Some(project);
            state.tree = tree;
            state.tree.revision()
        };

        info!(project, revision, tasks = self.state.borrow().tree.len(), "snapshot loaded");
        self.publish(ChangeCause::Loaded { project }, None);
        Ok(LoadOutcome::Applied { revision })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Wait for our turn on `id`'s gate. Returns the id the gate ended up
    /// guarding, which differs from `id` if a temporary id was promoted
    /// while we waited.
    ///
    /// FIFO holds per gate, not across an alias: waiters on a temporary id
    /// move to the server id's gate only once the create releases, so a
    /// mutation issued on the server id right after promotion may run
    /// before them.
    async fn acquire(&self, id: TaskId) -> (TaskId, OwnedMutexGuard<()>) {
        self.gates.prune();
        let mut target = self.resolve(id);
        loop {
            let guard = self.gates.gate(target).lock_owned().await;
            let current = self.resolve(target);
            if current == target {
                return (target, guard);
            }
            target = current;
        }
    }

    /// Hold the gates of `id` and of every node under it, taken top-down so
    /// that in-flight work on descendants settles first. Children created
    /// while we wait are picked up too.
    async fn acquire_subtree(&self, id: TaskId) -> Result<(TaskId, Vec<OwnedMutexGuard<()>>), SyncError> {
        let (target, guard) = self.acquire(id).await;
        let mut held = HashMap::from([(target, guard)]);
        loop {
            let missing: Vec<TaskId> = {
                let state = self.state.borrow();
                state
                    .tree
                    .traverse_from(target)?
                    .map(|v| v.node.id)
                    .filter(|id| !held.contains_key(id))
                    .collect()
            };
            if missing.is_empty() {
                return Ok((target, held.into_values().collect()));
            }
            for id in missing {
                // Same walk as `acquire`, but a temporary id may resolve to a
                // server id whose gate we already hold
                let mut current = self.resolve(id);
                while !held.contains_key(&current) {
                    let guard = self.gates.gate(current).lock_owned().await;
                    let next = self.resolve(current);
                    if next == current {
                        held.insert(current, guard);
                    }
                    current = next;
                }
            }
        }
    }

    fn check_exists(&self, id: TaskId) -> Result<(), SyncError> {
        let state = self.state.borrow();
        state.tree.find(state.resolve(id))?;
        Ok(())
    }

    /// Apply `change` to `id` now and confirm it with the server.
    ///
    /// Invalid changes and unknown ids fail before anything is sent. If the
    /// server refuses, the node is restored to exactly what it was and the
    /// failure is both returned and published.
    pub async fn mutate(&self, id: TaskId, change: TaskChange) -> Result<MutationReceipt, SyncError> {
        change.validate()?;
        self.check_exists(id)?;
        let kind = change.kind();
        let seq = self.state.borrow_mut().issue();

        let (target, _guard) = self.acquire(id).await;
        let prior = {
            let mut state = self.state.borrow_mut();
            let prior = state.tree.update(target, &change)?;
            state.pending.record(PendingMutation {
                seq,
                target,
                kind,
                prior: PriorState::Node(prior.clone()),
            });
            prior
        };
        debug!(seq, %target, %kind, "applied optimistically");
        self.publish(ChangeCause::Applied { seq, target, kind }, None);

        match self.transport.submit_mutation(target, &change).await {
            Ok(confirmed) => {
                let adopted = {
                    let mut state = self.state.borrow_mut();
                    state.pending.resolve(seq);
                    state.adopt(target, &confirmed)
                };
                match adopted {
                    Ok(()) => {
                        debug!(seq, %target, version = confirmed.version, "confirmed");
                        self.publish(ChangeCause::Confirmed { seq, target, kind }, None);
                    }
                    Err(err) => debug!(seq, error = %err, "ignoring confirmation"),
                }
                Ok(MutationReceipt {
                    seq,
                    id: target,
                    version: confirmed.version,
                })
            }
            Err(error) => {
                warn!(seq, %target, %kind, error = %error, "mutation failed, rolling back");
                {
                    let mut state = self.state.borrow_mut();
                    state.pending.resolve(seq);
                    state.roll_back_node(target, &prior);
                }
                let failure = MutationFailure {
                    seq,
                    target,
                    kind,
                    error: error.clone(),
                };
                self.publish(ChangeCause::RolledBack { seq, target, kind }, Some(failure));
                Err(SyncError::Transport {
                    target,
                    kind,
                    source: error,
                })
            }
        }
    }

    /// Add a child under `parent` right away under a temporary id, then
    /// swap in the server's id once it answers. Mutations issued against the
    /// temporary id in the meantime wait and then run against the real one,
    /// in the order they were issued among themselves.
    pub async fn create_child(&self, parent: TaskId, fields: NewTask) -> Result<TaskId, SyncError> {
        let kind = MutationKind::CreateChild;
        fields.validate()?;
        self.check_exists(parent)?;

        let mut parent = self.resolve(parent);
        if parent.is_temporary() {
            // The server only knows real ids
            let (resolved, _guard) = self.acquire(parent).await;
            parent = resolved;
        }

        let (seq, temporary, guard) = {
            let mut state = self.state.borrow_mut();
            let project = state.tree.find(parent)?.project_id;
            let temporary = state.mint_temporary();
            let node = fields.to_node(temporary, project)?;
            // Hold the gate before the id is visible to anyone
            let guard = self.gates.claim(temporary);
            state.tree.insert(node, Some(parent))?;
            let seq = state.issue();
            state.pending.record(PendingMutation {
                seq,
                target: temporary,
                kind,
                prior: PriorState::Absent,
            });
            (seq, temporary, guard)
        };
        if guard.is_none() {
            warn!(%temporary, "gate for a fresh temporary id was already taken");
        }
        debug!(seq, %temporary, %parent, "created optimistically");
        self.publish(
            ChangeCause::Applied {
                seq,
                target: temporary,
                kind,
            },
            None,
        );

        let outcome = self.transport.create_node(parent, &fields).await;
        let result = match outcome {
            Ok(created) => {
                let id = created.id;
                {
                    let mut state = self.state.borrow_mut();
                    state.pending.resolve(seq);
                    state.promote(temporary, &created);
                }
                debug!(seq, %temporary, %id, "server id assigned");
                self.publish(ChangeCause::IdAssigned { seq, temporary, id }, None);
                Ok(id)
            }
            Err(error) => {
                warn!(seq, %temporary, error = %error, "create failed, removing temporary task");
                {
                    let mut state = self.state.borrow_mut();
                    state.pending.resolve(seq);
                    if state.tree.contains(temporary)
                        && let Err(err) = state.tree.remove(temporary)
                    {
                        warn!(%temporary, error = %err, "could not remove temporary task");
                    }
                }
                let failure = MutationFailure {
                    seq,
                    target: temporary,
                    kind,
                    error: error.clone(),
                };
                self.publish(
                    ChangeCause::RolledBack {
                        seq,
                        target: temporary,
                        kind,
                    },
                    Some(failure),
                );
                Err(SyncError::Transport {
                    target: temporary,
                    kind,
                    source: error,
                })
            }
        };
        drop(guard);
        result
    }

    /// Remove `id` and its descendants now; put them back where they were
    /// if the server refuses. Waits for pending work anywhere in the subtree,
    /// so a restore only ever brings back settled nodes.
    pub async fn delete_node(&self, id: TaskId) -> Result<(), SyncError> {
        let kind = MutationKind::Delete;
        self.check_exists(id)?;
        let seq = self.state.borrow_mut().issue();

        let (target, _guards) = self.acquire_subtree(id).await?;
        let subtree = {
            let mut state = self.state.borrow_mut();
            let subtree = state.tree.remove(target)?;
            state.pending.record(PendingMutation {
                seq,
                target,
                kind,
                prior: PriorState::Subtree(subtree.clone()),
            });
            subtree
        };
        debug!(seq, %target, removed = subtree.nodes.len(), "deleted optimistically");
        self.publish(ChangeCause::Applied { seq, target, kind }, None);

        match self.transport.delete_node(target).await {
            Ok(()) => {
                self.state.borrow_mut().pending.resolve(seq);
                self.publish(ChangeCause::Confirmed { seq, target, kind }, None);
                Ok(())
            }
            Err(error) => {
                warn!(seq, %target, error = %error, "delete failed, restoring subtree");
                {
                    let mut state = self.state.borrow_mut();
                    state.pending.resolve(seq);
                    if let Err(err) = state.tree.restore(subtree) {
                        warn!(%target, error = %err, "could not restore deleted subtree");
                    }
                }
                let failure = MutationFailure {
                    seq,
                    target,
                    kind,
                    error: error.clone(),
                };
                self.publish(ChangeCause::RolledBack { seq, target, kind }, Some(failure));
                Err(SyncError::Transport {
                    target,
                    kind,
                    source: error,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    pub fn connect_push<S: PushSource + ?Sized>(
        &self,
        source: &S,
        project: ProjectId,
    ) -> Result<(), SyncError> {
        self.push
            .borrow_mut()
            .connect(source, project)
            .map_err(|err| SyncError::Push {
                project,
                source: err,
            })
    }

    pub fn disconnect_push(&self) {
        self.push.borrow_mut().disconnect();
    }

    pub fn push_connected(&self) -> bool {
        self.push.borrow().is_connected()
    }

    /// Merge one server-initiated change into the tree.
    pub fn ingest_push(&self, event: PushEvent) -> PushOutcome {
        let outcome = self.state.borrow_mut().merge_push(&event);
        match &outcome {
            PushOutcome::Applied(target) => {
                debug!(%target, version = event.version(), "applied push event");
                self.publish(ChangeCause::Remote { target: *target }, None);
            }
            PushOutcome::Stale(err) => debug!(error = %err, "dropping stale push event"),
            PushOutcome::Ignored(id) => debug!(%id, "push event for unknown task"),
            PushOutcome::Rejected(err) => warn!(error = %err, "push event could not be applied"),
        }
        outcome
    }

    /// Ingest every event already queued. Returns how many changed the tree.
    pub fn drain_push(&self) -> usize {
        let mut applied = 0;
        loop {
            let next = self.push.borrow_mut().try_next();
            let Some(event) = next else {
                break;
            };
            if matches!(self.ingest_push(event), PushOutcome::Applied(_)) {
                applied += 1;
            }
        }
        applied
    }

    /// Ingest events as they arrive until the channel closes.
    pub async fn run_push(&self) -> usize {
        let mut applied = 0;
        while let Some(event) = poll_fn(|cx| self.push.borrow_mut().poll_next(cx)).await {
            if matches!(self.ingest_push(event), PushOutcome::Applied(_)) {
                applied += 1;
            }
        }
        applied
    }

    /// Tear the session down: disconnect push, drop subscribers and state.
    /// In-flight mutations still resolve but find nothing to update.
    pub fn close(&self) {
        self.push.borrow_mut().disconnect();
        {
            let mut state = self.state.borrow_mut();
            let revision = state.tree.revision();
            state.tree = TaskTree::new();
            state.tree.continue_from(revision);
            state.pending.clear();
            state.aliases.clear();
            state.project = None;
        }
        self.stats.borrow_mut().clear();
        self.publish(ChangeCause::Cleared, None);
        self.notifier.clear();
    }
}
