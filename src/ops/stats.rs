use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::model::task::{TaskId, TaskStatus};
use crate::model::tree::{TaskTree, TreeError};

/// Which part of the tree to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsScope {
    All,
    /// A node and all its descendants
    Subtree(TaskId),
}

/// Completion counts for a scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub done: usize,
    /// Percentage of done tasks, rounded half up; 0 when there are no tasks
    pub done_ratio: u8,
    pub by_status: BTreeMap<TaskStatus, usize>,
}

/// Count every node in `scope`.
pub fn compute_stats(tree: &TaskTree, scope: StatsScope) -> Result<TaskStats, TreeError> {
    let walk = match scope {
        StatsScope::All => tree.traverse(),
        StatsScope::Subtree(id) => tree.traverse_from(id)?,
    };

    let mut stats = TaskStats::default();
    for visit in walk {
        stats.total += 1;
        if visit.node.is_done() {
            stats.done += 1;
        }
        *stats.by_status.entry(visit.node.status).or_insert(0) += 1;
    }
    stats.done_ratio = done_ratio(stats.done, stats.total);
    Ok(stats)
}

fn done_ratio(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    // round(done * 100 / total) with halves going up, without floats
    let pct = (done * 200 + total) / (total * 2);
    pct.min(100) as u8
}

/// Memoizes stats per scope until the tree revision changes.
#[derive(Debug, Default)]
pub struct StatsCache {
    entries: HashMap<StatsScope, (u64, TaskStats)>,
    computations: u64,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, tree: &TaskTree, scope: StatsScope) -> Result<TaskStats, TreeError> {
        if let Some((revision, stats)) = self.entries.get(&scope)
            && *revision == tree.revision()
        {
            return Ok(stats.clone());
        }
        let stats = compute_stats(tree, scope)?;
        self.computations += 1;
        self.entries.insert(scope, (tree.revision(), stats.clone()));
        Ok(stats)
    }

    /// Number of times stats were actually computed rather than served from
    /// the memo.
    pub fn computations(&self) -> u64 {
        self.computations
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::{TaskChange, TaskNode};
    use pretty_assertions::assert_eq;

    fn tree_with(statuses: &[(i64, Option<i64>, TaskStatus)]) -> TaskTree {
        let mut tree = TaskTree::new();
        for (id, parent, status) in statuses {
            let mut node = TaskNode::new(TaskId(*id), 1, format!("task {}", id));
            node.status = *status;
            tree.insert(node, parent.map(TaskId)).unwrap();
        }
        tree
    }

    #[test]
    fn counts_every_node() {
        let tree = tree_with(&[
            (1, None, TaskStatus::InProgress),
            (2, Some(1), TaskStatus::Done),
            (3, Some(1), TaskStatus::Done),
        ]);
        let stats = compute_stats(&tree, StatsScope::All).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.done, 2);
        assert_eq!(stats.done_ratio, 67);
        assert_eq!(stats.by_status.get(&TaskStatus::Done), Some(&2));
        assert_eq!(stats.by_status.get(&TaskStatus::Todo), None);
    }

    #[test]
    fn subtree_scope() {
        let tree = tree_with(&[
            (1, None, TaskStatus::InProgress),
            (2, Some(1), TaskStatus::Done),
            (3, None, TaskStatus::Todo),
        ]);
        let stats = compute_stats(&tree, StatsScope::Subtree(TaskId(1))).unwrap();
        assert_eq!((stats.total, stats.done, stats.done_ratio), (2, 1, 50));
        assert_eq!(
            compute_stats(&tree, StatsScope::Subtree(TaskId(9))),
            Err(TreeError::NotFound(TaskId(9)))
        );
    }

    #[test]
    fn empty_tree_has_zero_ratio() {
        let stats = compute_stats(&TaskTree::new(), StatsScope::All).unwrap();
        assert_eq!(stats, TaskStats::default());
    }

    #[test]
    fn ratio_rounds_half_up() {
        assert_eq!(done_ratio(1, 8), 13);
        assert_eq!(done_ratio(1, 3), 33);
        assert_eq!(done_ratio(1, 200), 1);
        assert_eq!(done_ratio(0, 5), 0);
        assert_eq!(done_ratio(5, 5), 100);
    }

    #[test]
    fn cache_recomputes_only_after_a_write() {
        let mut tree = tree_with(&[(1, None, TaskStatus::Todo), (2, Some(1), TaskStatus::Done)]);
        let mut cache = StatsCache::new();
        let first = cache.get(&tree, StatsScope::All).unwrap();
        let again = cache.get(&tree, StatsScope::All).unwrap();
        assert_eq!(first, again);
        assert_eq!(cache.computations(), 1);

        tree.update(TaskId(1), &TaskChange::status(TaskStatus::Done)).unwrap();
        let after = cache.get(&tree, StatsScope::All).unwrap();
        assert_eq!(after.done, 2);
        assert_eq!(cache.computations(), 2);
    }
}
