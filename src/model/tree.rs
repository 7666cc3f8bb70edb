use indexmap::IndexMap;

use super::task::{TaskChange, TaskId, TaskNode, ValidationError, validate_fields};

/// Error type for tree operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task {id} cannot be placed under {parent}")]
    InvalidParent { id: TaskId, parent: TaskId },
    #[error("task id already present: {0}")]
    DuplicateId(TaskId),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A subtree detached by [`TaskTree::remove`], with enough position
/// information to put it back exactly where it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtree {
    pub parent_id: Option<TaskId>,
    pub index: usize,
    /// Pre-order; the first node is the subtree root.
    pub nodes: Vec<TaskNode>,
}

impl Subtree {
    pub fn root_id(&self) -> Option<TaskId> {
        self.nodes.first().map(|n| n.id)
    }

    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }
}

/// Arena of task nodes keyed by id, with ordered roots.
///
/// Parent and child links are ids into the arena. `revision` counts every
/// successful write and never goes backwards.
#[derive(Debug, Clone, Default)]
pub struct TaskTree {
    nodes: IndexMap<TaskId, TaskNode>,
    roots: Vec<TaskId>,
    revision: u64,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn roots(&self) -> &[TaskId] {
        &self.roots
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskNode> {
        self.nodes.get(&id)
    }

    pub fn find(&self, id: TaskId) -> Result<&TaskNode, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::NotFound(id))
    }

    /// All nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    /// Ordered children of `parent`, or the roots for `None`.
    pub fn children_of(&self, parent: Option<TaskId>) -> &[TaskId] {
        match parent {
            None => &self.roots,
            Some(id) => self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[]),
        }
    }

    /// Carry the revision counter over from a tree this one replaces.
    pub(crate) fn continue_from(&mut self, previous_revision: u64) {
        self.revision = previous_revision.max(self.revision) + 1;
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    fn siblings_mut(&mut self, parent: Option<TaskId>) -> Option<&mut Vec<TaskId>> {
        match parent {
            None => Some(&mut self.roots),
            Some(id) => self.nodes.get_mut(&id).map(|n| &mut n.children),
        }
    }

    /// True if `ancestor` is a strict ancestor of `id`. Walks up the parent
    /// chain, so this is O(depth).
    pub fn is_ancestor(&self, ancestor: TaskId, id: TaskId) -> bool {
        let mut current = self.nodes.get(&id).and_then(|n| n.parent_id);
        let mut steps = 0;
        while let Some(pid) = current {
            if pid == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                break;
            }
            current = self.nodes.get(&pid).and_then(|n| n.parent_id);
        }
        false
    }

    // -----------------------------------------------------------------------
    // Structural writes
    // -----------------------------------------------------------------------

    /// Append `node` under `parent` (or as a root).
    pub fn insert(&mut self, node: TaskNode, parent: Option<TaskId>) -> Result<(), TreeError> {
        self.insert_at(node, parent, usize::MAX)
    }

    /// Insert `node` under `parent` at `index`, clamped to the sibling count.
    pub fn insert_at(
        &mut self,
        mut node: TaskNode,
        parent: Option<TaskId>,
        index: usize,
    ) -> Result<(), TreeError> {
        let id = node.id;
        if self.nodes.contains_key(&id) {
            return Err(TreeError::DuplicateId(id));
        }
        if let Some(pid) = parent
            && (pid == id || !self.nodes.contains_key(&pid))
        {
            return Err(TreeError::InvalidParent { id, parent: pid });
        }
        if !node.children.is_empty() {
            return Err(ValidationError::new("children", "a new task cannot bring its own children").into());
        }
        validate_fields(&node)?;

        node.parent_id = parent;
        let siblings = self
            .siblings_mut(parent)
            .ok_or(TreeError::NotFound(parent.unwrap_or(id)))?;
        let at = index.min(siblings.len());
        siblings.insert(at, id);
        self.nodes.insert(id, node);
        self.bump();
        Ok(())
    }

    /// Reparent or reorder `id`. The index is clamped.
    pub fn move_node(
        &mut self,
        id: TaskId,
        new_parent: Option<TaskId>,
        index: usize,
    ) -> Result<(), TreeError> {
        let old_parent = self.find(id)?.parent_id;
        if let Some(pid) = new_parent {
            if !self.nodes.contains_key(&pid) {
                return Err(TreeError::NotFound(pid));
            }
            if pid == id || self.is_ancestor(id, pid) {
                return Err(TreeError::InvalidParent { id, parent: pid });
            }
        }

        if let Some(siblings) = self.siblings_mut(old_parent) {
            siblings.retain(|c| *c != id);
        }
        let siblings = self
            .siblings_mut(new_parent)
            .ok_or(TreeError::NotFound(new_parent.unwrap_or(id)))?;
        let at = index.min(siblings.len());
        siblings.insert(at, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_id = new_parent;
        }
        self.bump();
        Ok(())
    }

    /// Remove `id` and all its descendants.
    pub fn remove(&mut self, id: TaskId) -> Result<Subtree, TreeError> {
        let parent_id = self.find(id)?.parent_id;
        let ids: Vec<TaskId> = self.traverse_from(id)?.map(|v| v.node.id).collect();

        let mut index = 0;
        if let Some(siblings) = self.siblings_mut(parent_id)
            && let Some(pos) = siblings.iter().position(|c| *c == id)
        {
            index = pos;
            siblings.remove(pos);
        }

        let nodes = ids
            .iter()
            .filter_map(|cid| self.nodes.shift_remove(cid))
            .collect();
        self.bump();
        Ok(Subtree {
            parent_id,
            index,
            nodes,
        })
    }

    /// Put a detached subtree back at its recorded position.
    pub fn restore(&mut self, subtree: Subtree) -> Result<(), TreeError> {
        let Some(root_id) = subtree.root_id() else {
            return Ok(());
        };
        if let Some(pid) = subtree.parent_id
            && !self.nodes.contains_key(&pid)
        {
            return Err(TreeError::InvalidParent {
                id: root_id,
                parent: pid,
            });
        }
        if let Some(dup) = subtree.ids().find(|cid| self.nodes.contains_key(cid)) {
            return Err(TreeError::DuplicateId(dup));
        }

        if let Some(siblings) = self.siblings_mut(subtree.parent_id) {
            let at = subtree.index.min(siblings.len());
            siblings.insert(at, root_id);
        }
        for mut node in subtree.nodes {
            if node.id == root_id {
                node.parent_id = subtree.parent_id;
            }
            self.nodes.insert(node.id, node);
        }
        self.bump();
        Ok(())
    }

    /// Swap a node's id, fixing up its parent's and children's links.
    pub fn rename(&mut self, from: TaskId, to: TaskId) -> Result<(), TreeError> {
        if from == to {
            return Ok(());
        }
        if self.nodes.contains_key(&to) {
            return Err(TreeError::DuplicateId(to));
        }
        let mut node = self.nodes.shift_remove(&from).ok_or(TreeError::NotFound(from))?;
        node.id = to;
        for child in &node.children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent_id = Some(to);
            }
        }
        let parent = node.parent_id;
        self.nodes.insert(to, node);
        if let Some(siblings) = self.siblings_mut(parent) {
            for slot in siblings.iter_mut().filter(|c| **c == from) {
                *slot = to;
            }
        }
        self.bump();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Field writes
    // -----------------------------------------------------------------------

    /// Apply a partial update. Returns the node as it was before.
    pub fn update(&mut self, id: TaskId, change: &TaskChange) -> Result<TaskNode, TreeError> {
        let next = change.apply_to(self.find(id)?)?;
        let slot = self.nodes.get_mut(&id).ok_or(TreeError::NotFound(id))?;
        let prior = std::mem::replace(slot, next);
        self.bump();
        Ok(prior)
    }

    /// Replace data fields and version with `source`'s. Returns the node as
    /// it was before.
    pub fn overwrite(&mut self, id: TaskId, source: &TaskNode) -> Result<TaskNode, TreeError> {
        validate_fields(source)?;
        let slot = self.nodes.get_mut(&id).ok_or(TreeError::NotFound(id))?;
        let prior = slot.clone();
        slot.copy_fields_from(source);
        self.bump();
        Ok(prior)
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// Depth-first, pre-order walk over every root.
    pub fn traverse(&self) -> Traverse<'_> {
        Traverse {
            tree: self,
            stack: self.roots.iter().rev().map(|id| (0, *id)).collect(),
        }
    }

    /// Depth-first, pre-order walk over the subtree rooted at `id` (depth 0).
    pub fn traverse_from(&self, id: TaskId) -> Result<Traverse<'_>, TreeError> {
        self.find(id)?;
        Ok(Traverse {
            tree: self,
            stack: vec![(0, id)],
        })
    }
}

/// A node visited during traversal.
#[derive(Debug, Clone, Copy)]
pub struct Visit<'a> {
    pub depth: usize,
    pub node: &'a TaskNode,
}

/// Lazy pre-order iterator returned by [`TaskTree::traverse`].
pub struct Traverse<'a> {
    tree: &'a TaskTree,
    stack: Vec<(usize, TaskId)>,
}

impl<'a> Iterator for Traverse<'a> {
    type Item = Visit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((depth, id)) = self.stack.pop() {
            let Some(node) = self.tree.nodes.get(&id) else {
                continue;
            };
            self.stack
                .extend(node.children.iter().rev().map(|c| (depth + 1, *c)));
            return Some(Visit { depth, node });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskStatus;
    use pretty_assertions::assert_eq;

    fn node(id: i64, title: &str) -> TaskNode {
        TaskNode::new(TaskId(id), 1, title)
    }

    /// 1
    /// ├── 2
    /// │   └── 4
    /// └── 3
    /// 5
    fn sample_tree() -> TaskTree {
        let mut tree = TaskTree::new();
        tree.insert(node(1, "Launch"), None).unwrap();
        tree.insert(node(2, "Design"), Some(TaskId(1))).unwrap();
        tree.insert(node(3, "Build"), Some(TaskId(1))).unwrap();
        tree.insert(node(4, "Sketch"), Some(TaskId(2))).unwrap();
        tree.insert(node(5, "Retro"), None).unwrap();
        tree
    }

    fn preorder(tree: &TaskTree) -> Vec<(usize, i64)> {
        tree.traverse().map(|v| (v.depth, v.node.id.0)).collect()
    }

    #[test]
    fn traverse_is_preorder_with_depth() {
        let tree = sample_tree();
        assert_eq!(preorder(&tree), vec![(0, 1), (1, 2), (2, 4), (1, 3), (0, 5)]);
        // Restartable
        assert_eq!(tree.traverse().count(), 5);
    }

    #[test]
    fn insert_rejects_missing_or_self_parent() {
        let mut tree = sample_tree();
        let err = tree.insert(node(9, "x"), Some(TaskId(42))).unwrap_err();
        assert_eq!(err, TreeError::InvalidParent { id: TaskId(9), parent: TaskId(42) });
        let err = tree.insert(node(9, "x"), Some(TaskId(9))).unwrap_err();
        assert!(matches!(err, TreeError::InvalidParent { .. }));
        let err = tree.insert(node(2, "dup"), None).unwrap_err();
        assert_eq!(err, TreeError::DuplicateId(TaskId(2)));
    }

    #[test]
    fn insert_at_clamps_index() {
        let mut tree = sample_tree();
        tree.insert_at(node(6, "First"), Some(TaskId(1)), 0).unwrap();
        tree.insert_at(node(7, "Last"), Some(TaskId(1)), 99).unwrap();
        assert_eq!(
            tree.children_of(Some(TaskId(1))),
            &[TaskId(6), TaskId(2), TaskId(3), TaskId(7)]
        );
    }

    #[test]
    fn move_into_descendant_is_rejected() {
        let mut tree = sample_tree();
        let before = preorder(&tree);
        let err = tree.move_node(TaskId(1), Some(TaskId(4)), 0).unwrap_err();
        assert_eq!(err, TreeError::InvalidParent { id: TaskId(1), parent: TaskId(4) });
        let err = tree.move_node(TaskId(2), Some(TaskId(2)), 0).unwrap_err();
        assert!(matches!(err, TreeError::InvalidParent { .. }));
        assert_eq!(preorder(&tree), before);
    }

    #[test]
    fn move_reparents_and_reorders() {
        let mut tree = sample_tree();
        tree.move_node(TaskId(4), None, 0).unwrap();
        assert_eq!(tree.roots(), &[TaskId(4), TaskId(1), TaskId(5)]);
        assert_eq!(tree.find(TaskId(4)).unwrap().parent_id, None);
        assert!(tree.children_of(Some(TaskId(2))).is_empty());

        tree.move_node(TaskId(3), Some(TaskId(1)), 0).unwrap();
        assert_eq!(tree.children_of(Some(TaskId(1))), &[TaskId(3), TaskId(2)]);
        assert!(matches!(
            tree.move_node(TaskId(3), Some(TaskId(77)), 0),
            Err(TreeError::NotFound(TaskId(77)))
        ));
    }

    #[test]
    fn remove_cascades_and_restore_is_exact() {
        let mut tree = sample_tree();
        let subtree = tree.remove(TaskId(2)).unwrap();
        assert_eq!(subtree.parent_id, Some(TaskId(1)));
        assert_eq!(subtree.index, 0);
        assert_eq!(subtree.ids().collect::<Vec<_>>(), vec![TaskId(2), TaskId(4)]);
        assert!(!tree.contains(TaskId(4)));
        assert_eq!(tree.children_of(Some(TaskId(1))), &[TaskId(3)]);

        tree.restore(subtree).unwrap();
        assert_eq!(preorder(&tree), preorder(&sample_tree()));
    }

    #[test]
    fn restore_fails_when_parent_is_gone() {
        let mut tree = sample_tree();
        let inner = tree.remove(TaskId(4)).unwrap();
        tree.remove(TaskId(2)).unwrap();
        let err = tree.restore(inner).unwrap_err();
        assert_eq!(err, TreeError::InvalidParent { id: TaskId(4), parent: TaskId(2) });
    }

    #[test]
    fn update_validates_and_returns_prior() {
        let mut tree = sample_tree();
        let err = tree.update(TaskId(3), &TaskChange::progress(150)).unwrap_err();
        assert!(matches!(err, TreeError::Validation(ref v) if v.field == "progress"));
        assert_eq!(tree.find(TaskId(3)).unwrap().progress, 0);

        let prior = tree
            .update(TaskId(3), &TaskChange::status(TaskStatus::Review))
            .unwrap();
        assert_eq!(prior.status, TaskStatus::Todo);
        assert_eq!(tree.find(TaskId(3)).unwrap().status, TaskStatus::Review);
        assert!(matches!(
            tree.update(TaskId(99), &TaskChange::progress(1)),
            Err(TreeError::NotFound(TaskId(99)))
        ));
    }

    #[test]
    fn overwrite_keeps_structure() {
        let mut tree = sample_tree();
        let mut source = node(999, "Design v2");
        source.version = 4;
        source.children = vec![TaskId(5)];
        tree.overwrite(TaskId(2), &source).unwrap();
        let updated = tree.find(TaskId(2)).unwrap();
        assert_eq!(updated.id, TaskId(2));
        assert_eq!(updated.title, "Design v2");
        assert_eq!(updated.version, 4);
        assert_eq!(updated.children, vec![TaskId(4)]);
        assert_eq!(updated.parent_id, Some(TaskId(1)));
    }

    #[test]
    fn rename_rewires_links() {
        let mut tree = sample_tree();
        tree.rename(TaskId(2), TaskId(20)).unwrap();
        assert_eq!(tree.children_of(Some(TaskId(1))), &[TaskId(20), TaskId(3)]);
        assert_eq!(tree.find(TaskId(4)).unwrap().parent_id, Some(TaskId(20)));
        assert_eq!(tree.find(TaskId(20)).unwrap().id, TaskId(20));
        assert!(!tree.contains(TaskId(2)));
        assert_eq!(tree.rename(TaskId(3), TaskId(5)), Err(TreeError::DuplicateId(TaskId(5))));
    }

    #[test]
    fn revision_bumps_only_on_success() {
        let mut tree = sample_tree();
        let rev = tree.revision();
        let _ = tree.insert(node(1, "dup"), None);
        assert_eq!(tree.revision(), rev);
        tree.update(TaskId(1), &TaskChange::progress(5)).unwrap();
        assert_eq!(tree.revision(), rev + 1);
    }

    #[test]
    fn ancestry() {
        let tree = sample_tree();
        assert!(tree.is_ancestor(TaskId(1), TaskId(4)));
        assert!(!tree.is_ancestor(TaskId(3), TaskId(4)));
        assert!(!tree.is_ancestor(TaskId(4), TaskId(4)));
    }
}
