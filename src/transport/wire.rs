use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use super::TransportError;
use crate::model::task::{
    AttachmentRef, EmployeeId, Priority, ProjectId, TaskId, TaskNode, TaskStatus, ValidationError,
    validate_fields,
};
use crate::model::tree::{TaskTree, TreeError};

/// Dates arrive as `YYYY-MM-DD`, `null`, or an empty string from cleared
/// form fields. The last two both mean "no date".
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// A task as the service sends it. Nested snapshots use `subtasks`; flat
/// listings rely on `parent_task_id` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTask {
    pub task_id: TaskId,
    #[serde(default)]
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<TaskId>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_emp_id: Option<EmployeeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<WireTask>,
}

impl WireTask {
    /// Wire form of a single node, without subtasks.
    pub fn from_node(node: &TaskNode) -> Self {
        WireTask {
            task_id: node.id,
            project_id: node.project_id,
            parent_task_id: node.parent_id,
            title: node.title.clone(),
            description: node.description.clone(),
            status: Some(node.status.as_str().to_string()),
            priority: Some(node.priority.as_str().to_string()),
            start_date: node.start_date,
            due_date: node.due_date,
            assignee_emp_id: node.assignee_id,
            assignee_name: node.assignee_name.clone(),
            progress: Some(i32::from(node.progress)),
            version: node.version,
            attachments: node.attachments.clone(),
            subtasks: Vec::new(),
        }
    }

    /// Wire form of `id` and everything under it.
    pub fn from_subtree(tree: &TaskTree, id: TaskId) -> Option<Self> {
        let node = tree.get(id)?;
        let mut task = WireTask::from_node(node);
        task.subtasks = node
            .children
            .iter()
            .filter_map(|c| WireTask::from_subtree(tree, *c))
            .collect();
        Some(task)
    }

    /// The node this task describes. Subtasks are ignored.
    pub fn to_node(&self) -> Result<TaskNode, ValidationError> {
        let status = match &self.status {
            Some(s) if !s.trim().is_empty() => s.parse::<TaskStatus>()?,
            _ => TaskStatus::default(),
        };
        let priority = match &self.priority {
            Some(p) if !p.trim().is_empty() => p.parse::<Priority>()?,
            _ => Priority::default(),
        };
        let progress = match self.progress {
            None => 0,
            Some(p) => u8::try_from(p)
                .ok()
                .filter(|p| *p <= 100)
                .ok_or_else(|| ValidationError::new("progress", format!("{} is outside 0..=100", p)))?,
        };

        let mut node = TaskNode::new(self.task_id, self.project_id, self.title.clone());
        node.parent_id = self.parent_task_id;
        node.description = self.description.clone();
        node.status = status;
        node.priority = priority;
        node.assignee_id = self.assignee_emp_id;
        node.assignee_name = self.assignee_name.clone();
        node.start_date = self.start_date;
        node.due_date = self.due_date;
        node.progress = progress;
        node.attachments = self.attachments.clone();
        node.version = self.version;
        validate_fields(&node)?;
        Ok(node)
    }

    fn flatten_into(
        self,
        nested_parent: Option<TaskId>,
        out: &mut Vec<(TaskNode, Option<TaskId>)>,
    ) -> Result<(), ValidationError> {
        let parent = nested_parent.or(self.parent_task_id);
        let mut node = self.to_node()?;
        node.parent_id = None;
        let id = node.id;
        out.push((node, parent));
        for sub in self.subtasks {
            sub.flatten_into(Some(id), out)?;
        }
        Ok(())
    }
}

/// Full state of one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub project_id: ProjectId,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub tasks: Vec<WireTask>,
}

impl Snapshot {
    pub fn from_tree(project_id: ProjectId, version: u64, tree: &TaskTree) -> Self {
        let tasks = tree
            .roots()
            .iter()
            .filter_map(|id| WireTask::from_subtree(tree, *id))
            .collect();
        Snapshot {
            project_id,
            version,
            tasks,
        }
    }

    /// Build a tree. Parents may appear after their children in flat
    /// listings; anything whose parent never shows up is an error.
    pub fn into_tree(self) -> Result<TaskTree, TreeError> {
        let mut pending = Vec::new();
        for task in self.tasks {
            task.flatten_into(None, &mut pending)?;
        }

        let mut tree = TaskTree::new();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for (node, parent) in pending {
                match parent {
                    Some(pid) if !tree.contains(pid) => deferred.push((node, parent)),
                    _ => tree.insert(node, parent)?,
                }
            }
            if deferred.len() == before {
                if let Some((node, Some(pid))) = deferred.first() {
                    return Err(TreeError::InvalidParent {
                        id: node.id,
                        parent: *pid,
                    });
                }
                break;
            }
            pending = deferred;
        }
        Ok(tree)
    }
}

/// Server-initiated change, as carried on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    TaskCreated { task: WireTask, version: u64 },
    TaskUpdated { task: WireTask, version: u64 },
    TaskDeleted {
        task_id: TaskId,
        #[serde(default)]
        project_id: ProjectId,
        version: u64,
    },
}

impl PushEvent {
    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Malformed {
            endpoint: "push".to_string(),
            message: e.to_string(),
        })
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            PushEvent::TaskCreated { task, .. } | PushEvent::TaskUpdated { task, .. } => task.task_id,
            PushEvent::TaskDeleted { task_id, .. } => *task_id,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            PushEvent::TaskCreated { version, .. }
            | PushEvent::TaskUpdated { version, .. }
            | PushEvent::TaskDeleted { version, .. } => *version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NESTED: &str = r#"{
        "project_id": 4,
        "version": 12,
        "tasks": [
            {
                "task_id": 1, "project_id": 4, "title": "Launch", "status": "PLANNED",
                "start_date": "", "due_date": "2025-06-30", "version": 3,
                "subtasks": [
                    { "task_id": 2, "project_id": 4, "title": "Design", "status": "done",
                      "progress": 100, "assignee_emp_id": 7, "assignee_name": "Ana" },
                    { "task_id": 3, "project_id": 4, "title": "Build", "priority": "urgent" }
                ]
            }
        ]
    }"#;

    #[test]
    fn nested_snapshot_into_tree() {
        let snapshot: Snapshot = serde_json::from_str(NESTED).unwrap();
        let tree = snapshot.into_tree().unwrap();
        let order: Vec<(usize, i64)> = tree.traverse().map(|v| (v.depth, v.node.id.0)).collect();
        assert_eq!(order, vec![(0, 1), (1, 2), (1, 3)]);

        let root = tree.find(TaskId(1)).unwrap();
        assert_eq!(root.status, TaskStatus::Todo);
        assert_eq!(root.start_date, None);
        assert_eq!(root.version, 3);
        let design = tree.find(TaskId(2)).unwrap();
        assert_eq!(design.status, TaskStatus::Done);
        assert_eq!(design.parent_id, Some(TaskId(1)));
        assert_eq!(design.assignee_name.as_deref(), Some("Ana"));
        assert_eq!(tree.find(TaskId(3)).unwrap().priority, Priority::Urgent);
    }

    #[test]
    fn flat_listing_in_any_order() {
        let snapshot = Snapshot {
            project_id: 1,
            version: 0,
            tasks: vec![
                WireTask {
                    parent_task_id: Some(TaskId(1)),
                    ..task(2, "child")
                },
                task(1, "parent"),
            ],
        };
        let tree = snapshot.into_tree().unwrap();
        assert_eq!(tree.roots(), &[TaskId(1)]);
        assert_eq!(tree.children_of(Some(TaskId(1))), &[TaskId(2)]);
    }

    #[test]
    fn orphan_is_rejected() {
        let snapshot = Snapshot {
            project_id: 1,
            version: 0,
            tasks: vec![WireTask {
                parent_task_id: Some(TaskId(9)),
                ..task(2, "orphan")
            }],
        };
        assert_eq!(
            snapshot.into_tree().unwrap_err(),
            TreeError::InvalidParent { id: TaskId(2), parent: TaskId(9) }
        );
    }

    #[test]
    fn bad_field_is_a_validation_error() {
        let bad = WireTask {
            progress: Some(140),
            ..task(1, "x")
        };
        assert_eq!(bad.to_node().unwrap_err().field, "progress");
        let bad = WireTask {
            status: Some("WAITING".into()),
            ..task(1, "x")
        };
        assert_eq!(bad.to_node().unwrap_err().field, "status");
    }

    #[test]
    fn tree_back_to_snapshot() {
        let snapshot: Snapshot = serde_json::from_str(NESTED).unwrap();
        let tree = snapshot.clone().into_tree().unwrap();
        let back = Snapshot::from_tree(4, 12, &tree);
        assert_eq!(back.tasks.len(), 1);
        assert_eq!(back.tasks[0].subtasks.len(), 2);
        assert_eq!(back.tasks[0].status.as_deref(), Some("TODO"));
        assert_eq!(back.into_tree().unwrap().len(), 3);
    }

    #[test]
    fn push_event_json() {
        let event = PushEvent::from_json(
            r#"{"type":"task_deleted","task_id":5,"project_id":4,"version":9}"#,
        )
        .unwrap();
        assert_eq!(event.task_id(), TaskId(5));
        assert_eq!(event.version(), 9);

        let event = PushEvent::TaskUpdated {
            task: task(3, "Build"),
            version: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.starts_with(r#"{"type":"task_updated""#));
        assert!(PushEvent::from_json("{\"type\":\"nope\"}").is_err());
    }

    fn task(id: i64, title: &str) -> WireTask {
        WireTask {
            task_id: TaskId(id),
            project_id: 1,
            parent_task_id: None,
            title: title.to_string(),
            description: None,
            status: None,
            priority: None,
            start_date: None,
            due_date: None,
            assignee_emp_id: None,
            assignee_name: None,
            progress: None,
            version: 0,
            attachments: Vec::new(),
            subtasks: Vec::new(),
        }
    }
}
