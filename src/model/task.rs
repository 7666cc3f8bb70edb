use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type ProjectId = u64;
pub type EmployeeId = u64;

/// Task identifier. Server-assigned ids are positive; ids minted locally for
/// an optimistic create are negative until the server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// The n-th temporary id (n starts at 1).
    pub fn temporary(n: u32) -> Self {
        TaskId(-i64::from(n))
    }

    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('#');
        trimmed
            .parse::<i64>()
            .map(TaskId)
            .map_err(|_| ValidationError::new("id", format!("'{}' is not a task id", s)))
    }
}

/// A field constraint was violated. Names the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status & priority
// ---------------------------------------------------------------------------

/// Workflow status, in board order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    #[serde(alias = "PLANNED")]
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Review => "REVIEW",
            TaskStatus::Done => "DONE",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Todo => "To do",
            TaskStatus::InProgress => "In progress",
            TaskStatus::Review => "In review",
            TaskStatus::Done => "Done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a status or priority name: uppercase, `-` and spaces become `_`.
fn normalize_name(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "TODO" | "PLANNED" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" | "ACTIVE" => Ok(TaskStatus::InProgress),
            "REVIEW" => Ok(TaskStatus::Review),
            "DONE" => Ok(TaskStatus::Done),
            _ => Err(ValidationError::new(
                "status",
                format!("unknown status '{}'", s),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            "URGENT" => Ok(Priority::Urgent),
            _ => Err(ValidationError::new(
                "priority",
                format!("unknown priority '{}'", s),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Metadata for a file already attached on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: u64,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// A single task in the tree.
///
/// `children` holds display order. `version` is the server's per-node
/// counter; optimistic edits never bump it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    pub parent_id: Option<TaskId>,
    pub project_id: ProjectId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee_id: Option<EmployeeId>,
    pub assignee_name: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub progress: u8,
    pub attachments: Vec<AttachmentRef>,
    pub children: Vec<TaskId>,
    pub version: u64,
}

impl TaskNode {
    pub fn new(id: TaskId, project_id: ProjectId, title: impl Into<String>) -> Self {
        TaskNode {
            id,
            parent_id: None,
            project_id,
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            assignee_id: None,
            assignee_name: None,
            start_date: None,
            due_date: None,
            progress: 0,
            attachments: Vec::new(),
            children: Vec::new(),
            version: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Copy data fields and version from `source`. Identity and structure
    /// (id, parent, children) stay as they are.
    pub(crate) fn copy_fields_from(&mut self, source: &TaskNode) {
        self.project_id = source.project_id;
        self.title = source.title.clone();
        self.description = source.description.clone();
        self.status = source.status;
        self.priority = source.priority;
        self.assignee_id = source.assignee_id;
        self.assignee_name = source.assignee_name.clone();
        self.start_date = source.start_date;
        self.due_date = source.due_date;
        self.progress = source.progress;
        self.attachments = source.attachments.clone();
        self.version = source.version;
    }
}

fn check_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::new("title", "title must not be blank"));
    }
    Ok(())
}

fn check_progress(progress: i32) -> Result<u8, ValidationError> {
    u8::try_from(progress)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| ValidationError::new("progress", format!("{} is outside 0..=100", progress)))
}

fn check_dates(start: Option<NaiveDate>, due: Option<NaiveDate>) -> Result<(), ValidationError> {
    if let (Some(start), Some(due)) = (start, due)
        && start > due
    {
        return Err(ValidationError::new(
            "start_date",
            format!("start {} is after due {}", start, due),
        ));
    }
    Ok(())
}

/// Check the field constraints every stored node must satisfy.
pub fn validate_fields(node: &TaskNode) -> Result<(), ValidationError> {
    check_title(&node.title)?;
    check_progress(i32::from(node.progress))?;
    check_dates(node.start_date, node.due_date)
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// Update for a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T: Clone> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// The value the field has after applying this patch to `current`.
    pub fn resolve(&self, current: Option<&T>) -> Option<T> {
        match self {
            Patch::Keep => current.cloned(),
            Patch::Clear => None,
            Patch::Set(v) => Some(v.clone()),
        }
    }

    fn set_value(&self) -> Option<&T> {
        match self {
            Patch::Set(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Clear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    StatusChange,
    ProgressChange,
    FieldEdit,
    CreateChild,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::StatusChange => "status change",
            MutationKind::ProgressChange => "progress change",
            MutationKind::FieldEdit => "field edit",
            MutationKind::CreateChild => "create child",
            MutationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A partial update of a task's data fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskChange {
    pub title: Option<String>,
    pub description: Patch<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignee_id: Patch<EmployeeId>,
    pub start_date: Patch<NaiveDate>,
    pub due_date: Patch<NaiveDate>,
    /// Signed so out-of-range input survives until validation.
    pub progress: Option<i32>,
}

impl TaskChange {
    pub fn status(status: TaskStatus) -> Self {
        TaskChange {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: i32) -> Self {
        TaskChange {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        TaskChange {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_keep()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignee_id.is_keep()
            && self.start_date.is_keep()
            && self.due_date.is_keep()
            && self.progress.is_none()
    }

    pub fn kind(&self) -> MutationKind {
        let only_status = TaskChange {
            status: self.status,
            ..Default::default()
        };
        let only_progress = TaskChange {
            progress: self.progress,
            ..Default::default()
        };
        if self.status.is_some() && *self == only_status {
            MutationKind::StatusChange
        } else if self.progress.is_some() && *self == only_progress {
            MutationKind::ProgressChange
        } else {
            MutationKind::FieldEdit
        }
    }

    /// Checks that need no tree state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::new("change", "nothing to change"));
        }
        if let Some(title) = &self.title {
            check_title(title)?;
        }
        if let Some(progress) = self.progress {
            check_progress(progress)?;
        }
        check_dates(
            self.start_date.set_value().copied(),
            self.due_date.set_value().copied(),
        )
    }

    /// The node as it would look after this change. `node` is not touched.
    pub fn apply_to(&self, node: &TaskNode) -> Result<TaskNode, ValidationError> {
        self.validate()?;
        let mut next = node.clone();
        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        next.description = self.description.resolve(node.description.as_ref());
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(priority) = self.priority {
            next.priority = priority;
        }
        let assignee = self.assignee_id.resolve(node.assignee_id.as_ref());
        if assignee != node.assignee_id {
            next.assignee_id = assignee;
            next.assignee_name = None;
        }
        next.start_date = self.start_date.resolve(node.start_date.as_ref());
        next.due_date = self.due_date.resolve(node.due_date.as_ref());
        if let Some(progress) = self.progress {
            next.progress = check_progress(progress)?;
        }
        check_dates(next.start_date, next.due_date)?;
        Ok(next)
    }
}

/// Fields for a new sub-task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee_id: Option<EmployeeId>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub progress: i32,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        NewTask {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_title(&self.title)?;
        check_progress(self.progress)?;
        check_dates(self.start_date, self.due_date)
    }

    /// Build the node for this task. Structure fields are left empty; the
    /// tree fills in the parent on insert.
    pub fn to_node(&self, id: TaskId, project_id: ProjectId) -> Result<TaskNode, ValidationError> {
        self.validate()?;
        let mut node = TaskNode::new(id, project_id, self.title.clone());
        node.description = self.description.clone();
        node.status = self.status;
        node.priority = self.priority;
        node.assignee_id = self.assignee_id;
        node.start_date = self.start_date;
        node.due_date = self.due_date;
        node.progress = check_progress(self.progress)?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample_node() -> TaskNode {
        let mut node = TaskNode::new(TaskId(7), 1, "Write report");
        node.assignee_id = Some(3);
        node.assignee_name = Some("Kim".into());
        node.start_date = Some(date("2025-03-01"));
        node.due_date = Some(date("2025-03-10"));
        node.progress = 40;
        node.version = 2;
        node
    }

    #[test]
    fn status_parsing_is_lenient() {
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("Planned".parse::<TaskStatus>().unwrap(), TaskStatus::Todo);
        assert_eq!(" done ".parse::<TaskStatus>().unwrap(), TaskStatus::Done);
        let err = "blocked".parse::<TaskStatus>().unwrap_err();
        assert_eq!(err.field, "status");
    }

    #[test]
    fn status_serde_accepts_legacy_planned() {
        let status: TaskStatus = serde_json::from_str("\"PLANNED\"").unwrap();
        assert_eq!(status, TaskStatus::Todo);
        assert_eq!(serde_json::to_string(&TaskStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
    }

    #[test]
    fn statuses_are_ordered() {
        assert!(TaskStatus::Todo < TaskStatus::InProgress);
        assert!(TaskStatus::Review < TaskStatus::Done);
    }

    #[test]
    fn change_kind_classification() {
        assert_eq!(TaskChange::status(TaskStatus::Done).kind(), MutationKind::StatusChange);
        assert_eq!(TaskChange::progress(10).kind(), MutationKind::ProgressChange);
        let mixed = TaskChange {
            status: Some(TaskStatus::Done),
            progress: Some(100),
            ..Default::default()
        };
        assert_eq!(mixed.kind(), MutationKind::FieldEdit);
        assert_eq!(TaskChange::title("x").kind(), MutationKind::FieldEdit);
    }

    #[test]
    fn validate_rejects_bad_fields() {
        assert_eq!(TaskChange::progress(150).validate().unwrap_err().field, "progress");
        assert_eq!(TaskChange::progress(-1).validate().unwrap_err().field, "progress");
        assert_eq!(TaskChange::title("   ").validate().unwrap_err().field, "title");
        assert_eq!(TaskChange::default().validate().unwrap_err().field, "change");
        let dates = TaskChange {
            start_date: Patch::Set(date("2025-05-02")),
            due_date: Patch::Set(date("2025-05-01")),
            ..Default::default()
        };
        assert_eq!(dates.validate().unwrap_err().field, "start_date");
    }

    #[test]
    fn apply_checks_dates_against_current_values() {
        let node = sample_node();
        let change = TaskChange {
            start_date: Patch::Set(date("2025-04-01")),
            ..Default::default()
        };
        // Only the start is set, so the stateless check passes and the
        // resulting node is what fails.
        assert!(change.validate().is_ok());
        assert_eq!(change.apply_to(&node).unwrap_err().field, "start_date");
    }

    #[test]
    fn apply_keeps_untouched_fields() {
        let node = sample_node();
        let change = TaskChange {
            description: Patch::Set("details".into()),
            due_date: Patch::Clear,
            ..Default::default()
        };
        let next = change.apply_to(&node).unwrap();
        assert_eq!(next.description.as_deref(), Some("details"));
        assert_eq!(next.due_date, None);
        assert_eq!(next.start_date, node.start_date);
        assert_eq!(next.assignee_name.as_deref(), Some("Kim"));
        assert_eq!(next.version, node.version);
    }

    #[test]
    fn reassigning_drops_cached_name() {
        let node = sample_node();
        let change = TaskChange {
            assignee_id: Patch::Set(9),
            ..Default::default()
        };
        let next = change.apply_to(&node).unwrap();
        assert_eq!(next.assignee_id, Some(9));
        assert_eq!(next.assignee_name, None);
    }

    #[test]
    fn status_and_progress_stay_independent() {
        let node = sample_node();
        let next = TaskChange::status(TaskStatus::Done).apply_to(&node).unwrap();
        assert_eq!(next.progress, 40);
    }

    #[test]
    fn new_task_builds_node() {
        let fields = NewTask {
            progress: 20,
            ..NewTask::titled("Sub")
        };
        let node = fields.to_node(TaskId::temporary(1), 4).unwrap();
        assert_eq!(node.id, TaskId(-1));
        assert!(node.id.is_temporary());
        assert_eq!(node.progress, 20);
        assert_eq!(node.project_id, 4);
        assert_eq!(NewTask::titled("").validate().unwrap_err().field, "title");
    }

    #[test]
    fn task_id_parsing() {
        assert_eq!("#12".parse::<TaskId>().unwrap(), TaskId(12));
        assert!("abc".parse::<TaskId>().is_err());
    }
}
