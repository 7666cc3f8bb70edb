//! Read-only views derived from a [`TaskTree`]. Nothing here mutates the
//! tree; every function returns owned data.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::model::config::KanbanItems;
use crate::model::task::{EmployeeId, ProjectId, TaskId, TaskNode, TaskStatus};
use crate::model::tree::TaskTree;

// ---------------------------------------------------------------------------
// Kanban
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KanbanFilter {
    /// Only roots from these projects; empty means every project
    pub project_ids: Vec<ProjectId>,
    pub items: KanbanItems,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KanbanCard {
    pub id: TaskId,
    pub title: String,
    pub project_id: ProjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<EmployeeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    pub progress: u8,
    pub depth: usize,
    pub subtasks: usize,
    pub subtasks_done: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KanbanColumn {
    pub status: TaskStatus,
    pub cards: Vec<KanbanCard>,
}

fn card(tree: &TaskTree, node: &TaskNode, depth: usize) -> KanbanCard {
    let subtasks_done = node
        .children
        .iter()
        .filter_map(|c| tree.get(*c))
        .filter(|c| c.is_done())
        .count();
    KanbanCard {
        id: node.id,
        title: node.title.clone(),
        project_id: node.project_id,
        assignee_id: node.assignee_id,
        assignee_name: node.assignee_name.clone(),
        progress: node.progress,
        depth,
        subtasks: node.children.len(),
        subtasks_done,
    }
}

/// One column per status, in status order. Cards keep tree order.
pub fn to_kanban_columns(tree: &TaskTree, filter: &KanbanFilter) -> Vec<KanbanColumn> {
    let mut columns: Vec<KanbanColumn> = TaskStatus::ALL
        .iter()
        .map(|status| KanbanColumn {
            status: *status,
            cards: Vec::new(),
        })
        .collect();

    let included_roots = tree.roots().iter().filter_map(|id| tree.get(*id)).filter(|root| {
        filter.project_ids.is_empty() || filter.project_ids.contains(&root.project_id)
    });

    for root in included_roots {
        let visits: Vec<(usize, &TaskNode)> = match filter.items {
            KanbanItems::Roots => vec![(0, root)],
            KanbanItems::All => tree
                .traverse_from(root.id)
                .map(|walk| walk.map(|v| (v.depth, v.node)).collect())
                .unwrap_or_default(),
        };
        for (depth, node) in visits {
            if let Some(column) = columns.iter_mut().find(|c| c.status == node.status) {
                column.cards.push(card(tree, node, depth));
            }
        }
    }
    columns
}

// ---------------------------------------------------------------------------
// Flat list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatRow {
    pub id: TaskId,
    pub depth: usize,
    pub title: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<EmployeeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub has_children: bool,
    pub collapsed: bool,
}

impl FlatRow {
    fn from_node(node: &TaskNode, depth: usize, collapsed: bool) -> Self {
        FlatRow {
            id: node.id,
            depth,
            title: node.title.clone(),
            status: node.status,
            progress: node.progress,
            assignee_id: node.assignee_id,
            start_date: node.start_date,
            due_date: node.due_date,
            has_children: !node.children.is_empty(),
            collapsed,
        }
    }
}

/// Depth-first rows. A row in `collapsed` is emitted with its flag set and
/// its descendants are skipped.
pub fn to_flat_rows(tree: &TaskTree, collapsed: &HashSet<TaskId>) -> Vec<FlatRow> {
    let mut rows = Vec::with_capacity(tree.len());
    let mut stack: Vec<(usize, TaskId)> = tree.roots().iter().rev().map(|id| (0, *id)).collect();
    while let Some((depth, id)) = stack.pop() {
        let Some(node) = tree.get(id) else {
            continue;
        };
        let is_collapsed = collapsed.contains(&id);
        rows.push(FlatRow::from_node(node, depth, is_collapsed));
        if !is_collapsed {
            stack.extend(node.children.iter().rev().map(|c| (depth + 1, *c)));
        }
    }
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneeFilter {
    Unassigned,
    Employee(EmployeeId),
}

/// Keyword, status and assignee filters for the list view.
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    /// Matched against title and description
    pub keyword: Option<Regex>,
    pub status: Option<TaskStatus>,
    pub assignee: Option<AssigneeFilter>,
}

impl RowFilter {
    pub fn is_empty(&self) -> bool {
        self.keyword.is_none() && self.status.is_none() && self.assignee.is_none()
    }

    pub fn matches(&self, node: &TaskNode) -> bool {
        if let Some(status) = self.status
            && node.status != status
        {
            return false;
        }
        match self.assignee {
            Some(AssigneeFilter::Unassigned) if node.assignee_id.is_some() => return false,
            Some(AssigneeFilter::Employee(id)) if node.assignee_id != Some(id) => return false,
            _ => {}
        }
        if let Some(re) = &self.keyword {
            let in_title = re.is_match(&node.title);
            let in_description = node.description.as_deref().is_some_and(|d| re.is_match(d));
            if !in_title && !in_description {
                return false;
            }
        }
        true
    }
}

/// Every matching node in tree order, regardless of collapse state.
pub fn filter_rows(tree: &TaskTree, filter: &RowFilter) -> Vec<FlatRow> {
    tree.traverse()
        .filter(|v| filter.matches(v.node))
        .map(|v| FlatRow::from_node(v.node, v.depth, false))
        .collect()
}

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub start: NaiveDate,
    pub due: NaiveDate,
    /// Day after `due`, for renderers with half-open ranges
    pub end_exclusive: NaiveDate,
}

impl CalendarEntry {
    pub fn covers(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.due
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarBucket {
    pub start: NaiveDate,
    pub due: NaiveDate,
    pub entries: Vec<CalendarEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndatedItem {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalendarView {
    pub buckets: Vec<CalendarBucket>,
    pub undated: Vec<UndatedItem>,
}

impl CalendarView {
    pub fn entries_on(&self, day: NaiveDate) -> Vec<&CalendarEntry> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .filter(|e| e.covers(day))
            .collect()
    }

    pub fn dated_len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }
}

/// Split tasks into date-range buckets and an undated list. A task needs
/// both dates to be placed; anything else is undated.
pub fn to_calendar_buckets(tree: &TaskTree) -> CalendarView {
    let mut ranges: BTreeMap<(NaiveDate, NaiveDate), Vec<CalendarEntry>> = BTreeMap::new();
    let mut undated = Vec::new();

    for visit in tree.traverse() {
        let node = visit.node;
        match (node.start_date, node.due_date) {
            (Some(start), Some(due)) => {
                ranges.entry((start, due)).or_default().push(CalendarEntry {
                    id: node.id,
                    title: node.title.clone(),
                    status: node.status,
                    start,
                    due,
                    end_exclusive: due.succ_opt().unwrap_or(due),
                });
            }
            _ => undated.push(UndatedItem {
                id: node.id,
                title: node.title.clone(),
                status: node.status,
                due_date: node.due_date,
            }),
        }
    }

    let buckets = ranges
        .into_iter()
        .map(|((start, due), entries)| CalendarBucket {
            start,
            due,
            entries,
        })
        .collect();
    CalendarView { buckets, undated }
}
