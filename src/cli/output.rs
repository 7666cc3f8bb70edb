use chrono::NaiveDate;
use serde::Serialize;

use crate::model::task::{TaskId, TaskStatus};
use crate::ops::color::ColorKey;
use crate::ops::projection::{CalendarEntry, CalendarView, FlatRow, KanbanColumn};
use crate::ops::stats::TaskStats;
use crate::util::unicode::{fit_to_width, truncate_to_width};

const TITLE_CELLS: usize = 60;

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatsJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<TaskId>,
    #[serde(flatten)]
    pub stats: TaskStats,
}

#[derive(Serialize)]
pub struct RowJson {
    #[serde(flatten)]
    pub row: FlatRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorKey>,
}

#[derive(Serialize)]
pub struct MutationJson {
    pub id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub action: &'static str,
}

// ---------------------------------------------------------------------------
// Text output
// ---------------------------------------------------------------------------

pub fn render_stats(stats: &TaskStats) -> String {
    let mut lines = vec![format!(
        "{} tasks, {} done ({}%)",
        stats.total, stats.done, stats.done_ratio
    )];
    for status in TaskStatus::ALL {
        let count = stats.by_status.get(&status).copied().unwrap_or(0);
        lines.push(format!("  {:<12}{}", status.as_str(), count));
    }
    lines.join("\n")
}

pub fn render_kanban(columns: &[KanbanColumn]) -> String {
    let mut lines = Vec::new();
    for column in columns {
        lines.push(format!("{} ({})", column.status, column.cards.len()));
        for card in &column.cards {
            let mut line = format!(
                "  {}#{} {}",
                "  ".repeat(card.depth),
                card.id,
                truncate_to_width(&card.title, TITLE_CELLS)
            );
            if card.subtasks > 0 {
                line.push_str(&format!(" [{}/{}]", card.subtasks_done, card.subtasks));
            }
            if let Some(name) = &card.assignee_name {
                line.push_str(&format!(" @{}", name));
            }
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn row_marker(row: &FlatRow) -> &'static str {
    match (row.has_children, row.collapsed) {
        (true, true) => "\u{25b8}",
        (true, false) => "\u{25be}",
        (false, _) => "-",
    }
}

/// One line per row. `colors`, when given, lines up with `rows`.
pub fn render_rows(rows: &[FlatRow], colors: Option<&[ColorKey]>) -> String {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let color = colors
                .and_then(|c| c.get(i))
                .map(|c| format!("{}  ", c))
                .unwrap_or_default();
            format!(
                "{:>5}  {} {:>3}%  {}{}{} {}",
                row.id,
                fit_to_width(row.status.as_str(), 11),
                row.progress,
                color,
                "  ".repeat(row.depth),
                row_marker(row),
                truncate_to_width(&row.title, TITLE_CELLS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn entry_line(entry: &CalendarEntry) -> String {
    format!(
        "  #{} {} ({})",
        entry.id,
        truncate_to_width(&entry.title, TITLE_CELLS),
        entry.status
    )
}

pub fn render_calendar(view: &CalendarView, on: Option<NaiveDate>) -> String {
    let mut lines = Vec::new();
    if let Some(day) = on {
        lines.push(day.to_string());
        lines.extend(view.entries_on(day).into_iter().map(entry_line));
        return lines.join("\n");
    }
    for bucket in &view.buckets {
        lines.push(format!("{} .. {}", bucket.start, bucket.due));
        lines.extend(bucket.entries.iter().map(entry_line));
    }
    if !view.undated.is_empty() {
        lines.push("undated".to_string());
        for item in &view.undated {
            let mut line = format!(
                "  #{} {} ({})",
                item.id,
                truncate_to_width(&item.title, TITLE_CELLS),
                item.status
            );
            if let Some(due) = item.due_date {
                line.push_str(&format!(" due {}", due));
            }
            lines.push(line);
        }
    }
    lines.join("\n")
}
