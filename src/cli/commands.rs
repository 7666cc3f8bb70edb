use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tsync", about = concat!("tsync v", env!("CARGO_PKG_VERSION"), " - task tree sync and views"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Snapshot file acting as the task service (default from config, then tasks.json)
    #[arg(short = 'f', long = "snapshot", global = true)]
    pub snapshot: Option<String>,

    /// Config file (default: ./tsync.toml if present)
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show completion statistics
    Stats(StatsArgs),
    /// Show the Kanban board
    Kanban(KanbanArgs),
    /// Show tasks as an indented list
    List(ListArgs),
    /// Show dated tasks by range, and undated ones
    Calendar(CalendarArgs),
    /// Change fields of a task
    Set(SetArgs),
    /// Add a sub-task
    Sub(SubArgs),
    /// Delete a task and its sub-tasks
    Rm(RmArgs),
}

#[derive(Args)]
pub struct StatsArgs {
    /// Count only this task and its descendants
    #[arg(long)]
    pub scope: Option<String>,
}

#[derive(Args)]
pub struct KanbanArgs {
    /// Only roots from this project (repeatable)
    #[arg(long = "project")]
    pub projects: Vec<u64>,
    /// Put every task on the board, not just top-level ones
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Hide the sub-tasks of this task (repeatable)
    #[arg(long = "collapse")]
    pub collapse: Vec<String>,
    /// Only tasks with this status
    #[arg(long)]
    pub status: Option<String>,
    /// Only tasks assigned to this employee id, or "none"
    #[arg(long)]
    pub assignee: Option<String>,
    /// Regex matched against title and description
    #[arg(long)]
    pub search: Option<String>,
    /// Show a colour column: assignee, status or project
    #[arg(long = "color-by")]
    pub color_by: Option<String>,
}

#[derive(Args)]
pub struct CalendarArgs {
    /// Only tasks running on this day (YYYY-MM-DD)
    #[arg(long)]
    pub on: Option<String>,
}

#[derive(Args)]
pub struct SetArgs {
    /// Task id
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub progress: Option<i32>,
    #[arg(long)]
    pub priority: Option<String>,
    /// Employee id, or "none" to unassign
    #[arg(long)]
    pub assignee: Option<String>,
    /// YYYY-MM-DD, or "none" to clear
    #[arg(long)]
    pub start: Option<String>,
    /// YYYY-MM-DD, or "none" to clear
    #[arg(long)]
    pub due: Option<String>,
    /// Text, or "none" to clear
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args)]
pub struct SubArgs {
    /// Parent task id
    pub parent: String,
    /// Title of the new task
    pub title: String,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub assignee: Option<u64>,
    /// YYYY-MM-DD
    #[arg(long)]
    pub start: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    pub due: Option<String>,
}

#[derive(Args)]
pub struct RmArgs {
    /// Task id
    pub id: String,
}
