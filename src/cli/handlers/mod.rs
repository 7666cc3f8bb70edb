mod edit;

use std::collections::HashSet;
use std::error::Error;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use regex::Regex;

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::snapshot_io;
use crate::model::config::{KanbanItems, SyncConfig};
use crate::model::task::{EmployeeId, Patch, TaskId, TaskStatus, ValidationError};
use crate::ops::color::{ColorMode, ColorScheme, colorize};
use crate::ops::projection::{AssigneeFilter, KanbanFilter, RowFilter};
use crate::ops::stats::StatsScope;
use crate::sync::SyncEngine;
use crate::transport::MemoryTransport;

/// A loaded engine backed by the snapshot file.
pub(crate) struct Session {
    path: PathBuf,
    runtime: tokio::runtime::Runtime,
    engine: SyncEngine<MemoryTransport>,
}

impl Session {
    fn open(path: &Path) -> Result<Self, Box<dyn Error>> {
        let snapshot = snapshot_io::read_snapshot(path)?;
        let project = snapshot.project_id;
        let transport = MemoryTransport::from_snapshot(snapshot)?;
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        let engine = SyncEngine::new(transport);
        runtime.block_on(engine.load(project))?;
        Ok(Session {
            path: path.to_path_buf(),
            runtime,
            engine,
        })
    }

    /// Write the service's state back to the snapshot file.
    fn save(&self) -> Result<(), Box<dyn Error>> {
        snapshot_io::write_snapshot(&self.path, &self.engine.transport().snapshot())?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli, config: &SyncConfig) -> Result<(), Box<dyn Error>> {
    let json = cli.json;
    let path = PathBuf::from(
        cli.snapshot
            .clone()
            .unwrap_or_else(|| config.store.snapshot.clone()),
    );
    let session = Session::open(&path)?;

    match cli.command {
        // Read commands
        Commands::Stats(args) => cmd_stats(&session, args, json),
        Commands::Kanban(args) => cmd_kanban(&session, args, config, json),
        Commands::List(args) => cmd_list(&session, args, config, json),
        Commands::Calendar(args) => cmd_calendar(&session, args, json),

        // Write commands
        Commands::Set(args) => edit::cmd_set(&session, args, json),
        Commands::Sub(args) => edit::cmd_sub(&session, args, json),
        Commands::Rm(args) => edit::cmd_rm(&session, args, json),
    }
}

// ---------------------------------------------------------------------------
// Argument parsing helpers
// ---------------------------------------------------------------------------

fn is_none_word(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("none")
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::new("date", format!("'{}' is not YYYY-MM-DD", s)))
}

pub(crate) fn parse_employee(s: &str) -> Result<EmployeeId, ValidationError> {
    s.trim()
        .parse()
        .map_err(|_| ValidationError::new("assignee", format!("'{}' is not an employee id", s)))
}

/// `None` keeps the field, "none" clears it, anything else is parsed.
pub(crate) fn parse_patch<T>(
    value: Option<&str>,
    parse: impl Fn(&str) -> Result<T, ValidationError>,
) -> Result<Patch<T>, ValidationError> {
    match value {
        None => Ok(Patch::Keep),
        Some(v) if is_none_word(v) => Ok(Patch::Clear),
        Some(v) => parse(v).map(Patch::Set),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_text(text: &str) {
    if !text.is_empty() {
        println!("{}", text);
    }
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

fn cmd_stats(session: &Session, args: StatsArgs, json: bool) -> Result<(), Box<dyn Error>> {
    let scope_id = args.scope.as_deref().map(str::parse::<TaskId>).transpose()?;
    let scope = scope_id.map_or(StatsScope::All, StatsScope::Subtree);
    let stats = session.engine.stats(scope)?;
    if json {
        print_json(&StatsJson {
            scope: scope_id,
            stats,
        })
    } else {
        print_text(&render_stats(&stats));
        Ok(())
    }
}

fn cmd_kanban(
    session: &Session,
    args: KanbanArgs,
    config: &SyncConfig,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let filter = KanbanFilter {
        project_ids: args.projects,
        items: if args.all {
            KanbanItems::All
        } else {
            config.ui.kanban_items
        },
    };
    let columns = session.engine.kanban_view(&filter);
    if json {
        print_json(&columns)
    } else {
        print_text(&render_kanban(&columns));
        Ok(())
    }
}

fn cmd_list(
    session: &Session,
    args: ListArgs,
    config: &SyncConfig,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let collapsed = args
        .collapse
        .iter()
        .map(|s| s.parse::<TaskId>())
        .collect::<Result<HashSet<_>, _>>()?;
    let filter = RowFilter {
        keyword: args.search.as_deref().map(Regex::new).transpose()?,
        status: args.status.as_deref().map(str::parse::<TaskStatus>).transpose()?,
        assignee: match args.assignee.as_deref() {
            None => None,
            Some(v) if is_none_word(v) => Some(AssigneeFilter::Unassigned),
            Some(v) => Some(AssigneeFilter::Employee(parse_employee(v)?)),
        },
    };
    let rows = if filter.is_empty() {
        session.engine.flat_view(&collapsed)
    } else {
        session.engine.filtered_view(&filter)
    };

    let colors = match args.color_by.as_deref() {
        None => None,
        Some(mode) => {
            let mode: ColorMode = mode.parse()?;
            let scheme = ColorScheme::from_config(&config.ui);
            let tree = session.engine.tree();
            let colors: Vec<_> = rows
                .iter()
                .filter_map(|row| tree.get(row.id))
                .map(|node| colorize(node, mode, &scheme))
                .collect();
            Some(colors)
        }
    };

    if json {
        let out: Vec<RowJson> = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| RowJson {
                row,
                color: colors.as_ref().and_then(|c| c.get(i).copied()),
            })
            .collect();
        print_json(&out)
    } else {
        print_text(&render_rows(&rows, colors.as_deref()));
        Ok(())
    }
}

fn cmd_calendar(session: &Session, args: CalendarArgs, json: bool) -> Result<(), Box<dyn Error>> {
    let on = args.on.as_deref().map(parse_date).transpose()?;
    let view = session.engine.calendar_view();
    if json {
        match on {
            Some(day) => print_json(&view.entries_on(day)),
            None => print_json(&view),
        }
    } else {
        print_text(&render_calendar(&view, on));
        Ok(())
    }
}
