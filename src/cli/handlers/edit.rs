use std::error::Error;

use super::{Session, parse_date, parse_employee, parse_patch, print_json};
use crate::cli::commands::{RmArgs, SetArgs, SubArgs};
use crate::cli::output::MutationJson;
use crate::model::task::{NewTask, Priority, TaskChange, TaskId, TaskStatus};

pub(super) fn cmd_set(session: &Session, args: SetArgs, json: bool) -> Result<(), Box<dyn Error>> {
    let id: TaskId = args.id.parse()?;
    let change = TaskChange {
        title: args.title,
        description: parse_patch(args.description.as_deref(), |s| Ok(s.to_string()))?,
        status: args.status.as_deref().map(str::parse::<TaskStatus>).transpose()?,
        priority: args.priority.as_deref().map(str::parse::<Priority>).transpose()?,
        assignee_id: parse_patch(args.assignee.as_deref(), parse_employee)?,
        start_date: parse_patch(args.start.as_deref(), parse_date)?,
        due_date: parse_patch(args.due.as_deref(), parse_date)?,
        progress: args.progress,
    };

    let receipt = session.runtime.block_on(session.engine.mutate(id, change))?;
    session.save()?;

    if json {
        print_json(&MutationJson {
            id: receipt.id,
            version: Some(receipt.version),
            action: "updated",
        })
    } else {
        println!("updated #{} (version {})", receipt.id, receipt.version);
        Ok(())
    }
}

pub(super) fn cmd_sub(session: &Session, args: SubArgs, json: bool) -> Result<(), Box<dyn Error>> {
    let parent: TaskId = args.parent.parse()?;
    let fields = NewTask {
        title: args.title,
        status: args
            .status
            .as_deref()
            .map(str::parse::<TaskStatus>)
            .transpose()?
            .unwrap_or_default(),
        assignee_id: args.assignee,
        start_date: args.start.as_deref().map(parse_date).transpose()?,
        due_date: args.due.as_deref().map(parse_date).transpose()?,
        ..Default::default()
    };

    let id = session
        .runtime
        .block_on(session.engine.create_child(parent, fields))?;
    session.save()?;

    if json {
        let version = session.engine.tree().get(id).map(|n| n.version);
        print_json(&MutationJson {
            id,
            version,
            action: "created",
        })
    } else {
        println!("added #{} under #{}", id, parent);
        Ok(())
    }
}

pub(super) fn cmd_rm(session: &Session, args: RmArgs, json: bool) -> Result<(), Box<dyn Error>> {
    let id: TaskId = args.id.parse()?;
    session.runtime.block_on(session.engine.delete_node(id))?;
    session.save()?;

    if json {
        print_json(&MutationJson {
            id,
            version: None,
            action: "deleted",
        })
    } else {
        println!("deleted #{}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::Patch;

    #[test]
    fn description_patch_keeps_text() {
        let patch = parse_patch(Some("ship it"), |s| Ok(s.to_string())).unwrap();
        assert_eq!(patch, Patch::Set("ship it".to_string()));
    }
}
