//! `kiln plan` command

use anyhow::Result;

use crate::cli::{GlobalArgs, PlanArgs};
use crate::commands::Project;
use kiln::ops::kiln_build::plan;

pub fn execute(args: PlanArgs, global: &GlobalArgs) -> Result<()> {
    let project = Project::load(global)?;
    let build_type = project.build_type(args.build_type)?;

    let (_, plan) = plan(&project.manifest, &build_type)?;

    if plan.is_up_to_date() {
        println!("{} is up to date ({} task(s))", build_type, plan.skipped);
        return Ok(());
    }

    for task in &plan.dirty {
        println!("{:>9} {} ({})", task.kind.as_str(), task.id, task.reason);
    }
    println!(
        "{} task(s) to run, {} up to date",
        plan.dirty.len(),
        plan.skipped
    );
    Ok(())
}
