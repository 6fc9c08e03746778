//! `kiln clean` command

use anyhow::Result;

use crate::cli::{CleanArgs, GlobalArgs};
use crate::commands::Project;
use kiln::ops::kiln_clean::clean;

pub fn execute(args: CleanArgs, global: &GlobalArgs) -> Result<()> {
    let project = Project::load(global)?;
    let build_type = project.build_type(args.build_type)?;

    let result = clean(&project.manifest, &build_type)?;
    eprintln!("     Removed {}", result.dir.display());

    Ok(())
}
