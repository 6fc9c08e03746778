//! `kiln profiles` command

use anyhow::Result;

use crate::cli::{GlobalArgs, ProfilesArgs};
use crate::commands::Project;
use kiln::ops::kiln_profiles::{format_report, profiles};

pub fn execute(args: ProfilesArgs, global: &GlobalArgs) -> Result<()> {
    let project = Project::load(global)?;
    let report = profiles(&project.manifest, args.build_type.as_deref())?;
    print!("{}", format_report(&report));
    Ok(())
}
