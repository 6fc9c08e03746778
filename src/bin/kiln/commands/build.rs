//! `kiln build` command

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::{BuildArgs, GlobalArgs, MessageFormat};
use crate::commands::Project;
use kiln::builder::{BuildObserver, GnuToolchain, JsonObserver, ProcessInvoker, ProgressObserver};
use kiln::ops::kiln_build::{build, BuildEnv, BuildError, BuildOptions};
use kiln::util::diagnostic::emit;

pub fn execute(args: BuildArgs, global: &GlobalArgs) -> Result<()> {
    let project = Project::load(global)?;
    let build_type = project.build_type(args.build_type)?;

    // Jobs: CLI > config > manifest > built-in default
    let jobs = args.jobs.or(project.config.build.jobs);
    let publish = !args.no_publish && project.config.build.publish.unwrap_or(true);

    let opts = BuildOptions {
        build_type,
        jobs,
        publish,
    };

    let observer: Box<dyn BuildObserver> = match args.message_format {
        MessageFormat::Human => Box::new(ProgressObserver::new(project.ctx.is_verbose())),
        MessageFormat::Json => Box::new(JsonObserver),
    };
    let invoker = ProcessInvoker::in_dir(project.manifest.root());
    let env = BuildEnv {
        toolchain: &GnuToolchain,
        invoker: &invoker,
        observer: observer.as_ref(),
        abort: Arc::new(AtomicBool::new(false)),
    };

    let result = match build(&project.manifest, &opts, &env) {
        Ok(result) => result,
        Err(e) => {
            if let Some(build_err) = e.downcast_ref::<BuildError>() {
                for diag in build_err.diagnostics() {
                    emit(&diag, project.ctx.color());
                }
            }
            return Err(e);
        }
    };

    if args.message_format == MessageFormat::Human {
        match &result.published {
            Some(link) => eprintln!(
                "   Published {} -> {}",
                link.display(),
                result.artifact.display()
            ),
            None => eprintln!("    Artifact {}", result.artifact.display()),
        }
    }

    Ok(())
}
