//! Command implementations

pub mod build;
pub mod clean;
pub mod plan;
pub mod profiles;

use anyhow::{bail, Result};

use kiln::core::Manifest;
use kiln::util::diagnostic::{emit, suggestions, Diagnostic};
use kiln::util::{Config, GlobalContext};

use crate::cli::GlobalArgs;

/// Everything a command needs about the project it runs in.
pub struct Project {
    pub ctx: GlobalContext,
    pub manifest: Manifest,
    pub config: Config,
}

impl Project {
    /// Locate `Kiln.toml` from the working directory and load it with the
    /// merged configuration.
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let mut ctx = GlobalContext::new()?;
        ctx.set_verbose(global.verbose);
        ctx.set_color(global.color);

        let manifest_path = match ctx.find_manifest() {
            Ok(path) => path,
            Err(e) => {
                emit(
                    &Diagnostic::note("no project manifest found")
                        .with_location(ctx.cwd())
                        .with_suggestion(suggestions::NO_MANIFEST),
                    ctx.color(),
                );
                return Err(e.into());
            }
        };
        let manifest = Manifest::load(&manifest_path)?;
        let config = ctx.load_config(manifest.root());

        Ok(Project {
            ctx,
            manifest,
            config,
        })
    }

    /// The build type from the command line, else the configured default.
    pub fn build_type(&self, arg: Option<String>) -> Result<String> {
        if let Some(name) = arg.or_else(|| self.config.build.default_build_type.clone()) {
            return Ok(name);
        }
        emit(
            &Diagnostic::note("pass a build type or set `default-build-type` in `.kiln/config.toml`")
                .with_suggestion(suggestions::LIST_BUILD_TYPES),
            self.ctx.color(),
        );
        bail!(
            "no build type given (valid: {})",
            self.manifest.build_type_names().join(", ")
        )
    }
}
