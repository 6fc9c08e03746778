//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Kiln - an incremental build tool for C and C++ projects
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every command.
pub struct GlobalArgs {
    pub verbose: bool,
    pub color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the artifact for a build type
    Build(BuildArgs),

    /// Show which tasks would run, and why
    Plan(PlanArgs),

    /// Remove the outputs of a build type
    Clean(CleanArgs),

    /// List build types and resolved profiles
    Profiles(ProfilesArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

#[derive(Args)]
pub struct BuildArgs {
    /// Build type (e.g. Debug, Release)
    pub build_type: Option<String>,

    /// Number of parallel jobs
    #[arg(short, long, env = "KILN_JOBS")]
    pub jobs: Option<usize>,

    /// Do not update the published artifact link
    #[arg(long)]
    pub no_publish: bool,

    /// Output format for build progress
    #[arg(long, value_enum, default_value = "human")]
    pub message_format: MessageFormat,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Build type (e.g. Debug, Release)
    pub build_type: Option<String>,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Build type whose outputs are removed
    pub build_type: Option<String>,
}

#[derive(Args)]
pub struct ProfilesArgs {
    /// Resolve profiles with this build type applied
    pub build_type: Option<String>,
}
