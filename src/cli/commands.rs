use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::lifecycle::LifecycleAction;

/// Container lifecycle manager for single-node GPU service deployments
#[derive(Parser, Debug)]
#[command(
    name = "dockhand",
    about = "Container lifecycle manager for single-node GPU service deployments",
    version,
    long_about = "dockhand probes the host (GPU, container runtime, ports), loads a \
                  compose-style deployment file, and applies one lifecycle action per \
                  invocation: rebuild, restart, stop, show logs, or clean rebuild. \
                  Run without a subcommand on a terminal to pick from a menu."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Increase verbosity")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Deployment definition file (default: dockhand.yaml or DOCKHAND_FILE)"
    )]
    pub file: Option<PathBuf>,

    #[arg(
        short = 'y',
        long,
        global = true,
        help = "Answer yes to operator confirmations (required for destructive steps without a terminal)"
    )]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Probe host capabilities",
        long_about = "Reports GPU presence, container runtime availability, and whether \
                      the deployment's declared host ports are already bound.\n\n\
                      Examples:\n  \
                      dockhand probe\n  \
                      dockhand probe --format json"
    )]
    Probe(FormatArgs),

    #[command(about = "Stop, rebuild images without cache, and relaunch")]
    Rebuild(FormatArgs),

    #[command(about = "Stop and relaunch from cached images (no rebuild)")]
    Restart(FormatArgs),

    #[command(about = "Gracefully stop and remove all running services")]
    Stop(FormatArgs),

    #[command(about = "Follow logs of running services (read-only)")]
    Logs,

    #[command(
        name = "clean-rebuild",
        about = "Prune dangling images, pull updated bases, rebuild, relaunch"
    )]
    CleanRebuild(FormatArgs),
}

impl Commands {
    /// The lifecycle action a subcommand maps to; `Probe` has none.
    pub fn action(&self) -> Option<LifecycleAction> {
        match self {
            Commands::Probe(_) => None,
            Commands::Rebuild(_) => Some(LifecycleAction::Rebuild),
            Commands::Restart(_) => Some(LifecycleAction::Restart),
            Commands::Stop(_) => Some(LifecycleAction::Stop),
            Commands::Logs => Some(LifecycleAction::ShowLogs),
            Commands::CleanRebuild(_) => Some(LifecycleAction::CleanRebuild),
        }
    }

    pub fn format(&self) -> OutputFormatArg {
        match self {
            Commands::Probe(args)
            | Commands::Rebuild(args)
            | Commands::Restart(args)
            | Commands::Stop(args)
            | Commands::CleanRebuild(args) => args.format,
            Commands::Logs => OutputFormatArg::Human,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct FormatArgs {
    #[arg(
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Human,
    Json,
}
