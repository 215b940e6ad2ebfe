//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;
mod inspect;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// snuff - Incremental script and shader build pipeline
#[derive(Parser)]
#[command(name = "snuff")]
#[command(about = "snuff - Compile scripts and HLSL shaders into tagged containers, incrementally")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by `build` and `watch`
#[derive(Args, Debug, Clone, Default)]
pub struct ProjectArgs {
    /// Source root (overrides snuff.toml)
    #[arg(long)]
    pub src: Option<PathBuf>,

    /// Build root (overrides snuff.toml)
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Number of worker threads (0 = hardware concurrency)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Build even if the source root has no .snuff marker
    #[arg(long)]
    pub no_marker: bool,

    /// Emit progress as JSON lines on stderr
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile every stale file once
    Build {
        #[command(flatten)]
        project: ProjectArgs,

        /// Ignore the ledger and rebuild everything
        #[arg(short, long)]
        force: bool,
    },

    /// Build, then rebuild whenever the source tree changes
    Watch {
        #[command(flatten)]
        project: ProjectArgs,

        /// Idle re-scan interval in milliseconds (overrides snuff.toml)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: Option<u64>,

        /// Ignore the ledger on the first pass
        #[arg(short, long)]
        force: bool,
    },

    /// Create a new project with a marked source root
    Init {
        /// Project directory (created if missing)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Project name (default: directory name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Show which files are stale without building
    Status {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Print or extract the payload of a compiled artifact
    Decompile {
        /// Compiled container to read
        artifact: PathBuf,

        /// Write the payload here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Initialise `env_logger` from the verbosity flags. `RUST_LOG` wins when set.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => log::LevelFilter::Error,
        (false, 0) => log::LevelFilter::Warn,
        (false, 1) => log::LevelFilter::Info,
        (false, 2) => log::LevelFilter::Debug,
        (false, _) => log::LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp(None).parse_default_env();
    // A second init (e.g. from tests) is harmless
    let _ = builder.try_init();
}

pub fn run() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::from(EXIT_SUCCESS)
                }
                _ => ExitCode::from(EXIT_INVALID_ARGS),
            };
        }
    };

    init_logging(cli.verbose, cli.quiet);
    let verbose = cli.verbose > 0;

    match cli.command {
        Commands::Build { project, force } => build::run_build(&project, force, verbose),
        Commands::Watch { project, interval_ms, force } => {
            build::run_watch(&project, interval_ms, force, verbose)
        }
        Commands::Init { path, name } => build::run_init(&path, name.as_deref()),
        Commands::Status { project } => inspect::run_status(&project),
        Commands::Decompile { artifact, output } => {
            inspect::run_decompile(&artifact, output.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::try_parse_from([
            "snuff", "build", "--src", "content", "-o", "bin", "-j", "3", "--force", "--json",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Build { project, force } => {
                assert!(force);
                assert!(project.json);
                assert_eq!(project.src, Some(PathBuf::from("content")));
                assert_eq!(project.out, Some(PathBuf::from("bin")));
                assert_eq!(project.jobs, Some(3));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_parse_watch_interval() {
        let cli = Cli::try_parse_from(["snuff", "watch", "--interval-ms", "250"]).unwrap();
        match cli.command {
            Commands::Watch { interval_ms, force, .. } => {
                assert_eq!(interval_ms, Some(250));
                assert!(!force);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Cli::try_parse_from(["snuff", "watch", "--interval-ms", "0"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["snuff", "-q", "-v", "status"]).is_err());
    }

    #[test]
    fn test_decompile_requires_artifact() {
        assert!(Cli::try_parse_from(["snuff", "decompile"]).is_err());
        let cli = Cli::try_parse_from(["snuff", "decompile", "a.js", "-o", "a.txt"]).unwrap();
        assert!(matches!(cli.command, Commands::Decompile { output: Some(_), .. }));
    }
}
