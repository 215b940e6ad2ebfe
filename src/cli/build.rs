//! Build command implementations (build, watch, init)

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use super::{ProjectArgs, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::{
    is_source_root, BuildLedger, BuildSession, BuildThreadPool, ConsoleProgress, JsonProgress,
    ProgressReporter,
};
use crate::config::{
    check, default_config, find_config, init_project, load_config, merge_cli_overrides,
    resolve_path, CliOverrides, SnuffConfig,
};

/// Configuration plus absolute source and build roots.
pub(super) struct Project {
    pub config: SnuffConfig,
    pub src: PathBuf,
    pub out: PathBuf,
}

/// Load snuff.toml (or defaults), apply CLI overrides and resolve the roots.
///
/// Errors are printed; the caller just returns the exit code.
pub(super) fn resolve_project(
    args: &ProjectArgs,
    interval_ms: Option<u64>,
) -> Result<Project, ExitCode> {
    let (mut config, project_root) = match find_config() {
        Some(config_path) => {
            log::info!("using config {}", config_path.display());
            let cfg = load_config(Some(&config_path)).map_err(|e| {
                eprintln!("Error loading config: {}", e);
                ExitCode::from(EXIT_ERROR)
            })?;
            let root = config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
            (cfg, root)
        }
        None => {
            log::info!("no snuff.toml found, using defaults");
            (default_config(), std::env::current_dir().unwrap_or_default())
        }
    };

    let overrides = CliOverrides {
        src: args.src.clone(),
        out: args.out.clone(),
        jobs: args.jobs,
        poll_interval_ms: interval_ms,
        require_marker: args.no_marker.then_some(false),
    };
    merge_cli_overrides(&mut config, &overrides);
    if let Err(e) = check(&config) {
        eprintln!("Error: {}", e);
        return Err(ExitCode::from(EXIT_ERROR));
    }

    let src = resolve_path(&project_root, &config.project.src);
    let out = resolve_path(&project_root, &config.project.out);

    if !src.is_dir() {
        eprintln!("Error: Source directory not found: {}", src.display());
        eprintln!("Create the directory or specify a different path with --src");
        return Err(ExitCode::from(EXIT_ERROR));
    }

    Ok(Project { config, src, out })
}

fn reporter(args: &ProjectArgs, verbose: bool) -> Arc<dyn ProgressReporter> {
    if args.json {
        Arc::new(JsonProgress::new())
    } else {
        Arc::new(
            ConsoleProgress::new()
                .with_colors(atty::is(atty::Stream::Stderr))
                .with_verbose(verbose),
        )
    }
}

/// Resolve the project and assemble a session over it.
fn open_session(
    args: &ProjectArgs,
    interval_ms: Option<u64>,
    force: bool,
    verbose: bool,
) -> Result<(BuildSession, SnuffConfig), ExitCode> {
    let Project { config, src, out } = resolve_project(args, interval_ms)?;

    if config.build.require_marker && !is_source_root(&src) {
        eprintln!("Error: {} is not a snuff source root (no .snuff marker)", src.display());
        eprintln!("Run 'snuff init' to create one, or pass --no-marker");
        return Err(ExitCode::from(EXIT_ERROR));
    }

    let pool = BuildThreadPool::new(config.build.jobs).map_err(|e| {
        eprintln!("Error: {}", e);
        ExitCode::from(EXIT_ERROR)
    })?;
    log::debug!("{} worker(s), src={} out={}", pool.size(), src.display(), out.display());

    let ledger = Arc::new(BuildLedger::load(&out));
    let session =
        BuildSession::new(ledger, pool, src, out, reporter(args, verbose)).with_force(force);
    Ok((session, config))
}

/// Run the build command
pub fn run_build(args: &ProjectArgs, force: bool, verbose: bool) -> ExitCode {
    let (mut session, _) = match open_session(args, None, force, verbose) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let outcome = session.build();
    if let Err(e) = session.shutdown() {
        log::warn!("{}", e);
    }

    match outcome {
        Ok(result) if result.is_success() => ExitCode::from(EXIT_SUCCESS),
        Ok(_) => ExitCode::from(EXIT_ERROR),
        Err(e) => {
            eprintln!("Build error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run the watch command
///
/// Stops when a line reading `q` arrives on stdin; otherwise runs until the
/// process is interrupted. The ledger is saved after every pass.
pub fn run_watch(
    args: &ProjectArgs,
    interval_ms: Option<u64>,
    force: bool,
    verbose: bool,
) -> ExitCode {
    let (mut session, config) = match open_session(args, interval_ms, force, verbose) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    // Held so that stdin closing does not read as a stop request
    let _keep_open = stop_tx.clone();
    let spawned = std::thread::Builder::new().name("snuff-stdin".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim() == "q" => {
                    let _ = stop_tx.send(());
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });
    if let Err(e) = spawned {
        log::warn!("stdin listener unavailable: {}", e);
    }

    eprintln!(
        "Watching {} every {}ms (enter 'q' to stop)",
        session.src_root().display(),
        config.watch.poll_interval_ms
    );

    let outcome = session.watch(config.watch.poll_interval(), &stop_rx);
    if let Err(e) = session.shutdown() {
        log::warn!("{}", e);
    }

    match outcome {
        Ok(passes) => {
            log::info!("watch finished after {} pass(es)", passes);
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Watch error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run the init command
pub fn run_init(path: &Path, name: Option<&str>) -> ExitCode {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    };

    let project_name = name
        .map(str::to_string)
        .or_else(|| {
            absolute
                .components()
                .filter_map(|c| match c {
                    std::path::Component::Normal(n) => Some(n.to_string_lossy().into_owned()),
                    _ => None,
                })
                .last()
        })
        .unwrap_or_else(|| "my-project".to_string());

    if let Err(e) = std::fs::create_dir_all(&absolute) {
        eprintln!("Error: could not create {}: {}", absolute.display(), e);
        return ExitCode::from(EXIT_ERROR);
    }

    match init_project(&absolute, &project_name) {
        Ok(config_path) => {
            println!("Created snuff project '{}' at {}", project_name, path.display());
            println!();
            println!("Project structure:");
            println!("  {}/", path.display());
            println!("  ├── snuff.toml");
            println!("  ├── assets/ (.snuff)");
            println!("  │   ├── scripts/");
            println!("  │   └── shaders/");
            println!("  └── build/");
            log::debug!("wrote {}", config_path.display());
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
