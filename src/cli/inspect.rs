//! Read-only commands (status, decompile)

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use super::build::{resolve_project, Project};
use super::{ProjectArgs, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::{is_source_root, BuildLedger};
use crate::compiler::CompilerRegistry;

/// Run the status command
///
/// Scans a copy of the ledger against the source tree without saving it, so
/// nothing is marked seen and the build root is left untouched.
pub fn run_status(args: &ProjectArgs) -> ExitCode {
    let Project { src, out, .. } = match resolve_project(args, None) {
        Ok(project) => project,
        Err(code) => return code,
    };

    let ledger = BuildLedger::load(&out);
    let report = ledger.scan(&src, &out);
    let stale: Vec<String> =
        ledger.entries().into_iter().filter(|e| e.needs_build()).map(|e| e.path).collect();

    if args.json {
        let value = serde_json::json!({
            "src": src.display().to_string(),
            "out": out.display().to_string(),
            "marked": is_source_root(&src),
            "report": report,
            "stale": stale,
        });
        println!("{}", value);
    } else {
        println!("Source: {}{}", src.display(), if is_source_root(&src) { "" } else { " (unmarked)" });
        println!("Output: {}", out.display());
        println!(
            "{} tracked, {} built, {} stale ({} new, {} modified, {} removed since last save)",
            report.total, report.built, report.not_built, report.added, report.modified, report.removed
        );
        for path in &stale {
            println!("  {}", path);
        }
    }

    ExitCode::from(EXIT_SUCCESS)
}

/// Run the decompile command
pub fn run_decompile(artifact: &Path, output: Option<&Path>) -> ExitCode {
    let data = match std::fs::read(artifact) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", artifact.display(), e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let mut registry = CompilerRegistry::with_defaults();
    let (file_type, payload) = match registry.decompile(&data) {
        Ok(decoded) => decoded,
        Err(e) => {
            eprintln!("Error: {}: {}", artifact.display(), e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    log::info!("{}: {} container, {} payload bytes", artifact.display(), file_type, payload.len());

    let written = match output {
        Some(path) => std::fs::write(path, &payload),
        None => std::io::stdout().lock().write_all(&payload),
    };

    match written {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Error: cannot write payload: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
