//! snuff - Command-line tool for incrementally compiling scripts and shaders

use std::process::ExitCode;

use snuff::cli;

fn main() -> ExitCode {
    cli::run()
}
