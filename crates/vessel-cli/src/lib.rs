//! Command-line runtime for the `vessel` sandbox launcher.
//!
//! The runtime splits configuration flags from the subcommand, loads layered
//! configuration, installs telemetry, plans the container layout and either
//! prints the plan or supervises the launcher. It is exercised both from the binary and from
//! tests, which substitute the output streams.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use vessel_container::{Launcher, MountPlan};
use vessel_process::KILLED_BY_SIGNAL;

mod cli;
mod config;
mod errors;
mod layout;
mod supervisor;
pub mod telemetry;


use cli::{Cli, CliCommand};
use config::ConfigArgumentSplit;
use errors::AppError;
use supervisor::Mode;

/// Exit code used when the container could not be set up.
pub const SETUP_FAILURE: u8 = 125;

/// Exit code reported for a launcher killed by a signal.
pub const SIGNALLED: u8 = 255;

/// Runs the CLI using the provided arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = config::split_config_arguments(&args);
    let cli = match Cli::try_parse_from(config::command_arguments(&args, &split)) {
        Ok(cli) => cli,
        Err(error) => return report_usage(&error, stdout, stderr),
    };
    match execute(cli, &split, stdout) {
        Ok(code) => code,
        Err(error) => {
            writeln!(stderr, "vessel: {error}").ok();
            ExitCode::from(SETUP_FAILURE)
        }
    }
}

fn report_usage<W: Write, E: Write>(error: &clap::Error, stdout: &mut W, stderr: &mut E) -> ExitCode {
    let rendered = error.render();
    if error.use_stderr() {
        write!(stderr, "{rendered}").ok();
        ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(SETUP_FAILURE))
    } else {
        write!(stdout, "{rendered}").ok();
        ExitCode::SUCCESS
    }
}

fn execute<W: Write>(
    cli: Cli,
    split: &ConfigArgumentSplit,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    let config = config::load(split)?;
    telemetry::initialise(&config)?;

    match cli.command {
        CliCommand::Plan { layout, json } => {
            let plan = layout::build_plan(&layout, &config)?;
            write_plan(&plan, json, stdout)?;
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Run {
            layout,
            interactive,
            exec,
            command,
        } => {
            let plan = layout::build_plan(&layout, &config)?;
            let launcher = Launcher::locate(config.bwrap().map(camino::Utf8Path::as_std_path))?;
            let args = launcher.command_line(plan, &command);
            stdout.flush().map_err(AppError::WritePlan)?;
            let status = supervisor::supervise(args, Mode::from_flags(interactive, exec), &config)?;
            Ok(ExitCode::from(exit_code(status)))
        }
    }
}

fn write_plan<W: Write>(plan: &MountPlan, json: bool, stdout: &mut W) -> Result<(), AppError> {
    let args: Vec<String> = plan
        .describe()
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    if json {
        serde_json::to_writer(&mut *stdout, &args).map_err(AppError::SerialisePlan)?;
        writeln!(stdout).map_err(AppError::WritePlan)?;
    } else {
        for arg in &args {
            writeln!(stdout, "{arg}").map_err(AppError::WritePlan)?;
        }
    }
    stdout.flush().map_err(AppError::WritePlan)
}

/// Maps a launcher status onto a process exit code.
fn exit_code(status: i32) -> u8 {
    if status == KILLED_BY_SIGNAL {
        return SIGNALLED;
    }
    u8::try_from(status).unwrap_or(SIGNALLED)
}
