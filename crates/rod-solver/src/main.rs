use std::path::PathBuf;
use std::process::ExitCode;

use rod_solver::{AnalysisPipeline, SolverError, inspect};

fn usage() {
    eprintln!("usage:");
    eprintln!("  rod-solver <project> [-p] [key.path=value ...]");
    eprintln!("  rod-solver inspect <project> [key.path=value ...]");
}

/// Project file and overrides; `-p` before an override is accepted and
/// ignored.
fn parse_args(args: &[String]) -> Option<(PathBuf, Vec<String>)> {
    let (project, rest) = args.split_first()?;
    if project.starts_with('-') || project.contains('=') {
        return None;
    }
    let mut overrides = Vec::new();
    for arg in rest {
        match arg.as_str() {
            "-p" => continue,
            a if a.contains('=') => overrides.push(a.to_string()),
            _ => return None,
        }
    }
    Some((PathBuf::from(project), overrides))
}

/// 2 for configuration and usage errors, 1 for runtime failures.
fn exit_code(err: &SolverError) -> u8 {
    if err.is_configuration() { 2 } else { 1 }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (inspect_only, rest) = match args.first().map(String::as_str) {
        Some("inspect") => (true, &args[1..]),
        Some("-h" | "--help") | None => {
            usage();
            return ExitCode::from(2);
        }
        Some(_) => (false, &args[..]),
    };
    let Some((project, overrides)) = parse_args(rest) else {
        usage();
        return ExitCode::from(2);
    };

    if inspect_only {
        return match inspect(&project, &overrides) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::from(exit_code(&err))
            }
        };
    }

    let pipeline = match AnalysisPipeline::from_project(&project, &overrides) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(exit_code(&err));
        }
    };
    match pipeline.run() {
        Ok(results) => {
            println!("{}", results.message);
            println!("output: {}", results.output_dir.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code(&err))
        }
    }
}
