//! Platemeta CLI - command-line front end for the plate metadata engine.

use clap::{Parser, Subcommand};
use colored::Colorize;
use platemeta::report::render_text_grid;
use platemeta::{
    Config, Field, JoinScope, Session, SessionError, lint_plates, load_config,
};
use serde_json::json;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "platemeta")]
#[command(about = "Annotate, edit, and exchange 96-well plate metadata")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command script against one in-memory session
    Run {
        /// Script file, one command per line
        script: PathBuf,

        /// Stop at the first failing command and exit non-zero
        #[arg(long)]
        strict: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Convert a legacy or layout CSV to the canonical CSV format
    Convert {
        /// Input CSV (either layout)
        input: PathBuf,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Backfill negsel, anchor and receptor from a reference table
    Join {
        /// Input plate CSV
        input: PathBuf,

        /// Reference CSV (title row, header row, data rows)
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Only join this plate (1-based position)
        #[arg(short, long)]
        plate: Option<usize>,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show plates as grids of one field
    Inspect {
        /// Input plate CSV
        input: PathBuf,

        /// Only show this plate (1-based position)
        #[arg(short, long)]
        plate: Option<usize>,

        /// Field to display
        #[arg(long, default_value = "base_strain")]
        field: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check plates for values the export cannot carry and unknown strains
    Lint {
        /// Input plate CSV
        input: PathBuf,

        /// Reference CSV to check strains against
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Exit with non-zero status on any issue
        #[arg(long)]
        strict: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Render one HTML report per plate and field
    Render {
        /// Input plate CSV
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Fields to render (repeatable; default from config, else all)
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Report title
        #[arg(short, long)]
        title: Option<String>,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn is_json(format: &str) -> bool {
    format == "json"
}

fn emit_error(format: &str, code: &str, detail: &str) -> ! {
    if is_json(format) {
        eprintln!("{}", json!({"error": code, "detail": detail}));
    } else {
        eprintln!("{}", format!("Error: {}", detail).red());
    }
    process::exit(1);
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => emit_error("json", "json_error", &e.to_string()),
    }
}

fn parse_field(format: &str, s: &str) -> Field {
    s.parse::<Field>()
        .unwrap_or_else(|e: String| emit_error(format, "invalid_field", &e))
}

fn current_dir(format: &str) -> PathBuf {
    env::current_dir().unwrap_or_else(|e| emit_error(format, "io_error", &e.to_string()))
}

/// Build a session from the working directory config and import `input`.
fn open_session(format: &str, config: &Config, input: &Path) -> Session {
    let mut session = Session::new().with_config(config.clone());
    match session.import_file(input) {
        Ok(outcome) => {
            tracing::info!(
                format = %outcome.format,
                plates = outcome.plates.len(),
                "loaded {}",
                input.display()
            );
            session
        }
        Err(e) => emit_error(format, "import_error", &e.to_string()),
    }
}

fn load_reference(
    format: &str,
    session: &mut Session,
    flag: Option<PathBuf>,
    config: &Config,
) -> bool {
    let Some(path) = flag.or_else(|| config.reference.clone()) else {
        return false;
    };
    if let Err(e) = session.load_reference_file(&path) {
        emit_error(format, "reference_error", &e.to_string());
    }
    true
}

/// Convert a 1-based plate position to an index the session accepts.
fn activate(format: &str, session: &mut Session, position: usize) {
    let result = position
        .checked_sub(1)
        .ok_or_else(|| SessionError::Usage("plate positions start at 1".to_string()))
        .and_then(|index| session.activate(index));
    if let Err(e) = result {
        emit_error(format, "plate_error", &e.to_string());
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cwd = current_dir("text");
    let config = load_config(&cwd);

    match cli.command {
        Commands::Run {
            script,
            strict,
            format,
        } => {
            let text = std::fs::read_to_string(&script).unwrap_or_else(|e| {
                emit_error(
                    &format,
                    "io_error",
                    &format!("Cannot read {}: {}", script.display(), e),
                )
            });
            let base_dir = script
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.clone());

            let mut session = Session::new()
                .with_base_dir(base_dir)
                .with_config(config.clone());
            if let Some(reference) = &config.reference {
                if let Err(e) = session.load_reference_file(reference) {
                    tracing::warn!(error = %e, "could not preload configured reference table");
                }
            }

            let report = session.run_script(&text, strict);

            if is_json(&format) {
                print_json(&json!(report));
            } else {
                for line in &report.lines {
                    if line.ok {
                        println!("{}", line.message);
                    } else {
                        eprintln!(
                            "{}",
                            format!("line {}: {}: {}", line.line, line.command, line.message).red()
                        );
                    }
                }
                let failures = report.failures();
                if failures > 0 {
                    eprintln!(
                        "{}",
                        format!("{} command(s) failed", failures).yellow()
                    );
                }
            }

            if report.aborted {
                process::exit(1);
            }
        }

        Commands::Convert {
            input,
            output,
            format,
        } => {
            let session = open_session(&format, &config, &input);
            match session.export_file(&output) {
                Ok(path) => {
                    if is_json(&format) {
                        print_json(&json!({
                            "success": true,
                            "plates": session.store().len(),
                            "file": path.display().to_string(),
                        }));
                    } else {
                        println!(
                            "{}",
                            format!(
                                "Exported {} plate(s) to {}",
                                session.store().len(),
                                path.display()
                            )
                            .green()
                        );
                    }
                }
                Err(e) => emit_error(&format, "export_error", &e.to_string()),
            }
        }

        Commands::Join {
            input,
            reference,
            plate,
            output,
            format,
        } => {
            let mut session = open_session(&format, &config, &input);
            if !load_reference(&format, &mut session, reference, &config) {
                emit_error(
                    &format,
                    "reference_error",
                    "No reference table given \
                     (use --reference or set 'reference' in .platemeta.yaml)",
                );
            }

            let scope = match plate {
                Some(position) => {
                    activate(&format, &mut session, position);
                    JoinScope::Current
                }
                None => config.join_scope,
            };

            let report = session
                .join(scope)
                .unwrap_or_else(|e| emit_error(&format, "join_error", &e.to_string()));
            let path = session
                .export_file(&output)
                .unwrap_or_else(|e| emit_error(&format, "export_error", &e.to_string()));

            if is_json(&format) {
                print_json(&json!({
                    "success": true,
                    "file": path.display().to_string(),
                    "report": report,
                }));
            } else {
                println!(
                    "{}",
                    format!(
                        "Joined {} well(s); {} without strain",
                        report.updated, report.skipped_empty
                    )
                    .green()
                );
                for miss in &report.unmatched {
                    println!(
                        "{}",
                        format!(
                            "  plate {} {}: strain '{}' not in reference",
                            miss.plate, miss.well, miss.strain
                        )
                        .yellow()
                    );
                }
                println!("{}", format!("File: {}", path.display()).dimmed());
            }
        }

        Commands::Inspect {
            input,
            plate,
            field,
            format,
        } => {
            let field = parse_field(&format, &field);
            let mut session = open_session(&format, &config, &input);
            let plates: Vec<usize> = match plate {
                Some(position) => {
                    activate(&format, &mut session, position);
                    vec![session.active_index()]
                }
                None => (0..session.store().len()).collect(),
            };

            if is_json(&format) {
                let selected: Vec<_> = plates.iter().map(|&i| &session.plates()[i]).collect();
                print_json(&json!({ "plates": selected }));
            } else {
                for i in plates {
                    let p = &session.plates()[i];
                    let filled = p.metadata.values().filter(|m| !m.is_empty()).count();
                    println!("{}", render_text_grid(p, field));
                    println!("{}", format!("{} of 96 wells have data", filled).dimmed());
                    println!();
                }
            }
        }

        Commands::Lint {
            input,
            reference,
            strict,
            format,
        } => {
            let mut session = open_session(&format, &config, &input);
            load_reference(&format, &mut session, reference, &config);
            let report = lint_plates(session.plates(), session.reference());

            if is_json(&format) {
                print_json(&json!({
                    "errors": report.errors().len(),
                    "warnings": report.warnings().len(),
                    "issues": report.issues,
                }));
            } else if report.issues.is_empty() {
                println!("{}", "No issues found.".green());
            } else {
                for issue in &report.issues {
                    let line = issue.to_string();
                    if issue.severity == platemeta::LintSeverity::Error {
                        println!("{}", line.red());
                    } else {
                        println!("{}", line.yellow());
                    }
                }
                println!();
                println!(
                    "{} error(s), {} warning(s)",
                    report.errors().len(),
                    report.warnings().len()
                );
            }

            if report.has_errors() || (strict && !report.issues.is_empty()) {
                process::exit(1);
            }
        }

        Commands::Render {
            input,
            output,
            fields,
            title,
        } => {
            let format = "text";
            let mut config = config;
            if !fields.is_empty() {
                config.report_fields = fields.iter().map(|f| parse_field(format, f)).collect();
            }
            if let Some(title) = title {
                config.title = title;
            }

            let mut session = open_session(format, &config, &input);
            match session.render_to_dir(&output) {
                Ok((report, written)) => {
                    for path in &written {
                        println!("{}", format!("Created {}", path.display()).green());
                    }
                    for (plate, field) in &report.skipped {
                        eprintln!(
                            "{}",
                            format!("Skipped plate {} {}: nothing rendered", plate, field)
                                .yellow()
                        );
                    }
                }
                Err(e) => emit_error(format, "render_error", &e.to_string()),
            }
        }
    }
}
