use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use colored::Colorize;
use fmac_patcher::{
    load_from_path, InsertionOutcome, PatchOutcome, PatchReport, Patcher, Recipe, Rollback,
    SourceDocument, VerificationReport, Verifier,
};
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_PARTIAL: u8 = 3;

#[derive(Parser)]
#[command(name = "fmac-patcher")]
#[command(about = "Insert the FMAC mkdirat check into a kernel fs/namei.c", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the source file to patch (e.g. linux/fs/namei.c)
    file: PathBuf,

    /// Recipe TOML to use instead of the built-in mkdirat recipe
    #[arg(short, long)]
    recipe: Option<PathBuf>,

    /// Show what would be inserted without writing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Show unified diff of changes
    #[arg(short, long)]
    diff: bool,

    /// Only check whether the patch markers are present
    #[arg(long, conflicts_with = "dry_run")]
    check: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !cli.file.is_file() {
        eprintln!(
            "{} {}",
            "Error:".red().bold(),
            format!("file does not exist: {}", cli.file.display())
        );
        return ExitCode::from(EXIT_USAGE);
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_tracing(verbose: u8) {
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

fn run(cli: &Cli) -> Result<ExitCode> {
    let recipe = match &cli.recipe {
        Some(path) => load_from_path(path)?,
        None => Recipe::mkdirat(),
    };

    println!("File: {}", cli.file.display());
    println!("Recipe: {}", recipe.meta.name);
    println!();

    if cli.check {
        let report = Verifier::new(recipe.verify.clone()).verify_file(&cli.file);
        print_verification(&report);
        return Ok(if report.all_present() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(EXIT_PARTIAL)
        });
    }

    let patcher = Patcher::new(recipe).context("recipe rejected")?;

    if cli.dry_run {
        return cmd_dry_run(&patcher, &cli.file, cli.diff);
    }

    let before = if cli.diff {
        Some(std::fs::read_to_string(&cli.file)?)
    } else {
        None
    };

    match patcher.run(&cli.file) {
        Ok(outcome) => {
            let report = outcome.report();
            print_insertions(&report.insertions, false);
            print_backup(report);
            if let Some(before) = &before {
                if report.changed {
                    if let Ok(after) = std::fs::read_to_string(&cli.file) {
                        display_diff(&cli.file, before, &after);
                    }
                }
            }
            println!();
            print_verification(&report.verification);
            println!();

            match outcome {
                PatchOutcome::Success(_) => {
                    println!("{}", "Patch complete.".green().bold());
                    println!(
                        "{}",
                        "Note: the security check function must be implemented elsewhere in the tree"
                            .dimmed()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                PatchOutcome::PartialSuccess(_) => {
                    println!(
                        "{}",
                        "Patch written, but some markers are missing; inspect the file manually"
                            .yellow()
                            .bold()
                    );
                    Ok(ExitCode::from(EXIT_PARTIAL))
                }
            }
        }
        Err(failure) => {
            eprintln!(
                "{} {} stage: {}",
                "✗".red(),
                failure.stage,
                failure.error
            );
            match &failure.rollback {
                Rollback::NoBackup => {
                    eprintln!("  {}", "No backup was taken; the file was not modified".dimmed());
                }
                Rollback::Restored(record) => {
                    eprintln!(
                        "  {}",
                        format!("Original restored from {}", record.backup_path.display()).yellow()
                    );
                }
                Rollback::RestoreFailed { record, error } => {
                    eprintln!(
                        "  {}",
                        format!(
                            "RESTORE FAILED: {} (backup kept at {})",
                            error,
                            record.backup_path.display()
                        )
                        .red()
                        .bold()
                    );
                }
            }
            eprintln!();
            eprintln!("{}", "Patch failed.".red().bold());
            Ok(ExitCode::from(EXIT_FAILURE))
        }
    }
}

fn cmd_dry_run(patcher: &Patcher, file: &Path, show_diff: bool) -> Result<ExitCode> {
    println!("{}", "[DRY RUN - nothing will be written]".cyan());

    let doc = SourceDocument::load(file)?;
    match patcher.prepare(&doc) {
        Ok(prepared) => {
            println!(
                "Function body: bytes {}..{}",
                prepared.span.start, prepared.span.end
            );
            match prepared.declaration_anchor {
                Some(offset) => println!("Declaration anchor: byte {}", offset),
                None => println!(
                    "{}",
                    "Declaration anchor: not found (forward declaration skipped)".yellow()
                ),
            }
            print_insertions(&prepared.edit.outcomes, true);
            if show_diff && prepared.edit.changed() {
                display_diff(file, doc.text(), &prepared.edit.text);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err((stage, error)) => {
            eprintln!("{} {} stage: {}", "✗".red(), stage, error);
            Ok(ExitCode::from(EXIT_FAILURE))
        }
    }
}

fn print_insertions(outcomes: &[InsertionOutcome], dry_run: bool) {
    for outcome in outcomes {
        match outcome {
            InsertionOutcome::Applied {
                kind,
                offset,
                resolved_offset,
                bytes,
            } => {
                let verb = if dry_run { "Would insert" } else { "Inserted" };
                println!(
                    "{} {}: {} {} bytes at {} (original offset {})",
                    "✓".green(),
                    kind,
                    verb,
                    bytes,
                    resolved_offset,
                    offset
                );
            }
            InsertionOutcome::AlreadyPresent { kind, marker } => {
                println!(
                    "{} {}: Already present ({})",
                    "⊙".yellow(),
                    kind,
                    marker.dimmed()
                );
            }
        }
    }
}

fn print_backup(report: &PatchReport) {
    println!(
        "{}",
        format!(
            "Backup of {}: {}",
            report.path.display(),
            report.backup.backup_path.display()
        )
        .dimmed()
    );
    if !report.changed {
        println!("{}", "File already patched; left untouched".dimmed());
    }
}

fn print_verification(report: &VerificationReport) {
    println!("{}", "Verification:".bold());
    if !report.readable {
        println!("  {}", "could not read file".red());
    }
    for status in &report.markers {
        if status.present {
            println!("  {} {} - present", "✓".green(), status.label);
        } else {
            println!("  {} {} - missing", "✗".red(), status.label);
        }
    }
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for group in diff.grouped_ops(3) {
        println!("{}", "@@".cyan());
        for op in &group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => format!("-{}", change).red(),
                    ChangeTag::Insert => format!("+{}", change).green(),
                    ChangeTag::Equal => format!(" {}", change).normal(),
                };
                print!("{}", sign);
            }
        }
    }
}
