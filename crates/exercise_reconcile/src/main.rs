use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use exercise_reconcile_core::catalog::{CatalogClient, CatalogClientConfig, page_size_from_env};
use exercise_reconcile_core::config::load_config;
use exercise_reconcile_core::overrides::{OverrideAction, OverrideTable};
use exercise_reconcile_core::reconcile::{
    EntrySummary, ReconcileOptions, RunMode, RunReport, run_reconciliation,
};
use exercise_reconcile_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, ensure_document_ready,
    init_layout, inspect_runtime, resolve_paths,
};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_ENV: &str = "EXERCISE_RECONCILE_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "exercise-reconcile",
    version,
    about = "Reconcile workout-template exercise references against the canonical exercise catalog"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Template document to reconcile")]
    document: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Override table (TOML)")]
    overrides: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Log progress to stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    document: Option<PathBuf>,
    overrides: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            document: cli.document.clone(),
            overrides: cli.overrides.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Materialize .exercise-reconcile/config.toml and overrides.toml")]
    Init(InitArgs),
    #[command(about = "Show resolved paths and configuration")]
    Status,
    #[command(about = "List the active override rules")]
    Overrides,
    #[command(about = "Compute and report corrections without writing")]
    Preview(PreviewArgs),
    #[command(about = "Write corrections back into the template document")]
    Apply(ApplyArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite existing config/override files")]
    force: bool,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
    #[arg(long, help = "Include a unified diff of the pending changes")]
    diff: bool,
    #[arg(long, help = "Exit non-zero when any entry is unmatched")]
    strict: bool,
}

#[derive(Debug, Args)]
struct ApplyArgs {
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
    #[arg(long, help = "Exit non-zero when any entry is unmatched")]
    strict: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Overrides) => run_overrides(&runtime),
        Some(Commands::Preview(args)) => run_reconcile(
            &runtime,
            RunMode::Preview,
            args.json,
            args.diff,
            args.strict,
        ),
        Some(Commands::Apply(args)) => {
            run_reconcile(&runtime, RunMode::Apply, args.json, false, args.strict)
        }
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized exercise-reconcile layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("document_path: {}", normalize_path(&paths.document_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("wrote_overrides: {}", report.wrote_overrides);
    if !report.wrote_config || !report.wrote_overrides {
        println!("hint: existing files were kept (use --force to overwrite)");
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let config = load_config(&paths.config_path)?;
    let keys = config.template_keys();
    let override_rules = if paths.overrides_path.is_none() || status.overrides_exists {
        OverrideTable::load(paths.overrides_path.as_deref())?
            .len()
            .to_string()
    } else {
        "n/a".to_string()
    };

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("document_path: {}", normalize_path(&paths.document_path));
    println!("document_exists: {}", format_flag(status.document_exists));
    println!(
        "document_size_bytes: {}",
        status
            .document_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("overrides_path: {}", paths.overrides_display());
    println!("overrides.rules: {override_rules}");
    println!(
        "catalog.url: {}",
        config.catalog_url().as_deref().unwrap_or("<not configured>")
    );
    println!("catalog.table: {}", config.catalog_table());
    println!("catalog.page_size: {}", page_size_from_env());
    println!(
        "template.keys: id={} name={} media={} thumbnail={}",
        keys.id, keys.name, keys.media_url, keys.thumbnail_url
    );
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    Ok(())
}

fn run_overrides(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let overrides = OverrideTable::load(paths.overrides_path.as_deref())?;

    println!("override rules");
    println!("source: {}", paths.overrides_display());
    println!("rules.count: {}", overrides.len());
    for (key, rule) in overrides.rules() {
        match &rule.action {
            OverrideAction::RenameTo { target } => {
                println!("rule: {key} -> {} {target}", rule.action.as_str());
            }
            action => println!("rule: {key} -> {}", action.as_str()),
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    Ok(())
}

fn run_reconcile(
    runtime: &RuntimeOptions,
    mode: RunMode,
    json: bool,
    diff: bool,
    strict: bool,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_document_ready(&paths, &status)?;

    let config = load_config(&paths.config_path)?;
    let overrides = OverrideTable::load(paths.overrides_path.as_deref())?;
    let mut client = CatalogClient::new(CatalogClientConfig::from_config(&config))?;

    let mut options = ReconcileOptions::new(mode, paths.document_path.clone());
    options.page_size = page_size_from_env();
    options.keys = config.template_keys();
    options.include_diff = diff;

    info!(
        mode = mode.as_str(),
        document = %normalize_path(&paths.document_path),
        overrides = overrides.len(),
        "starting reconciliation"
    );
    let report = run_reconciliation(&mut client, &overrides, &options)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    if strict && report.has_unmatched() {
        bail!(
            "{} entr{} still need a manual override (--strict)",
            report.unmatched.len(),
            if report.unmatched.len() == 1 { "y" } else { "ies" }
        );
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("reconcile {}", report.mode.as_str());
    println!("document: {}", report.document_path);
    println!("canonical_records: {}", report.canonical_records);
    println!("request_count: {}", report.request_count);
    println!("entries_parsed: {}", report.entries_parsed);
    println!("already_correct: {}", report.already_correct.len());

    println!("corrected: {}", report.corrected.len());
    for corrected in &report.corrected {
        println!("  - {}", describe_entry(&corrected.entry));
        for change in &corrected.changes {
            println!(
                "      {}: {} -> {}",
                change.field.as_str(),
                change.old.as_deref().unwrap_or("<null>"),
                change.new
            );
        }
    }

    print_entries("skipped", &report.skipped);
    print_entries("unmatched (needs manual override)", &report.unmatched);

    if !report.parse_warnings.is_empty() {
        println!("parse_warnings: {}", report.parse_warnings.len());
        for issue in &report.parse_warnings {
            println!("  - {issue}");
        }
    }
    if !report.index_collisions.is_empty() {
        println!("index_collisions: {}", report.index_collisions.len());
        for collision in &report.index_collisions {
            println!(
                "  - {} `{}`: kept {}, dropped {}",
                collision.index.as_str(),
                collision.key,
                collision.kept_id,
                collision.discarded_id
            );
        }
    }
    if !report.stale_overrides.is_empty() {
        println!("stale_overrides: {}", report.stale_overrides.len());
        for stale in &report.stale_overrides {
            println!("  - {stale}");
        }
    }

    println!("document_hash_before: {}", report.document_hash_before);
    println!("document_hash_after: {}", report.document_hash_after);
    println!("wrote_document: {}", format_flag(report.wrote_document));
    if let Some(diff) = &report.diff {
        println!();
        print!("{diff}");
    }
}

fn print_entries(label: &str, entries: &[EntrySummary]) {
    println!("{label}: {}", entries.len());
    for entry in entries {
        println!("  - {}", describe_entry(entry));
    }
}

fn describe_entry(entry: &EntrySummary) -> String {
    format!(
        "line {}: {} \"{}\" ({})",
        entry.line,
        entry.id,
        entry.name,
        entry.method.as_str()
    )
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
        document: runtime.document.clone(),
        overrides: runtime.overrides.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
