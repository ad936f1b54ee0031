use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fixsweep::config::{FingerprintKind, Settings};
use fixsweep::failure::{parse_failures_json, Failure};
use fixsweep::grouping::{FailureGrouper, PatternFingerprint};
use fixsweep::patterns::{read_patterns_json, PatternAnalysis, PatternRecognitionEngine};
use fixsweep::pipeline::state::sort_and_cap;
use fixsweep::pipeline::{BatchSuggestionPipeline, PipelineOutcome};
use fixsweep::progress::{ProgressReporter, StderrProgress};
use fixsweep::report::failures_from_report;
use fixsweep::suggest::llm::OpenRouterService;
use fixsweep::suggest::{known_pattern_suggestions, FixSuggestion};
use fixsweep::util::truncate;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "fixsweep",
    about = "Group failing tests and turn them into ranked fix suggestions",
    version
)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect known failure patterns in a raw test report (no model calls)
    Analyze {
        /// Path to the test runner output
        report: PathBuf,
        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate fix suggestions for a JSON failure list or a raw test report
    Suggest {
        input: PathBuf,
        /// No progress output
        #[arg(short, long)]
        quiet: bool,
        /// Print suggestions as JSON
        #[arg(long)]
        json: bool,
        /// Answer exact known-pattern hits locally instead of asking the model
        #[arg(long)]
        skip_known: bool,
    },
    /// List the known-pattern catalogue
    Patterns {
        /// Write the catalogue to this file as JSON instead
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "fixsweep=debug"
    } else {
        "fixsweep=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = Settings::load();
    settings
        .validate()
        .with_context(|| format!("Invalid settings in {}", Settings::config_location()))?;

    match cli.command {
        Command::Analyze { report, json } => cmd_analyze(&settings, &report, json),
        Command::Suggest {
            input,
            quiet,
            json,
            skip_known,
        } => cmd_suggest(&settings, &input, quiet, json, skip_known).await,
        Command::Patterns { export } => cmd_patterns(&settings, export.as_deref()),
    }
}

/// Seed catalogue plus any patterns from `settings.pattern_file`
fn build_engine(settings: &Settings) -> Result<PatternRecognitionEngine> {
    let engine =
        PatternRecognitionEngine::with_seed_patterns().with_fuzzy_threshold(settings.fuzzy_threshold);
    if let Some(path) = &settings.pattern_file {
        let extra = read_patterns_json(path)?;
        let summary = engine.update_pattern_database(extra);
        info!(
            added = summary.added,
            replaced = summary.replaced,
            "Loaded patterns from {}",
            path.display()
        );
    }
    Ok(engine)
}

/// A JSON array of failures, or anything else treated as raw runner output
fn load_failures(path: &Path) -> Result<Vec<Failure>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim_start().starts_with('[') {
        return parse_failures_json(&content)
            .with_context(|| format!("Failed to parse failures in {}", path.display()));
    }
    Ok(failures_from_report(&content))
}

fn cmd_analyze(settings: &Settings, report: &Path, json: bool) -> Result<ExitCode> {
    let engine = build_engine(settings)?;
    let raw = std::fs::read_to_string(report)
        .with_context(|| format!("Failed to read {}", report.display()))?;
    let analysis = engine.analyze(&raw, settings.min_bulk_count);

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print_analysis(&analysis);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_analysis(analysis: &PatternAnalysis) {
    println!(
        "{} known, {} unknown ({} occurrences resolvable without a model call)",
        analysis.known_count,
        analysis.unknown_count,
        analysis.resolved_without_model()
    );

    if !analysis.ranked.is_empty() {
        println!();
        println!("Ranked failures:");
    }
    for (i, ranked) in analysis.ranked.iter().enumerate() {
        let p = &ranked.pattern;
        let tag = p.known_pattern_id.as_deref().unwrap_or("unknown");
        println!(
            "  {:>3}. [{:.2}] {} x{}  {}: {}  ({})",
            i + 1,
            ranked.priority_score,
            p.location,
            p.frequency,
            p.failure_type,
            truncate(&p.message, 80),
            tag
        );
        if let Some(fix) = &ranked.suggested_fix {
            println!("         fix: {}", truncate(fix, 100));
        }
    }

    if !analysis.bulk_fixes.is_empty() {
        println!();
        println!("Bulk fixes:");
    }
    for bulk in &analysis.bulk_fixes {
        println!(
            "  {} x{} ({} occurrences)",
            bulk.fix_type, bulk.count, bulk.total_occurrences
        );
        if let Some(fix) = &bulk.suggested_fix {
            println!("    fix: {}", truncate(fix, 100));
        }
    }
}

async fn cmd_suggest(
    settings: &Settings,
    input: &Path,
    quiet: bool,
    json: bool,
    skip_known: bool,
) -> Result<ExitCode> {
    let failures = load_failures(input)?;
    let engine = Arc::new(build_engine(settings)?);
    let mut run = collect_suggestions(settings, engine, failures, quiet, skip_known).await?;
    sort_and_cap(&mut run.suggestions, settings.max_suggestions_per_failure);

    if json {
        println!("{}", serde_json::to_string_pretty(&run.suggestions)?);
    } else {
        print_suggestions(&run.suggestions);
    }

    Ok(if run.failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Suggestions gathered by one `suggest` invocation
struct SuggestRun {
    suggestions: Vec<FixSuggestion>,
    /// The model run recorded an error, or could not start
    failed: bool,
}

/// Answer known patterns locally when asked to, then send whatever is left
/// through the pipeline. The model service is only built when something is left.
async fn collect_suggestions(
    settings: &Settings,
    engine: Arc<PatternRecognitionEngine>,
    failures: Vec<Failure>,
    quiet: bool,
    skip_known: bool,
) -> Result<SuggestRun> {
    let (mut suggestions, remaining) = if skip_known {
        known_pattern_suggestions(&engine, &failures)
    } else {
        (Vec::new(), failures)
    };
    if !suggestions.is_empty() {
        info!(
            answered = suggestions.len(),
            "Answered failures from known patterns"
        );
    }

    if remaining.is_empty() {
        return Ok(SuggestRun {
            suggestions,
            failed: false,
        });
    }

    match suggest_with_model(settings, engine, remaining, quiet).await {
        Ok(outcome) => {
            let failed = outcome.final_error.is_some();
            if let Some(err) = &outcome.final_error {
                warn!("Run finished with an error; results are partial: {}", err);
            }
            suggestions.extend(outcome.all_suggestions);
            Ok(SuggestRun {
                suggestions,
                failed,
            })
        }
        Err(e) if !suggestions.is_empty() => {
            warn!("Model suggestions unavailable, showing local answers only: {:#}", e);
            Ok(SuggestRun {
                suggestions,
                failed: true,
            })
        }
        Err(e) => Err(e),
    }
}

async fn suggest_with_model(
    settings: &Settings,
    engine: Arc<PatternRecognitionEngine>,
    failures: Vec<Failure>,
    quiet: bool,
) -> Result<PipelineOutcome> {
    let service = Arc::new(OpenRouterService::from_settings(settings)?);
    let grouper = match settings.fingerprint {
        FingerprintKind::Message => FailureGrouper::default(),
        FingerprintKind::Pattern => {
            FailureGrouper::new(Arc::new(PatternFingerprint::new(engine)))
        }
    }
    .with_policy(settings.representative_policy);

    let pipeline =
        BatchSuggestionPipeline::new(service.clone(), settings.clone()).with_grouper(grouper);
    let progress: Arc<dyn ProgressReporter> = Arc::new(StderrProgress::new());
    let outcome = pipeline.run(failures, quiet, progress, None).await;

    let usage = service.usage();
    info!(
        groups = outcome.group_count,
        model_calls_avoided = outcome.model_calls_avoided,
        tokens = usage.total_tokens,
        cost_usd = usage.cost(),
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "Run finished"
    );
    Ok(outcome)
}

fn print_suggestions(suggestions: &[FixSuggestion]) {
    if suggestions.is_empty() {
        println!("No suggestions.");
        return;
    }
    for s in suggestions {
        let source = s
            .provenance
            .as_ref()
            .map(|p| p.source.label())
            .unwrap_or("unknown");
        println!("[{:.2}] {}  ({})", s.confidence, s.failure_id(), source);
        println!("    {}", s.suggestion_text);
        if let Some(explanation) = &s.explanation {
            println!("    why: {}", truncate(explanation, 160));
        }
        for change in &s.code_changes {
            match change.line {
                Some(line) => println!("    edit {}:{}", change.file.display(), line),
                None => println!("    edit {}", change.file.display()),
            }
        }
    }
}

fn cmd_patterns(settings: &Settings, export: Option<&Path>) -> Result<ExitCode> {
    let engine = build_engine(settings)?;
    let database = engine.database();

    if let Some(path) = export {
        database.save_json(path)?;
        info!(patterns = database.len(), "Exported catalogue to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let snapshot = database.snapshot();
    for pattern in snapshot.patterns() {
        println!(
            "{:<30} {:<24} impact {:.1}  \"{}\"",
            pattern.id, pattern.failure_type, pattern.impact_score, pattern.pattern
        );
    }
    Ok(ExitCode::SUCCESS)
}
