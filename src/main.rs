//! RepoFleet CLI entry point.

use clap::Parser;
use comfy_table::{presets, Cell, ContentArrangement, Table};
use repofleet::cli::{Cli, CloneArgs, Commands, ListArgs, OutputFormat, PullArgs, StatusArgs};
use repofleet::{
    BulkOptions, BulkProcessor, CancelFlag, ConfigStore, CredentialMasker, DiscoveredRepo,
    DiscoveryEngine, IndicatifSink, NoopSink, OperationType, ProgressSink, Registry,
    RepoFleetError, StatusScanner, UpdateMode,
};
use std::io::Write;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let masker = CredentialMasker::new();
            tracing::error!(kind = e.kind(), "fatal error");
            eprintln!("Error: {}", masker.mask(&e.to_string()));
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        // RUST_LOG wins; otherwise the verbose flag sets our own level and
        // every other crate stays at warn.
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let base_level = match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            };
            EnvFilter::new(format!("warn,repofleet={base_level}"))
        })
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> repofleet::Result<ExitCode> {
    tracing::debug!("Loading configuration");
    let config = ConfigStore::load(cli.config.as_deref())?;
    let registry = Registry::with_builtin();

    match cli.command {
        Commands::List(args) => run_list(&registry, &config, args).await,
        Commands::Clone(args) => run_clone(&registry, &config, args).await,
        Commands::Pull(args) => run_pull(&registry, &config, args).await,
        Commands::Status(args) => run_status(&config, args).await,
        Commands::Init => run_init(),
        Commands::Validate(args) => run_validate(&args.config),
    }
}

/// Progress sink for a format: bars for tables, silence for JSON.
fn sink_for(format: OutputFormat) -> Box<dyn ProgressSink> {
    match format {
        OutputFormat::Table => Box::new(IndicatifSink::new()),
        OutputFormat::Json => Box::new(NoopSink),
    }
}

async fn run_list(
    registry: &Registry,
    config: &ConfigStore,
    args: ListArgs,
) -> repofleet::Result<ExitCode> {
    let engine = DiscoveryEngine::new(registry, config);
    let sink = sink_for(args.format);
    let results = engine
        .discover(&args.query, args.provider.as_deref(), args.limit, None, sink.as_ref())
        .await?;

    match args.format {
        OutputFormat::Json => {
            let listings: Vec<_> = results.iter().map(DiscoveredRepo::to_listing).collect();
            println!("{}", serde_json::to_string_pretty(&listings)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["Organization", "Project", "Repository", "Branch", "Private"]);
            for found in &results {
                table.add_row(vec![
                    Cell::new(&found.organization),
                    Cell::new(found.project.as_deref().unwrap_or("-")),
                    Cell::new(&found.repository.name),
                    Cell::new(&found.repository.default_branch),
                    Cell::new(found.repository.is_private),
                ]);
            }
            println!("{table}");
            println!("{} repositories", results.len());
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_clone(
    registry: &Registry,
    config: &ConfigStore,
    args: CloneArgs,
) -> repofleet::Result<ExitCode> {
    let engine = DiscoveryEngine::new(registry, config);
    let sink = sink_for(OutputFormat::Table);
    let discovered = engine
        .discover(&args.query, args.provider.as_deref(), args.limit, None, sink.as_ref())
        .await?;
    let repos: Vec<_> = discovered.into_iter().map(|d| d.repository).collect();

    if repos.is_empty() {
        println!("No repositories matched '{}'", args.query);
        return Ok(ExitCode::SUCCESS);
    }

    // Force mode only removes directories confirmed up front.
    let confirmed_removals = if args.update_mode == UpdateMode::Force {
        let existing = BulkProcessor::existing_targets(&args.target, &repos)?;
        if existing.is_empty() || args.force_yes {
            existing
        } else {
            confirm_removals(&existing)?
        }
    } else {
        Vec::new()
    };

    let options = BulkOptions {
        target: args.target,
        operation: OperationType::Clone,
        update_mode: args.update_mode,
        concurrency: args.concurrency.unwrap_or(config.settings.concurrency),
        confirmed_removals,
    };
    run_bulk(registry, config, repos, options, sink.as_ref()).await
}

async fn run_pull(
    registry: &Registry,
    config: &ConfigStore,
    args: PullArgs,
) -> repofleet::Result<ExitCode> {
    let engine = DiscoveryEngine::new(registry, config);
    let sink = sink_for(OutputFormat::Table);
    let discovered = engine
        .discover(&args.query, args.provider.as_deref(), args.limit, None, sink.as_ref())
        .await?;
    let repos: Vec<_> = discovered.into_iter().map(|d| d.repository).collect();

    if repos.is_empty() {
        println!("No repositories matched '{}'", args.query);
        return Ok(ExitCode::SUCCESS);
    }

    let options = BulkOptions {
        target: args.target,
        operation: OperationType::Pull,
        update_mode: UpdateMode::Pull,
        concurrency: args.concurrency.unwrap_or(config.settings.concurrency),
        confirmed_removals: Vec::new(),
    };
    run_bulk(registry, config, repos, options, sink.as_ref()).await
}

async fn run_bulk(
    registry: &Registry,
    config: &ConfigStore,
    repos: Vec<repofleet::Repository>,
    options: BulkOptions,
    sink: &dyn ProgressSink,
) -> repofleet::Result<ExitCode> {
    let processor = BulkProcessor::new(registry, config);
    let outcome = processor.run(repos, &options, &CancelFlag::new(), sink).await?;

    println!(
        "{} succeeded, {} failed",
        outcome.success_count(),
        outcome.failures.len()
    );
    if outcome.failures.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    let masker = CredentialMasker::new();
    for (name, reason) in &outcome.failures {
        eprintln!("  {name}: {}", masker.mask(reason));
    }
    // Partial failure exits with the repository-operation code.
    Ok(ExitCode::from(4))
}

/// Prompt once with the full list of directories force mode wants to
/// remove; a declined prompt degrades force mode to skip.
fn confirm_removals(existing: &[std::path::PathBuf]) -> repofleet::Result<Vec<std::path::PathBuf>> {
    println!("Force mode will REMOVE {} existing directories:", existing.len());
    for path in existing {
        println!("  {}", path.display());
    }
    print!("Remove and re-clone all of the above? [y/N] ");
    std::io::stdout().flush().map_err(RepoFleetError::from)?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).map_err(RepoFleetError::from)?;
    if answer.trim().eq_ignore_ascii_case("y") {
        Ok(existing.to_vec())
    } else {
        println!("Not confirmed; existing directories will be skipped.");
        Ok(Vec::new())
    }
}

async fn run_status(config: &ConfigStore, args: StatusArgs) -> repofleet::Result<ExitCode> {
    let scanner = StatusScanner::new(
        args.concurrency.unwrap_or(config.settings.concurrency),
        args.fetch,
    );
    let sink = sink_for(args.format);
    let statuses = scanner.scan(&args.path, &CancelFlag::new(), sink.as_ref()).await?;

    match args.format {
        OutputFormat::Json => println!("{}", repofleet::status::render_json(&statuses)?),
        OutputFormat::Table => {
            print!("{}", repofleet::status::render_table(&statuses, args.show_clean, true));
        }
    }

    if args.fail_on_dirty && repofleet::status::any_dirty(&statuses) {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_init() -> repofleet::Result<ExitCode> {
    let config_path = std::path::Path::new("repofleet.yaml");
    if config_path.exists() {
        return Err(RepoFleetError::configuration(format!(
            "configuration file already exists: {}",
            config_path.display()
        )));
    }
    std::fs::write(config_path, ConfigStore::example_yaml())
        .map_err(|e| RepoFleetError::filesystem(config_path, e))?;
    println!("Created example configuration: repofleet.yaml");
    Ok(ExitCode::SUCCESS)
}

fn run_validate(path: &std::path::Path) -> repofleet::Result<ExitCode> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RepoFleetError::configuration(format!("cannot read '{}': {e}", path.display())))?;
    match ConfigStore::from_yaml(&content).and_then(|store| store.validate()) {
        Ok(()) => {
            println!("Configuration is valid: {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let masker = CredentialMasker::new();
            eprintln!("Configuration error: {}", masker.mask(&e.to_string()));
            Ok(ExitCode::from(1))
        }
    }
}
